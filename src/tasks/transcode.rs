//! Modern-format siblings (WebP, AVIF) for every raster source.

use std::collections::HashSet;

use camino::Utf8PathBuf;
use image::codecs::avif::AvifEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::config::{Config, SourceSet, TranscodeOptions};
use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{SourceFile, collect_sources, write_atomic};
use crate::task::{Outcome, Report, run_batch};
use crate::tasks::image::ImageError;

/// Encoder speed for AVIF, 1 (slowest) to 10 (fastest).
const AVIF_SPEED: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    WebP,
    Avif,
}

impl Format {
    pub fn extension(&self) -> &'static str {
        match self {
            Format::WebP => "webp",
            Format::Avif => "avif",
        }
    }

    fn task(&self) -> TaskName {
        match self {
            Format::WebP => TaskName::ImageWebp,
            Format::Avif => TaskName::ImageAvif,
        }
    }
}

/// Decodes a raster and encodes it into `format`.
pub fn transcode(data: &[u8], format: Format, quality: u8) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory(data)?;
    let (width, height) = (img.width(), img.height());
    let rgba = img.to_rgba8();

    let encoded = match format {
        Format::WebP => webp::Encoder::from_rgba(&rgba, width, height)
            .encode_simple(false, f32::from(quality))
            .map_err(|e| ImageError::WebP(format!("{e:?}")))?
            .to_vec(),
        Format::Avif => {
            let mut buffer = Vec::new();
            AvifEncoder::new_with_speed_quality(&mut buffer, AVIF_SPEED, quality).write_image(
                &rgba,
                width,
                height,
                ExtendedColorType::Rgba8,
            )?;
            buffer
        }
    };

    Ok(encoded)
}

pub struct TranscodeTask {
    sources: SourceSet,
    dist: Utf8PathBuf,
    format: Format,
    options: TranscodeOptions,
}

impl TranscodeTask {
    /// Transcoding always starts from the source bytes, the image cache is
    /// not consulted.
    pub fn new(config: &Config, format: Format) -> Self {
        let options = match format {
            Format::WebP => config.webp,
            Format::Avif => config.avif,
        };

        Self {
            sources: config.rasters(),
            dist: config.dist_images(),
            format,
            options,
        }
    }

    pub fn run(&self) -> Result<Report, TaskError> {
        let files = collect_sources(&self.sources)?;
        let (files, collisions) = self.claim_outputs(files);

        let mut report = run_batch(self.format.task(), &files, |file| self.process(file))?;
        report.skipped += collisions;

        Ok(report)
    }

    fn output(&self, file: &SourceFile) -> Utf8PathBuf {
        self.dist
            .join(file.rel.with_extension(self.format.extension()))
    }

    /// `a.png` and `a.jpg` in one directory would both write `a.<ext>`. The
    /// first in sorted order keeps the output, the rest are skipped.
    fn claim_outputs(&self, files: Vec<SourceFile>) -> (Vec<SourceFile>, usize) {
        let mut claimed = HashSet::new();
        let mut collisions = 0;

        let files = files
            .into_iter()
            .filter(|file| {
                let output = self.output(file);
                if claimed.insert(output.clone()) {
                    return true;
                }

                tracing::warn!(
                    "{}: skipping {}, another source already writes {output}",
                    self.format.task(),
                    file.rel,
                );
                collisions += 1;
                false
            })
            .collect();

        (files, collisions)
    }

    fn process(&self, file: &SourceFile) -> Result<Outcome, TaskError> {
        let data = file.read()?;
        let encoded = transcode(&data, self.format, self.options.quality)
            .map_err(|e| TaskError::transform(&file.path, e))?;

        write_atomic(&self.output(file), &encoded)?;

        Ok(Outcome::Written)
    }
}
