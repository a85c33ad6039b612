//! Lossless-first image optimization backed by the shared [`ImageCache`].

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use thiserror::Error;

use crate::cache::{CacheKey, ImageCache};
use crate::config::{Config, ImageOptions, SourceSet};
use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{SourceFile, collect_sources, write_atomic};
use crate::task::{Outcome, Report, run_batch};

/// Errors that can occur when processing images.
#[derive(Debug, Error)]
pub enum ImageError {
    /// An error occurred during image decoding or encoding.
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// The SVG document is not well-formed XML.
    #[error("SVG error: {0}")]
    Svg(#[from] quick_xml::Error),

    #[error("WebP encoding error: {0}")]
    WebP(String),

    #[error("Unsupported image type '{0}'")]
    Unsupported(String),
}

/// Source formats accepted by the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ImageKind {
    Png,
    Jpeg,
    Svg,
}

impl ImageKind {
    pub fn from_path(path: &Utf8Path) -> Result<Self, ImageError> {
        let ext = path.extension().unwrap_or_default().to_ascii_lowercase();

        match ext.as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "svg" => Ok(Self::Svg),
            _ => Err(ImageError::Unsupported(ext)),
        }
    }
}

/// Turns source bytes into optimized bytes of the same format.
pub trait Optimizer: Send + Sync {
    fn optimize(
        &self,
        kind: ImageKind,
        data: &[u8],
        options: &ImageOptions,
    ) -> Result<Vec<u8>, ImageError>;
}

/// Re-encodes rasters with stronger settings and strips SVG markup that
/// does not render.
///
/// Never returns something larger than the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultOptimizer;

impl Optimizer for DefaultOptimizer {
    fn optimize(
        &self,
        kind: ImageKind,
        data: &[u8],
        options: &ImageOptions,
    ) -> Result<Vec<u8>, ImageError> {
        let out = match kind {
            ImageKind::Png => optimize_png(data, options.level)?,
            ImageKind::Jpeg => optimize_jpeg(data, options.jpeg_quality)?,
            ImageKind::Svg => optimize_svg(data)?,
        };

        Ok(if out.len() < data.len() {
            out
        } else {
            data.to_vec()
        })
    }
}

fn optimize_png(data: &[u8], level: u8) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Png)?;

    let compression = match level {
        0 | 1 => CompressionType::Fast,
        2 => CompressionType::Default,
        _ => CompressionType::Best,
    };

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
    img.write_with_encoder(encoder)?;

    Ok(buffer)
}

fn optimize_jpeg(data: &[u8], quality: u8) -> Result<Vec<u8>, ImageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());

    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    rgb.write_with_encoder(encoder)?;

    Ok(buffer)
}

/// Elements whose character data is rendered or executed.
const TEXT_CONTENT: [&[u8]; 7] = [
    b"text",
    b"tspan",
    b"textPath",
    b"title",
    b"desc",
    b"style",
    b"script",
];

/// Drops comments, `<metadata>` and indentation between elements, and
/// collapses the whitespace between attributes. Everything else is copied
/// through untouched.
fn optimize_svg(data: &[u8]) -> Result<Vec<u8>, quick_xml::Error> {
    let mut reader = Reader::from_reader(data);
    let mut writer = Writer::new(Vec::with_capacity(data.len()));

    // per open element, whether whitespace inside it is significant
    let mut open: Vec<bool> = Vec::new();
    // nesting depth inside a dropped element
    let mut dropped = 0usize;

    loop {
        let event = reader.read_event()?;

        if dropped > 0 {
            match event {
                Event::Start(_) => dropped += 1,
                Event::End(_) => dropped -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Comment(_) => {}
            Event::Start(start) if start.local_name().as_ref() == b"metadata" => dropped = 1,
            Event::Empty(start) if start.local_name().as_ref() == b"metadata" => {}
            Event::Start(start) => {
                let inherited = open.last().copied().unwrap_or(false);
                open.push(inherited || keeps_whitespace(&start)?);
                writer.write_event(Event::Start(compact(&start)?))?;
            }
            Event::Empty(start) => {
                writer.write_event(Event::Empty(compact(&start)?))?;
            }
            Event::End(end) => {
                open.pop();
                writer.write_event(Event::End(end))?;
            }
            Event::Text(text) => {
                let significant = open.last().copied().unwrap_or(false);
                if significant || !text.iter().all(u8::is_ascii_whitespace) {
                    writer.write_event(Event::Text(text))?;
                }
            }
            event => writer.write_event(event)?,
        }
    }

    Ok(writer.into_inner())
}

fn keeps_whitespace(start: &BytesStart<'_>) -> Result<bool, quick_xml::Error> {
    if TEXT_CONTENT.contains(&start.local_name().as_ref()) {
        return Ok(true);
    }

    let preserve = start
        .try_get_attribute("xml:space")?
        .is_some_and(|attr| attr.value.as_ref() == b"preserve");

    Ok(preserve)
}

/// Rewrites the tag with single spaces between attributes.
fn compact(start: &BytesStart<'_>) -> Result<BytesStart<'static>, quick_xml::Error> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr?;
        // values are re-emitted inside double quotes as they are
        if attr.value.contains(&b'"') {
            return Ok(start.to_owned());
        }
        attributes.push(attr);
    }

    let name = start.decoder().decode(start.name().as_ref())?.into_owned();
    let mut tag = BytesStart::new(name);
    for attr in attributes {
        tag.push_attribute(attr);
    }

    Ok(tag)
}

pub struct ImageTask {
    sources: SourceSet,
    dist: Utf8PathBuf,
    options: ImageOptions,
    cache: Arc<ImageCache>,
    optimizer: Arc<dyn Optimizer>,
}

impl ImageTask {
    pub fn new(config: &Config, cache: Arc<ImageCache>, optimizer: Arc<dyn Optimizer>) -> Self {
        Self {
            sources: config.images(),
            dist: config.dist_images(),
            options: config.image,
            cache,
            optimizer,
        }
    }

    pub fn run(&self) -> Result<Report, TaskError> {
        let files = collect_sources(&self.sources)?;
        run_batch(TaskName::Image, &files, |file| self.process(file))
    }

    fn process(&self, file: &SourceFile) -> Result<Outcome, TaskError> {
        let kind =
            ImageKind::from_path(&file.path).map_err(|e| TaskError::transform(&file.path, e))?;
        let data = file.read()?;

        let key = CacheKey::new(&data, &(kind, self.options))
            .map_err(|e| TaskError::transform(&file.path, e))?;

        let (optimized, hit) = self
            .cache
            .get_or_try_insert_with(key, || self.optimizer.optimize(kind, &data, &self.options))
            .map_err(|e| TaskError::transform(&file.path, e))?;

        write_atomic(&self.dist.join(&file.rel), &optimized)?;

        Ok(if hit { Outcome::Cached } else { Outcome::Written })
    }
}
