//! Compiles the SCSS entries into one prefixed and minified stylesheet.

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use thiserror::Error;

use crate::config::{BrowserTargets, Config, SourceSet, StyleOptions};
use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{SourceFile, as_overhead, collect_sources, write_atomic};
use crate::sourcemap::{SourceMap, relative_url};
use crate::task::Report;

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    /// The compiled CSS could not be parsed, prefixed or printed.
    #[error("CSS processing error: {0}")]
    Css(String),
}

const SOURCE_MAP_MARKER: &str = "/*# sourceMappingURL=";

pub struct StyleTask {
    sources: SourceSet,
    root: Utf8PathBuf,
    output: Utf8PathBuf,
    options: StyleOptions,
}

impl StyleTask {
    pub fn new(config: &Config) -> Self {
        Self {
            sources: config.styles(),
            root: config.root.clone(),
            output: config.stylesheet(),
            options: config.style.clone(),
        }
    }

    pub fn run(&self) -> Result<Report, TaskError> {
        let s = Instant::now();
        let mut report = Report::new(TaskName::Style);

        let entries: Vec<_> = collect_sources(&self.sources)?
            .into_iter()
            .filter(|file| !is_partial(&file.path))
            .collect();

        let mut compiled = Vec::new();

        for entry in &entries {
            match self.compile(entry) {
                Ok(css) => compiled.push((entry, css)),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!("style: skipping {}\n{e}", entry.rel);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        if compiled.is_empty() {
            tracing::warn!("style: nothing compiled, {} left untouched", self.output);
            report.elapsed = s.elapsed();
            return Ok(report);
        }

        let concatenated = compiled
            .iter()
            .map(|(_, css)| css.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let css = match postprocess(&concatenated, &self.options) {
            Ok(css) => css,
            Err(e) => {
                let e = TaskError::transform(&self.output, e);
                tracing::warn!("style: {} left untouched\n{e}", self.output);
                report.skipped += compiled.len();
                report.elapsed = s.elapsed();
                return Ok(report);
            }
        };

        let name = self.output.file_name().unwrap_or("styles.css");
        let dir = self.output.parent().unwrap_or(&self.root);

        let mut map = SourceMap::new(name);
        for (entry, _) in &compiled {
            let content = entry.read_to_string()?;
            map = map.source(relative_url(dir, &entry.path), content);
        }
        let map = map
            .to_json()
            .map_err(|e| TaskError::transform(&self.output, e))?;

        write_atomic(&self.output, with_map_comment(&css, name))?;
        write_atomic(&dir.join(format!("{name}.map")), map)?;

        report.written = compiled.len();
        report.elapsed = s.elapsed();
        tracing::info!("{report} {}", as_overhead(s));

        Ok(report)
    }

    fn compile(&self, entry: &SourceFile) -> Result<String, TaskError> {
        if !entry.path.is_file() {
            return Err(TaskError::read(
                &entry.path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }

        let options = grass::Options::default().load_path(self.sources.base.as_std_path());

        grass::from_path(entry.path.as_std_path(), &options)
            .map_err(|e| TaskError::transform(&entry.path, StyleError::Sass(e)))
    }
}

/// Partials are only reachable through `@use`/`@import`.
fn is_partial(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}

fn targets(browsers: &BrowserTargets) -> Targets {
    let version = |major: u32| Some(major << 16);

    Targets::from(Browsers {
        chrome: version(browsers.chrome),
        edge: version(browsers.edge),
        firefox: version(browsers.firefox),
        safari: version(browsers.safari),
        ios_saf: version(browsers.ios_saf),
        ..Browsers::default()
    })
}

/// Adds vendor prefixes for the configured browsers and minifies.
pub fn postprocess(css: &str, options: &StyleOptions) -> Result<String, StyleError> {
    let mut stylesheet = StyleSheet::parse(css, ParserOptions::default())
        .map_err(|e| StyleError::Css(e.to_string()))?;

    stylesheet
        .minify(MinifyOptions {
            targets: targets(&options.browsers),
            ..MinifyOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            targets: targets(&options.browsers),
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    Ok(result.code)
}

pub(crate) fn with_map_comment(css: &str, name: &str) -> String {
    format!("{css}\n{SOURCE_MAP_MARKER}{name}.map */\n")
}

/// Splits a trailing sourceMappingURL comment off the stylesheet.
pub(crate) fn split_map_comment(css: &str) -> (&str, Option<&str>) {
    match css.rfind(SOURCE_MAP_MARKER) {
        Some(i) => (css[..i].trim_end(), Some(css[i..].trim_end())),
        None => (css, None),
    }
}
