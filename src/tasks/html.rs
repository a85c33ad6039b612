//! Minifies views and cache-busts the assets they reference.

use std::borrow::Cow;

use camino::Utf8PathBuf;
use lol_html::errors::RewritingError;
use lol_html::html_content::Element;
use lol_html::{HandlerResult, RewriteStrSettings, element, rewrite_str};
use minify_html::Cfg;
use thiserror::Error;

use crate::config::{CacheBust, Config, HtmlOptions, SourceSet};
use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{SourceFile, collect_sources, timestamp_token, write_atomic};
use crate::sourcemap::{SourceMap, relative_url};
use crate::task::{Outcome, Report, run_batch};

/// Errors that can occur when rendering views.
#[derive(Debug, Error)]
pub enum HtmlError {
    #[error("Couldn't rewrite references: {0}")]
    Rewrite(#[from] RewritingError),

    #[error("Minified document is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

const EXTERNAL: [&str; 7] = [
    "http:",
    "https:",
    "//",
    "data:",
    "mailto:",
    "tel:",
    "javascript:",
];

pub struct HtmlTask {
    sources: SourceSet,
    dist: Utf8PathBuf,
    options: HtmlOptions,
}

impl HtmlTask {
    pub fn new(config: &Config) -> Self {
        Self {
            sources: config.views(),
            dist: config.dist(),
            options: config.html.clone(),
        }
    }

    pub fn run(&self) -> Result<Report, TaskError> {
        let files = collect_sources(&self.sources)?;

        // one token for the whole invocation
        let token = match self.options.cache_bust {
            CacheBust::Timestamp => Some(timestamp_token()),
            CacheBust::Off => None,
        };

        run_batch(TaskName::Html, &files, |file| {
            self.process(file, token.as_deref())
        })
    }

    fn process(&self, file: &SourceFile, token: Option<&str>) -> Result<Outcome, TaskError> {
        let source = file.read_to_string()?;
        let html = render(&source, &self.options, token)
            .map_err(|e| TaskError::transform(&file.path, e))?;

        let path = self.dist.join(&file.rel);
        let name = path.file_name().unwrap_or("index.html");
        let dir = path.parent().unwrap_or(&self.dist);

        let map = SourceMap::new(name)
            .source(relative_url(dir, &file.path), source.as_str())
            .to_json()
            .map_err(|e| TaskError::transform(&file.path, e))?;

        write_atomic(&path, html)?;
        write_atomic(&dir.join(format!("{name}.map")), map)?;

        Ok(Outcome::Written)
    }
}

/// Cache-busts and minifies a single document.
pub fn render(
    source: &str,
    options: &HtmlOptions,
    token: Option<&str>,
) -> Result<String, HtmlError> {
    let busted = match token {
        Some(token) => Cow::Owned(bust_references(source, token)?),
        None => Cow::Borrowed(source),
    };

    if !options.collapse_whitespace {
        return Ok(busted.into_owned());
    }

    let mut cfg = Cfg::new();
    cfg.keep_comments = !options.remove_comments;
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;

    Ok(String::from_utf8(minify_html::minify(busted.as_bytes(), &cfg))?)
}

/// Appends `t=<token>` to every internal `href` and `src` attribute.
///
/// Only attribute values are touched, script bodies and text are left alone.
pub fn bust_references(html: &str, token: &str) -> Result<String, HtmlError> {
    let busted = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("[href]", |el| bust_attribute(el, "href", token)),
                element!("[src]", |el| bust_attribute(el, "src", token)),
            ],
            ..RewriteStrSettings::new()
        },
    )?;

    Ok(busted)
}

fn bust_attribute(el: &mut Element<'_, '_>, name: &str, token: &str) -> HandlerResult {
    if let Some(url) = el.get_attribute(name)
        && let Cow::Owned(busted) = bust(&url, token)
    {
        el.set_attribute(name, &busted)?;
    }

    Ok(())
}

fn bust<'a>(url: &'a str, token: &str) -> Cow<'a, str> {
    if !is_internal(url) {
        return Cow::Borrowed(url);
    }

    let (base, fragment) = match url.find('#') {
        Some(i) => url.split_at(i),
        None => (url, ""),
    };
    let sep = if base.contains('?') { '&' } else { '?' };

    Cow::Owned(format!("{base}{sep}t={token}{fragment}"))
}

fn is_internal(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();

    !(url.is_empty() || url.starts_with('#') || EXTERNAL.iter().any(|p| url.starts_with(p)))
}
