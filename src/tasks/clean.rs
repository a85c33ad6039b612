//! Removes stylesheet rules whose selectors match nothing in the built HTML.

use std::collections::HashSet;
use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::traits::ToCss;
use lol_html::{RewriteStrSettings, element, rewrite_str};
use regex::Regex;

use crate::config::{Config, SourceSet};
use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{as_overhead, collect_sources, write_atomic};
use crate::task::Report;
use crate::tasks::style::{StyleError, split_map_comment};

static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.((?:\\.|[\w-])+)").expect("class pattern is valid"));

static ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#((?:\\.|[\w-])+)").expect("id pattern is valid"));

static PSEUDO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"::?[\w-]+").expect("pseudo pattern is valid"));

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s>+~])([a-zA-Z][\w-]*)").expect("tag pattern is valid")
});

static ARGUMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("argument pattern is valid")
});

/// Always considered present.
const SAFELIST: [&str; 2] = ["html", "body"];

/// Selector tokens found in a set of HTML documents.
///
/// Captured once, after the HTML task has written its outputs, and handed to
/// the clean pass explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlSnapshot {
    classes: HashSet<String>,
    ids: HashSet<String>,
    tags: HashSet<String>,
}

impl HtmlSnapshot {
    /// Reads every `.html` file below `dist`.
    pub fn capture(dist: &Utf8Path) -> Result<Self, TaskError> {
        let mut snapshot = Self::default();

        for file in collect_sources(&SourceSet::new(dist, &["html"]))? {
            match file.read_to_string() {
                Ok(html) => snapshot.add_document(&html),
                Err(e) => tracing::warn!("clean-style: ignoring {}\n{e}", file.rel),
            }
        }

        Ok(snapshot)
    }

    pub fn from_documents<'a>(documents: impl IntoIterator<Item = &'a str>) -> Self {
        let mut snapshot = Self::default();
        for html in documents {
            snapshot.add_document(html);
        }
        snapshot
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    fn add_document(&mut self, html: &str) {
        let settings = RewriteStrSettings {
            element_content_handlers: vec![element!("*", |el| {
                self.tags.insert(el.tag_name());

                if let Some(class) = el.get_attribute("class") {
                    self.classes
                        .extend(class.split_ascii_whitespace().map(str::to_owned));
                }

                if let Some(id) = el.get_attribute("id") {
                    let id = id.trim();
                    if !id.is_empty() {
                        self.ids.insert(id.to_owned());
                    }
                }

                Ok(())
            })],
            // only tokens are collected, nothing is rewritten
            strict: false,
            ..RewriteStrSettings::new()
        };

        if let Err(e) = rewrite_str(html, settings) {
            tracing::warn!("clean-style: unparsable document\n{e}");
        }
    }

    /// Whether every class, id and tag named by `selector` occurs in the
    /// snapshot. Selectors that name none of them are always kept.
    pub fn matches(&self, selector: &str) -> bool {
        let stripped = ARGUMENTS.replace_all(selector, "");

        let classes_ok = CLASS
            .captures_iter(&stripped)
            .all(|c| self.classes.contains(&unescape(&c[1])));
        let ids_ok = ID
            .captures_iter(&stripped)
            .all(|c| self.ids.contains(&unescape(&c[1])));

        if !(classes_ok && ids_ok) {
            return false;
        }

        let bare = CLASS.replace_all(&stripped, "");
        let bare = ID.replace_all(&bare, "");
        let bare = PSEUDO.replace_all(&bare, "");

        TAG.captures_iter(&bare).all(|c| {
            let tag = c[1].to_ascii_lowercase();
            SAFELIST.contains(&tag.as_str()) || self.tags.contains(&tag)
        })
    }
}

fn unescape(token: &str) -> String {
    let mut out = String::with_capacity(token.len());
    let mut chars = token.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

/// Splits a serialized selector list on commas outside brackets and quotes.
fn split_selectors(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote = None;
    let mut start = 0;

    for (i, c) in list.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(list[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(list[start..].trim());

    parts
}

/// Drops unmatched selectors, then rules left without any.
fn prune(rules: &mut CssRuleList<'_>, snapshot: &HtmlSnapshot) -> usize {
    let before = rules.0.len();

    rules.0.retain_mut(|rule| match rule {
        CssRule::Style(style) => {
            let Ok(text) = style.selectors.to_css_string(PrinterOptions::default()) else {
                return true;
            };

            let parts = split_selectors(&text);
            if parts.len() != style.selectors.0.len() {
                // can't line the text up with the parsed selectors
                return true;
            }

            let mut keep = parts.iter().map(|s| snapshot.matches(s));
            style.selectors.0.retain(|_| keep.next().unwrap_or(true));

            !style.selectors.0.is_empty()
        }
        CssRule::Media(media) => {
            prune(&mut media.rules, snapshot);
            !media.rules.0.is_empty()
        }
        CssRule::Supports(supports) => {
            prune(&mut supports.rules, snapshot);
            !supports.rules.0.is_empty()
        }
        _ => true,
    });

    before - rules.0.len()
}

/// Rewrites the stylesheet keeping only rules the snapshot can match.
pub fn clean_css(css: &str, snapshot: &HtmlSnapshot) -> Result<String, StyleError> {
    let (body, comment) = split_map_comment(css);

    let mut stylesheet = StyleSheet::parse(body, ParserOptions::default())
        .map_err(|e| StyleError::Css(e.to_string()))?;

    let removed = prune(&mut stylesheet.rules, snapshot);
    tracing::debug!("clean-style: dropped {removed} top-level rules");

    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| StyleError::Css(e.to_string()))?;

    Ok(match comment {
        Some(comment) => format!("{}\n{comment}\n", result.code),
        None => result.code,
    })
}

pub struct StyleCleanTask {
    stylesheet: Utf8PathBuf,
}

impl StyleCleanTask {
    pub fn new(config: &Config) -> Self {
        Self {
            stylesheet: config.stylesheet(),
        }
    }

    pub fn run(&self, snapshot: &HtmlSnapshot) -> Result<Report, TaskError> {
        let s = Instant::now();
        let mut report = Report::new(TaskName::CleanStyle);

        let css = match fs::read_to_string(&self.stylesheet) {
            Ok(css) => css,
            Err(e) => {
                let e = TaskError::read(&self.stylesheet, e);
                tracing::warn!("clean-style: nothing to clean\n{e}");
                report.skipped = 1;
                report.elapsed = s.elapsed();
                return Ok(report);
            }
        };

        if snapshot.is_empty() {
            tracing::warn!("clean-style: no built HTML found, every rule would be dropped");
        }

        match clean_css(&css, snapshot) {
            Ok(cleaned) => {
                write_atomic(&self.stylesheet, cleaned)?;
                report.written = 1;
            }
            Err(e) => {
                let e = TaskError::transform(&self.stylesheet, e);
                tracing::warn!("clean-style: skipping\n{e}");
                report.skipped = 1;
            }
        }

        report.elapsed = s.elapsed();
        tracing::info!("{report} {}", as_overhead(s));

        Ok(report)
    }
}
