//! Compiled-in configuration.
//!
//! Every task reads its options from a literal record built once at startup
//! by [`Config::new`]. Nothing here is read from the environment or from a
//! file, and nothing is mutated after the pipeline starts.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use serde::Serialize;

use crate::core::TaskName;
use crate::error::ConfigError;

const DIR_SOURCE: &str = "src";
const DIR_DIST: &str = "public";
const DIR_CACHE: &str = ".cache/img";

/// How HTML references are cache-busted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBust {
    /// Append `t=<millis>` captured once per task invocation.
    Timestamp,
    /// Leave references untouched.
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlOptions {
    /// When false the markup is not minified at all.
    pub collapse_whitespace: bool,
    pub remove_comments: bool,
    pub cache_bust: CacheBust,
}

/// Minimum browser major versions used for vendor prefixing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrowserTargets {
    pub chrome: u32,
    pub edge: u32,
    pub firefox: u32,
    pub safari: u32,
    pub ios_saf: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleOptions {
    pub browsers: BrowserTargets,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptOptions {
    /// Target environment preset, e.g. `es2015`.
    pub target: String,
    pub mangle: bool,
}

/// Part of the image cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageOptions {
    /// Optimization intensity, 0-7.
    pub level: u8,
    /// Quality used when re-encoding JPEG sources.
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeOptions {
    /// Encoder quality, 1-100.
    pub quality: u8,
}

/// Whether the unused-CSS pass runs on its own after watch-triggered
/// HTML and style rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanPolicy {
    /// Only when `clean-style` is invoked by name.
    #[default]
    Manual,
    /// After every watch-triggered `html` or `style` run.
    AfterChange,
}

/// A base directory plus the patterns under it that belong to one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    /// Taken literally, never interpreted as a glob.
    pub base: Utf8PathBuf,
    /// Glob patterns relative to `base`.
    pub patterns: Vec<String>,
}

impl SourceSet {
    /// Recursive patterns for each of `extensions` below `base`.
    pub fn new(base: impl Into<Utf8PathBuf>, extensions: &[&str]) -> Self {
        let patterns = extensions
            .iter()
            .map(|ext| format!("**/*.{ext}"))
            .collect();

        Self {
            base: base.into(),
            patterns,
        }
    }

    /// Absolute globs with the base escaped.
    pub fn globs(&self) -> Vec<String> {
        let escaped = Pattern::escape(self.base.as_str());

        self.patterns
            .iter()
            .map(|pattern| format!("{escaped}/{pattern}"))
            .collect()
    }
}

/// The whole pipeline configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Project root, all other paths are resolved against it.
    pub root: Utf8PathBuf,
    pub html: HtmlOptions,
    pub style: StyleOptions,
    pub script: ScriptOptions,
    pub image: ImageOptions,
    pub webp: TranscodeOptions,
    pub avif: TranscodeOptions,
    pub clean: CleanPolicy,
    /// Debounce window for the file watcher.
    pub debounce: Duration,
    /// Persistent backing directory for the image cache.
    pub cache_dir: Option<Utf8PathBuf>,
}

impl Config {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();
        let cache_dir = Some(root.join(DIR_CACHE));

        Self {
            root,
            html: HtmlOptions {
                collapse_whitespace: true,
                remove_comments: true,
                cache_bust: CacheBust::Timestamp,
            },
            style: StyleOptions {
                browsers: BrowserTargets {
                    chrome: 90,
                    edge: 90,
                    firefox: 78,
                    safari: 13,
                    ios_saf: 13,
                },
            },
            script: ScriptOptions {
                target: "es2015".into(),
                mangle: true,
            },
            image: ImageOptions {
                level: 3,
                jpeg_quality: 80,
            },
            webp: TranscodeOptions { quality: 50 },
            avif: TranscodeOptions { quality: 50 },
            clean: CleanPolicy::Manual,
            debounce: Duration::from_millis(250),
            cache_dir,
        }
    }

    pub fn source_root(&self) -> Utf8PathBuf {
        self.root.join(DIR_SOURCE)
    }

    pub fn dist(&self) -> Utf8PathBuf {
        self.root.join(DIR_DIST)
    }

    pub fn views(&self) -> SourceSet {
        SourceSet::new(self.source_root().join("views"), &["html"])
    }

    pub fn styles(&self) -> SourceSet {
        SourceSet::new(self.source_root().join("styles"), &["scss"])
    }

    pub fn scripts(&self) -> SourceSet {
        SourceSet::new(self.source_root().join("scripts"), &["js"])
    }

    /// Everything the optimizer accepts.
    pub fn images(&self) -> SourceSet {
        SourceSet::new(self.source_root().join("images"), &["png", "jpg", "svg"])
    }

    /// Raster inputs for the WebP and AVIF transcoders.
    pub fn rasters(&self) -> SourceSet {
        SourceSet::new(self.source_root().join("images"), &["png", "jpg"])
    }

    pub fn dist_styles(&self) -> Utf8PathBuf {
        self.dist().join("styles")
    }

    pub fn dist_scripts(&self) -> Utf8PathBuf {
        self.dist().join("scripts")
    }

    pub fn dist_images(&self) -> Utf8PathBuf {
        self.dist().join("images")
    }

    /// The single concatenated stylesheet.
    pub fn stylesheet(&self) -> Utf8PathBuf {
        self.dist_styles().join("styles.css")
    }

    /// Source sets watched in `dev` mode, paired with the task they trigger.
    pub fn watch_sources(&self) -> Vec<(TaskName, SourceSet)> {
        vec![
            (TaskName::Html, self.views()),
            (TaskName::Style, self.styles()),
            (TaskName::Script, self.scripts()),
            (TaskName::Image, self.images()),
        ]
    }

    /// Checks the configuration before any task runs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let source = self.source_root();
        if !source.is_dir() {
            return Err(ConfigError::MissingSourceRoot(source));
        }

        if self.image.level > 7 {
            return Err(ConfigError::Level(self.image.level));
        }

        for (name, quality) in [
            ("jpeg", self.image.jpeg_quality),
            ("webp", self.webp.quality),
            ("avif", self.avif.quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::Quality(name, quality));
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Path of `path` relative to `base`, used to mirror sources into `dist`.
pub(crate) fn relative_to<'a>(path: &'a Utf8Path, base: &Utf8Path) -> &'a Utf8Path {
    path.strip_prefix(base).unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_set_globs() {
        let set = SourceSet::new("site/src/images", &["png", "jpg"]);

        assert_eq!(
            set.globs(),
            vec!["site/src/images/**/*.png", "site/src/images/**/*.jpg"]
        );
    }

    #[test]
    fn test_source_set_escapes_base() {
        let set = SourceSet::new("site[1]/src", &["js"]);
        assert_eq!(set.patterns, vec!["**/*.js"]);
        assert_eq!(set.globs(), vec!["site[[]1[]]/src/**/*.js"]);
    }

    #[test]
    fn test_literal_defaults() {
        let config = Config::new("site");

        assert_eq!(config.stylesheet(), "site/public/styles/styles.css");
        assert_eq!(config.webp.quality, 50);
        assert_eq!(config.avif.quality, 50);
        assert_eq!(config.image.level, 3);
        assert!(config.html.collapse_whitespace);
        assert!(config.html.remove_comments);
        assert_eq!(config.html.cache_bust, CacheBust::Timestamp);
        assert_eq!(config.clean, CleanPolicy::Manual);
    }

    #[test]
    fn test_validate_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let err = Config::new(&root).validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSourceRoot(_)));

        std::fs::create_dir(root.join("src")).unwrap();
        assert!(Config::new(&root).validate().is_ok());
    }

    #[test]
    fn test_validate_quality_range() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::create_dir(root.join("src")).unwrap();

        let mut config = Config::new(&root);
        config.avif.quality = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Quality("avif", 0))
        ));

        let mut config = Config::new(&root);
        config.image.level = 9;
        assert!(matches!(config.validate(), Err(ConfigError::Level(9))));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(
            relative_to(Utf8Path::new("src/views/a/b.html"), Utf8Path::new("src/views")),
            "a/b.html"
        );
        assert_eq!(
            relative_to(Utf8Path::new("other/b.html"), Utf8Path::new("src/views")),
            "other/b.html"
        );
    }
}
