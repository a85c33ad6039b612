use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;
use indicatif::ProgressStyle;
use tempfile::NamedTempFile;

use crate::config::{SourceSet, relative_to};
use crate::error::TaskError;

const ANSI_BLUE: Style = Style::new().blue();

pub(crate) static PROGRESS_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .expect("Error setting progress bar template")
        .progress_chars("#>-")
});

pub(crate) fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// A file matched by one of a task's source globs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    /// Path relative to the base of the source set, used for mirroring.
    pub rel: Utf8PathBuf,
}

impl SourceFile {
    pub fn read(&self) -> Result<Vec<u8>, TaskError> {
        fs::read(&self.path).map_err(|e| TaskError::read(&self.path, e))
    }

    pub fn read_to_string(&self) -> Result<String, TaskError> {
        let bytes = self.read()?;
        String::from_utf8(bytes).map_err(|e| TaskError::transform(&self.path, e))
    }
}

/// Expands every glob in the set. Entries that can't be read are logged and
/// skipped; the result is sorted and free of duplicates.
pub(crate) fn collect_sources(set: &SourceSet) -> Result<Vec<SourceFile>, TaskError> {
    let mut files = Vec::new();

    for pattern in set.globs() {
        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("skipping unreadable entry {}: {}", e.path().display(), e);
                    continue;
                }
            };

            let path = match Utf8PathBuf::try_from(path) {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("skipping non UTF-8 path {}", e.as_path().display());
                    continue;
                }
            };

            if !path.is_file() {
                continue;
            }

            let rel = relative_to(&path, &set.base).to_path_buf();
            files.push(SourceFile { path, rel });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);

    Ok(files)
}

/// Writes `data` to `path` all-or-nothing: the bytes go to a temporary file
/// in the same directory which then replaces the target.
pub(crate) fn write_atomic(path: &Utf8Path, data: impl AsRef<[u8]>) -> Result<(), TaskError> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };

    fs::create_dir_all(dir).map_err(|e| TaskError::write(path, e))?;

    let mut file = NamedTempFile::new_in(dir).map_err(|e| TaskError::write(path, e))?;
    file.write_all(data.as_ref())
        .map_err(|e| TaskError::write(path, e))?;
    file.persist(path)
        .map_err(|e| TaskError::write(path, e.error))?;

    Ok(())
}

/// Milliseconds since the Unix epoch, used as the cache-bust token.
pub(crate) fn timestamp_token() -> String {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_root() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_collect_sources_mirrors_relative_paths() {
        let (_dir, root) = tmp_root();
        let base = root.join("src/views");
        fs::create_dir_all(base.join("blog")).unwrap();
        fs::write(base.join("index.html"), "a").unwrap();
        fs::write(base.join("blog/post.html"), "b").unwrap();
        fs::write(base.join("notes.txt"), "c").unwrap();

        let files = collect_sources(&SourceSet::new(&base, &["html"])).unwrap();
        let rels: Vec<_> = files.iter().map(|f| f.rel.as_str()).collect();

        assert_eq!(rels, vec!["blog/post.html", "index.html"]);
    }

    #[test]
    fn test_collect_sources_missing_base_is_empty() {
        let (_dir, root) = tmp_root();
        let files = collect_sources(&SourceSet::new(root.join("nope"), &["js"])).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_write_atomic_creates_and_overwrites() {
        let (_dir, root) = tmp_root();
        let path = root.join("public/a/b.txt");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");

        let leftovers = fs::read_dir(root.join("public/a")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_reports_destination() {
        let (_dir, root) = tmp_root();
        // a file where a directory is expected
        fs::write(root.join("blocker"), "x").unwrap();

        let err = write_atomic(&root.join("blocker/out.txt"), "data").unwrap_err();
        assert!(matches!(err, TaskError::DestinationWrite { .. }));
        assert!(!err.is_recoverable());
    }
}
