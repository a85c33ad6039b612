use camino::Utf8PathBuf;
use thiserror::Error;

use crate::core::TaskName;

/// Top-level error returned by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration:\n{0}")]
    Config(#[from] ConfigError),

    #[error("Task '{0}':\n{1}")]
    Task(TaskName, TaskError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Task '{0}' did not run to completion:\n{1}")]
    Join(TaskName, tokio::task::JoinError),

    #[error("Watcher did not shut down cleanly:\n{0}")]
    Watcher(tokio::task::JoinError),
}

/// Detected at startup, before any task runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Source root '{0}' does not exist")]
    MissingSourceRoot(Utf8PathBuf),

    #[error("Quality for {0} must be within 1..=100, got {1}")]
    Quality(&'static str, u8),

    #[error("Optimization level must be within 0..=7, got {0}")]
    Level(u8),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while a task processes its files.
///
/// Read and transform errors are isolated to a single file: the batch logs
/// them and moves on. Everything else aborts the current run of the task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Couldn't read source '{path}'.\n{source}")]
    SourceRead {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't process '{path}'.\n{reason}")]
    Transform {
        path: Utf8PathBuf,
        reason: anyhow::Error,
    },

    #[error("Couldn't write '{path}'.\n{source}")]
    DestinationWrite {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),
}

impl TaskError {
    pub(crate) fn read(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::SourceRead {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn transform(
        path: impl Into<Utf8PathBuf>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Transform {
            path: path.into(),
            reason: source.into(),
        }
    }

    pub(crate) fn write(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::DestinationWrite {
            path: path.into(),
            source,
        }
    }

    /// Whether the batch may skip the offending file and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SourceRead { .. } | Self::Transform { .. })
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error("Couldn't register watch for '{glob}'.\n{reason}")]
    Registration {
        glob: String,
        reason: anyhow::Error,
    },

    #[error("No source could be watched")]
    NothingToWatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_kinds() {
        let io = || std::io::Error::other("boom");

        assert!(TaskError::read("a.html", io()).is_recoverable());
        assert!(TaskError::transform("a.html", anyhow::anyhow!("bad")).is_recoverable());
        assert!(!TaskError::write("public/a.html", io()).is_recoverable());
    }

    #[test]
    fn test_task_error_mentions_path() {
        let err = TaskError::transform("src/scripts/app.js", anyhow::anyhow!("unexpected token"));
        let msg = err.to_string();

        assert!(msg.contains("src/scripts/app.js"));
        assert!(msg.contains("unexpected token"));
    }
}
