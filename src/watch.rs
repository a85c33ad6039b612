//! Watch mode re-runs a task whenever one of its sources changes.
//!
//! 1. **Registration**: every binding glob is split into a static root,
//!    which is watched recursively, and an absolute pattern, which filters
//!    the debounced events. Nested roots are collapsed into one watch.
//! 2. **Workers**: each binding owns a worker that runs the bound task on
//!    the blocking pool. A change that arrives while the task is running
//!    leaves a single pending wakeup behind, so bursts coalesce into one
//!    follow-up run and an in-flight run is never interrupted.
//! 3. **Shutdown**: cancelling the token stops the event loop, after which
//!    the workers finish their current run and exit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::SourceSet;
use crate::core::TaskName;
use crate::error::{PipelineError, WatchError};
use crate::task::Report;

/// Something that can run a task by name, called from the blocking pool.
pub trait TaskRunner: Send + Sync + 'static {
    fn run_task(&self, task: TaskName) -> Result<Report, PipelineError>;
}

/// A task together with the sources that trigger it.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pub task: TaskName,
    pub sources: SourceSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Resolving globs and registering watches.
    Initializing,
    /// Every watch is registered and events are being dispatched.
    Running,
}

pub struct WatchDispatcher {
    runner: Arc<dyn TaskRunner>,
    bindings: Vec<WatchBinding>,
    debounce: Duration,
    state: watch::Sender<DispatcherState>,
}

/// A binding after registration, with the wakeup its worker waits on.
struct Armed {
    task: TaskName,
    filters: Vec<Pattern>,
    notify: Arc<Notify>,
}

impl WatchDispatcher {
    pub fn new(
        runner: Arc<dyn TaskRunner>,
        bindings: Vec<WatchBinding>,
        debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(DispatcherState::Initializing);

        Self {
            runner,
            bindings,
            debounce,
            state,
        }
    }

    /// Observes the state, use it to wait for readiness.
    pub fn subscribe(&self) -> watch::Receiver<DispatcherState> {
        self.state.subscribe()
    }

    /// Registers the watches and dispatches events until `token` is
    /// cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<(), WatchError> {
        let mut roots = HashSet::new();
        let mut armed = Vec::new();

        for binding in &self.bindings {
            let sources = &binding.sources;
            let mut filters = Vec::new();

            for (pattern, glob) in sources.patterns.iter().zip(sources.globs()) {
                match resolve_watch_path(&sources.base, pattern) {
                    Ok((root, filter)) => {
                        if !has_matches(&glob) {
                            tracing::warn!("{}: '{glob}' matches no files yet", binding.task);
                        }
                        roots.insert(root);
                        filters.push(filter);
                    }
                    Err(reason) => {
                        let e = WatchError::Registration { glob, reason };
                        tracing::warn!("{}: {e}", binding.task);
                    }
                }
            }

            if !filters.is_empty() {
                armed.push(Armed {
                    task: binding.task,
                    filters,
                    notify: Arc::new(Notify::new()),
                });
            }
        }

        if armed.is_empty() {
            return Err(WatchError::NothingToWatch);
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(self.debounce, None, move |res: DebounceEventResult| {
            // the receiver is gone once the dispatcher stops
            let _ = tx.send(res);
        })?;

        let mut watched = 0;
        for root in collapse_watch_paths(roots) {
            match debouncer.watch(&root, RecursiveMode::Recursive) {
                Ok(()) => {
                    tracing::info!("watching {root}");
                    watched += 1;
                }
                Err(e) => tracing::warn!("failed to watch {root}: {e}"),
            }
        }

        if watched == 0 {
            return Err(WatchError::NothingToWatch);
        }

        let mut workers = JoinSet::new();
        for binding in &armed {
            workers.spawn(worker(
                binding.task,
                self.runner.clone(),
                binding.notify.clone(),
                token.clone(),
            ));
        }

        self.state.send_replace(DispatcherState::Running);
        tracing::info!("watching for changes...");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(Ok(events)) => {
                        let paths = events
                            .iter()
                            .filter(|de| is_content_change(&de.event.kind))
                            .flat_map(|de| de.event.paths.iter());

                        for binding in dirty(&armed, paths) {
                            tracing::info!("change detected, scheduling {}", binding.task);
                            binding.notify.notify_one();
                        }
                    }
                    Some(Err(errors)) => {
                        for e in errors {
                            tracing::error!("watch error: {e}");
                        }
                    }
                    None => break,
                },
            }
        }

        drop(debouncer);
        token.cancel();

        while workers.join_next().await.is_some() {}
        tracing::info!("watcher stopped");

        Ok(())
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Bindings with at least one filter matching one of `paths`.
fn dirty<'a, 'p>(
    armed: &'a [Armed],
    paths: impl Iterator<Item = &'p std::path::PathBuf>,
) -> Vec<&'a Armed> {
    let mut hit = vec![false; armed.len()];

    for path in paths {
        for (i, binding) in armed.iter().enumerate() {
            if binding.filters.iter().any(|f| f.matches_path(path)) {
                hit[i] = true;
            }
        }
    }

    armed
        .iter()
        .zip(hit)
        .filter_map(|(binding, hit)| hit.then_some(binding))
        .collect()
}

async fn worker(
    task: TaskName,
    runner: Arc<dyn TaskRunner>,
    notify: Arc<Notify>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = notify.notified() => {}
        }

        let runner = runner.clone();
        match tokio::task::spawn_blocking(move || runner.run_task(task)).await {
            Ok(Ok(report)) => tracing::debug!("{report}"),
            Ok(Err(e)) => tracing::error!("{e}"),
            Err(e) => tracing::error!("task '{task}' did not run to completion: {e}"),
        }
    }
}

fn has_matches(glob: &str) -> bool {
    glob::glob(glob).is_ok_and(|mut paths| paths.next().is_some())
}

/// Splits `pattern`, relative to `base`, into a canonicalized static root
/// path (for watching) and a compiled absolute Pattern (for matching).
///
/// Only `pattern` may hold wildcards, `base` is taken literally.
pub fn resolve_watch_path(
    base: &Utf8Path,
    pattern: impl AsRef<str>,
) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(pattern.as_ref());

    // static root and the suffix starting at the first wildcard
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let static_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let root_part = match static_part.as_str() {
        "" => base.to_path_buf(),
        _ => base.join(static_part),
    };
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is matched exactly but watched through its parent, so
    // replace-by-rename writes are still seen.
    let (watch_root, match_pattern) = if suffix_part.as_str().is_empty() && absolute_root.is_file()
    {
        let parent = absolute_root
            .parent()
            .unwrap_or(&absolute_root)
            .to_path_buf();
        let pattern = Pattern::escape(absolute_root.as_str());
        (parent, pattern)
    } else if suffix_part.as_str().is_empty() {
        let pattern = Pattern::escape(absolute_root.as_str());
        (absolute_root, pattern)
    } else {
        let pattern = format!("{}/{}", Pattern::escape(absolute_root.as_str()), suffix_part);
        (absolute_root, pattern)
    };

    Ok((watch_root, Pattern::new(&match_pattern)?))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
