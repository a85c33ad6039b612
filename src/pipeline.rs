use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::ImageCache;
use crate::config::{CleanPolicy, Config};
use crate::core::TaskName;
use crate::error::{PipelineError, TaskError, WatchError};
use crate::task::Report;
use crate::tasks::{
    DefaultOptimizer, Format, HtmlSnapshot, HtmlTask, ImageTask, Optimizer, ScriptTask,
    StyleCleanTask, StyleTask, TranscodeTask,
};
use crate::watch::{DispatcherState, TaskRunner, WatchBinding, WatchDispatcher};

/// Owns the configuration and the shared image cache, and runs tasks by
/// name either once or under the watcher.
pub struct Pipeline {
    config: Arc<Config>,
    cache: Arc<ImageCache>,
    optimizer: Arc<dyn Optimizer>,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let cache = match &config.cache_dir {
            Some(dir) => ImageCache::persistent(dir.clone()),
            None => ImageCache::in_memory(),
        };

        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            optimizer: Arc::new(DefaultOptimizer),
        }
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    pub fn with_cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn html(&self) -> Result<Report, TaskError> {
        HtmlTask::new(&self.config).run()
    }

    pub fn style(&self) -> Result<Report, TaskError> {
        StyleTask::new(&self.config).run()
    }

    /// Snapshots the built HTML as it is right now, then cleans against it.
    pub fn clean_style(&self) -> Result<Report, TaskError> {
        let snapshot = HtmlSnapshot::capture(&self.config.dist())?;
        StyleCleanTask::new(&self.config).run(&snapshot)
    }

    pub fn script(&self) -> Result<Report, TaskError> {
        ScriptTask::new(&self.config).run()
    }

    pub fn image(&self) -> Result<Report, TaskError> {
        ImageTask::new(&self.config, self.cache.clone(), self.optimizer.clone()).run()
    }

    pub fn image_webp(&self) -> Result<Report, TaskError> {
        TranscodeTask::new(&self.config, Format::WebP).run()
    }

    pub fn image_avif(&self) -> Result<Report, TaskError> {
        TranscodeTask::new(&self.config, Format::Avif).run()
    }

    /// Runs a single task to completion.
    pub fn run(&self, task: TaskName) -> Result<Report, PipelineError> {
        let result = match task {
            TaskName::Html => self.html(),
            TaskName::Style => self.style(),
            TaskName::CleanStyle => self.clean_style(),
            TaskName::Script => self.script(),
            TaskName::Image => self.image(),
            TaskName::ImageWebp => self.image_webp(),
            TaskName::ImageAvif => self.image_avif(),
        };

        result.map_err(|e| PipelineError::Task(task, e))
    }

    /// Runs a task the way the watcher does, chaining the clean pass after
    /// `html` and `style` when the policy asks for it.
    pub fn run_watched(&self, task: TaskName) -> Result<Report, PipelineError> {
        let report = self.run(task)?;

        if self.config.clean == CleanPolicy::AfterChange
            && matches!(task, TaskName::Html | TaskName::Style)
            && let Err(e) = self.run(TaskName::CleanStyle)
        {
            tracing::error!("{e}");
        }

        Ok(report)
    }

    pub fn bindings(&self) -> Vec<WatchBinding> {
        self.config
            .watch_sources()
            .into_iter()
            .map(|(task, sources)| WatchBinding { task, sources })
            .collect()
    }

    pub fn dispatcher(self: &Arc<Self>) -> WatchDispatcher {
        WatchDispatcher::new(self.clone(), self.bindings(), self.config.debounce)
    }

    async fn spawn(self: &Arc<Self>, task: TaskName) -> Result<Report, PipelineError> {
        let pipeline = self.clone();

        match tokio::task::spawn_blocking(move || pipeline.run(task)).await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Join(task, e)),
        }
    }

    /// `dev`: the watcher alone, until `token` is cancelled.
    pub async fn run_dev(self: Arc<Self>, token: CancellationToken) -> Result<(), PipelineError> {
        self.dispatcher().run(token).await?;
        Ok(())
    }

    /// `default`: the three image tasks and the watcher side by side.
    ///
    /// Returns once the image tasks have finished and every watch is
    /// registered. The watcher keeps going in the background until `token`
    /// is cancelled.
    pub async fn start_default(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<Started, PipelineError> {
        let dispatcher = self.dispatcher();
        let mut state = dispatcher.subscribe();
        let watcher = tokio::spawn(dispatcher.run(token));

        let ready = async {
            state
                .wait_for(|state| *state == DispatcherState::Running)
                .await
                .is_ok()
        };

        let (image, webp, avif, ready) = tokio::join!(
            self.spawn(TaskName::Image),
            self.spawn(TaskName::ImageWebp),
            self.spawn(TaskName::ImageAvif),
            ready,
        );

        let mut summary = Summary::default();
        for (task, result) in [
            (TaskName::Image, image),
            (TaskName::ImageWebp, webp),
            (TaskName::ImageAvif, avif),
        ] {
            match result {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    tracing::error!("{e}");
                    summary.failed.push(task);
                }
            }
        }

        if !ready {
            // the dispatcher gave up before registering anything
            return match watcher.await {
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(())) => Err(WatchError::NothingToWatch.into()),
                Err(e) => Err(PipelineError::Watcher(e)),
            };
        }

        tracing::info!("{summary}");

        Ok(Started { summary, watcher })
    }

    /// [`start_default`](Self::start_default), then wait for the watcher to
    /// stop.
    pub async fn run_default(
        self: Arc<Self>,
        token: CancellationToken,
    ) -> Result<Summary, PipelineError> {
        self.start_default(token).await?.wait().await
    }
}

impl TaskRunner for Pipeline {
    fn run_task(&self, task: TaskName) -> Result<Report, PipelineError> {
        self.run_watched(task)
    }
}

/// Reports of the tasks `default` runs up front.
#[derive(Debug, Default)]
pub struct Summary {
    pub reports: Vec<Report>,
    /// Tasks whose run ended with a fatal error.
    pub failed: Vec<TaskName>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let produced: usize = self.reports.iter().map(Report::produced).sum();
        write!(
            f,
            "initial build complete: {} outputs from {} tasks",
            produced,
            self.reports.len()
        )?;

        if !self.failed.is_empty() {
            let failed: Vec<_> = self.failed.iter().map(TaskName::as_str).collect();
            write!(f, ", failed: {}", failed.join(", "))?;
        }

        Ok(())
    }
}

/// The `default` entry point past its completion signal.
pub struct Started {
    pub summary: Summary,
    watcher: JoinHandle<Result<(), WatchError>>,
}

impl Started {
    /// Waits for the watcher to stop.
    pub async fn wait(self) -> Result<Summary, PipelineError> {
        match self.watcher.await {
            Ok(result) => result?,
            Err(e) => return Err(PipelineError::Watcher(e)),
        }

        Ok(self.summary)
    }
}
