use std::fmt;
use std::time::{Duration, Instant};

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::core::TaskName;
use crate::error::TaskError;
use crate::io::{PROGRESS_STYLE, SourceFile, as_overhead};

/// What happened to a single source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A fresh output was produced and written.
    Written,
    /// The output came from the image cache.
    Cached,
}

/// Summary of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub task: TaskName,
    pub written: usize,
    pub cached: usize,
    /// Files skipped because of read or transform errors.
    pub skipped: usize,
    pub elapsed: Duration,
}

impl Report {
    pub(crate) fn new(task: TaskName) -> Self {
        Self {
            task,
            written: 0,
            cached: 0,
            skipped: 0,
            elapsed: Duration::ZERO,
        }
    }

    fn record(mut self, outcome: Outcome) -> Self {
        match outcome {
            Outcome::Written => self.written += 1,
            Outcome::Cached => self.cached += 1,
        }
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.written += other.written;
        self.cached += other.cached;
        self.skipped += other.skipped;
        self
    }

    /// Number of source files that ended up with an output.
    pub fn produced(&self) -> usize {
        self.written + self.cached
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} written, {} cached, {} skipped",
            self.task, self.written, self.cached, self.skipped
        )
    }
}

/// Runs `process` over every file in parallel.
///
/// Recoverable errors are logged and counted as skipped, the batch keeps
/// going. The first fatal error ends the run and is returned.
pub(crate) fn run_batch<F>(
    task: TaskName,
    files: &[SourceFile],
    process: F,
) -> Result<Report, TaskError>
where
    F: Fn(&SourceFile) -> Result<Outcome, TaskError> + Sync,
{
    let s = Instant::now();

    let span = tracing::info_span!("task", name = %task);
    span.pb_set_style(&PROGRESS_STYLE);
    span.pb_set_length(files.len() as u64);
    span.pb_set_message(task.as_str());
    let _enter = span.enter();

    let mut report = files
        .par_iter()
        .try_fold(
            || Report::new(task),
            |acc, file| -> Result<_, TaskError> {
                let result = process(file);
                span.pb_inc(1);

                match result {
                    Ok(outcome) => Ok(acc.record(outcome)),
                    Err(e) if e.is_recoverable() => {
                        tracing::warn!("{task}: skipping {}\n{e}", file.rel);
                        Ok(Report {
                            skipped: acc.skipped + 1,
                            ..acc
                        })
                    }
                    Err(e) => Err(e),
                }
            },
        )
        .try_reduce(|| Report::new(task), |a, b| Ok(a.merge(b)))?;

    report.elapsed = s.elapsed();
    tracing::info!("{report} {}", as_overhead(s));

    Ok(report)
}
