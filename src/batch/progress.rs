//! Progress reporting for batch runs
//!
//! The runner never writes to a global console. It hands typed events to a
//! [`ProgressReporter`], and the default [`TracingReporter`] turns them into
//! structured `tracing` events. Reporters return nothing, so a sink can never
//! change what a run returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info};

/// Emitted once before the first batch is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStart {
    /// Run title
    pub title: String,
    /// Number of input items
    pub item_count: usize,
    /// Number of batches, including the trailing one
    pub batch_count: usize,
}

impl RunStart {
    /// Label naming the run, e.g. `"sync job (10 items -> 4 batches)"`
    pub fn label(&self) -> String {
        format!(
            "{} job ({} items -> {} batches)",
            self.title, self.item_count, self.batch_count
        )
    }
}

/// Emitted right before a batch's job is invoked
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// Run title
    pub title: String,
    /// Index of the batch about to run
    pub batch_index: usize,
    /// Number of batches in the run
    pub batch_count: usize,
    /// Offset of the batch's first item
    pub offset: usize,
    /// Number of items in the batch
    pub batch_len: usize,
    /// Fraction of the input covered once this batch is done, in `[0, 1]`
    pub ratio: f64,
}

impl BatchProgress {
    /// Progress as a percentage
    pub fn percent(&self) -> f64 {
        self.ratio * 100.0
    }
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.2}%", self.title, self.percent())
    }
}

/// Emitted once after the last group settled successfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Run title
    pub title: String,
    /// Number of input items
    pub item_count: usize,
    /// Number of batches processed
    pub batch_count: usize,
    /// Number of merged results
    pub result_count: usize,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

/// Emitted once when a job failure aborts the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    /// Run title
    pub title: String,
    /// Index of the failing batch
    pub batch_index: usize,
    /// Wall time until the failure surfaced
    pub elapsed: Duration,
    /// Rendered job error
    pub error: String,
}

/// Any reporter event, for sinks that prefer a single entry point
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Run started
    Started(RunStart),
    /// Batch about to run
    Batch(BatchProgress),
    /// Run completed
    Finished(RunSummary),
    /// Run aborted by a job failure
    Failed(RunFailure),
}

/// Sink for run progress and timing
pub trait ProgressReporter: Send + Sync {
    /// Called once before the first batch
    fn on_start(&self, _start: &RunStart) {}

    /// Called right before each job invocation, in batch order
    fn on_batch(&self, _progress: &BatchProgress) {}

    /// Called once after the last group settled
    fn on_finish(&self, _summary: &RunSummary) {}

    /// Called once when a job failure aborts the run
    fn on_failure(&self, _failure: &RunFailure) {}
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for Arc<R> {
    fn on_start(&self, start: &RunStart) {
        (**self).on_start(start)
    }

    fn on_batch(&self, progress: &BatchProgress) {
        (**self).on_batch(progress)
    }

    fn on_finish(&self, summary: &RunSummary) {
        (**self).on_finish(summary)
    }

    fn on_failure(&self, failure: &RunFailure) {
        (**self).on_failure(failure)
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {}

/// Writes events through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_start(&self, start: &RunStart) {
        info!(
            title = %start.title,
            item_count = start.item_count,
            batch_count = start.batch_count,
            "{} started",
            start.label()
        );
    }

    fn on_batch(&self, progress: &BatchProgress) {
        info!(
            batch_index = progress.batch_index,
            offset = progress.offset,
            batch_len = progress.batch_len,
            "{}",
            progress
        );
    }

    fn on_finish(&self, summary: &RunSummary) {
        info!(
            title = %summary.title,
            result_count = summary.result_count,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "{} job ({} items -> {} batches): {:?}",
            summary.title,
            summary.item_count,
            summary.batch_count,
            summary.elapsed
        );
    }

    fn on_failure(&self, failure: &RunFailure) {
        error!(
            title = %failure.title,
            batch_index = failure.batch_index,
            elapsed_ms = failure.elapsed.as_millis() as u64,
            error = %failure.error,
            "Batch job failed"
        );
    }
}

/// Forwards every event to a closure
pub struct FnReporter<F> {
    callback: F,
}

impl<F> FnReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    /// Wrap a callback
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> fmt::Debug for FnReporter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnReporter").finish_non_exhaustive()
    }
}

impl<F> ProgressReporter for FnReporter<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_start(&self, start: &RunStart) {
        (self.callback)(ProgressEvent::Started(start.clone()))
    }

    fn on_batch(&self, progress: &BatchProgress) {
        (self.callback)(ProgressEvent::Batch(progress.clone()))
    }

    fn on_finish(&self, summary: &RunSummary) {
        (self.callback)(ProgressEvent::Finished(summary.clone()))
    }

    fn on_failure(&self, failure: &RunFailure) {
        (self.callback)(ProgressEvent::Failed(failure.clone()))
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingReporter {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Batch events only, in emission order
    pub fn batches(&self) -> Vec<BatchProgress> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Batch(progress) => Some(progress.clone()),
                _ => None,
            })
            .collect()
    }

    /// The summary of the last successful run, if any
    pub fn summary(&self) -> Option<RunSummary> {
        self.events.lock().iter().rev().find_map(|event| match event {
            ProgressEvent::Finished(summary) => Some(summary.clone()),
            _ => None,
        })
    }

    fn push(&self, event: ProgressEvent) {
        self.events.lock().push(event);
    }
}

impl ProgressReporter for RecordingReporter {
    fn on_start(&self, start: &RunStart) {
        self.push(ProgressEvent::Started(start.clone()));
    }

    fn on_batch(&self, progress: &BatchProgress) {
        self.push(ProgressEvent::Batch(progress.clone()));
    }

    fn on_finish(&self, summary: &RunSummary) {
        self.push(ProgressEvent::Finished(summary.clone()));
    }

    fn on_failure(&self, failure: &RunFailure) {
        self.push(ProgressEvent::Failed(failure.clone()));
    }
}
