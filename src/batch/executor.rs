//! Batch runner
//!
//! Splits an input slice into fixed-size batches and runs them in worker
//! groups:
//! - every batch of a group is launched together on the calling task
//! - the next group starts only after the whole group settled
//! - results are merged in batch order, whatever order jobs finish in
//! - the first job failure aborts the run without partial results

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{self, FutureExt};
use tracing::{debug, instrument};

use crate::batch::progress::{
    BatchProgress, ProgressReporter, RunFailure, RunStart, RunSummary, TracingReporter,
};
use crate::batch::types::{BatchConfig, BatchPlan};
use crate::{BatchError, Result};

/// Runs a job over an input in batches, with a bounded number of batches in flight
#[derive(Clone)]
pub struct BatchRunner {
    config: BatchConfig,
    reporter: Arc<dyn ProgressReporter>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("config", &self.config)
            .field("reporter", &"ProgressReporter")
            .finish()
    }
}

impl BatchRunner {
    /// Create a runner with default settings, reporting through `tracing`
    pub fn new() -> Self {
        Self::from_config(BatchConfig::default())
    }

    /// Create a runner from an explicit configuration
    pub fn from_config(config: BatchConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Set the number of items per batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size;
        self
    }

    /// Set the number of batches launched per worker group
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Replace the progress sink
    pub fn with_reporter<R>(mut self, reporter: R) -> Self
    where
        R: ProgressReporter + 'static,
    {
        self.reporter = Arc::new(reporter);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run `job` over `items` and return the concatenated batch results.
    ///
    /// The input yields `items.len() / batch_size + 1` batches, so `job` is
    /// also called with a trailing empty slice when the length is a multiple
    /// of the batch size (and exactly once, with an empty slice, for an empty
    /// input). A job result is anything iterable, so an empty collection or a
    /// `None` (for jobs yielding `Option<K>`) contributes nothing to the output.
    #[instrument(skip(self, items, job), fields(item_count = items.len()))]
    pub async fn run<'a, T, R, K, E, F, Fut>(
        &self,
        title: &str,
        items: &'a [T],
        job: F,
    ) -> Result<Vec<K>>
    where
        F: Fn(&'a [T]) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        R: IntoIterator<Item = K>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.config.validate()?;
        let plan = BatchPlan::new(items.len(), self.config.batch_size)?;
        let started = Instant::now();

        self.reporter.on_start(&RunStart {
            title: title.to_string(),
            item_count: plan.item_count(),
            batch_count: plan.batch_count(),
        });

        let mut results = Vec::new();

        for group in plan.groups(self.config.workers) {
            debug!(
                first_batch = group.start,
                last_batch = group.end - 1,
                "Launching worker group"
            );

            let launched: Vec<_> = group
                .map(|index| {
                    let batch = plan.batch(index);
                    self.reporter.on_batch(&BatchProgress {
                        title: title.to_string(),
                        batch_index: index,
                        batch_count: plan.batch_count(),
                        offset: batch.offset,
                        batch_len: batch.len(),
                        ratio: batch.progress,
                    });
                    job(&items[batch.range()]).map(move |outcome| outcome.map_err(|e| (index, e)))
                })
                .collect();

            // Settles in launch order; bails out on the first failure
            let settled = match future::try_join_all(launched).await {
                Ok(settled) => settled,
                Err((batch_index, err)) => {
                    let source: Box<dyn std::error::Error + Send + Sync> = err.into();
                    self.reporter.on_failure(&RunFailure {
                        title: title.to_string(),
                        batch_index,
                        elapsed: started.elapsed(),
                        error: source.to_string(),
                    });
                    return Err(BatchError::JobFailure {
                        title: title.to_string(),
                        batch_index,
                        source,
                    });
                }
            };

            for outcome in settled {
                results.extend(outcome);
            }
        }

        self.reporter.on_finish(&RunSummary {
            title: title.to_string(),
            item_count: plan.item_count(),
            batch_count: plan.batch_count(),
            result_count: results.len(),
            elapsed: started.elapsed(),
        });

        Ok(results)
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `job` over `items` in batches of `batch_size`, `workers` batches at a time.
///
/// Shorthand for a [`BatchRunner`] with the default `tracing` reporter.
pub async fn async_batches<'a, T, R, K, E, F, Fut>(
    title: &str,
    items: &'a [T],
    batch_size: usize,
    workers: usize,
    job: F,
) -> Result<Vec<K>>
where
    F: Fn(&'a [T]) -> Fut,
    Fut: Future<Output = std::result::Result<R, E>>,
    R: IntoIterator<Item = K>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    BatchRunner::new()
        .with_batch_size(batch_size)
        .with_workers(workers)
        .run(title, items, job)
        .await
}
