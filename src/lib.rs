//! # async-batches
//!
//! Run a large list of work items in fixed-size batches, with a bounded number
//! of batches in flight, and report progress while doing it.
//!
//! ## Quick Start
//!
//! ```rust
//! use async_batches::batch::{BatchRunner, NoopReporter};
//!
//! # async fn example() -> async_batches::Result<()> {
//! let items: Vec<u32> = (1..=10).collect();
//!
//! let doubled = BatchRunner::new()
//!     .with_batch_size(3)
//!     .with_workers(2)
//!     .with_reporter(NoopReporter)
//!     .run("double", &items, |xs| async move {
//!         Ok::<_, String>(xs.iter().map(|x| x * 2).collect::<Vec<_>>())
//!     })
//!     .await?;
//!
//! assert_eq!(doubled, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution model
//!
//! - The input is split into `len / batch_size + 1` batches; the last one is
//!   empty when `len` is a multiple of `batch_size`
//! - Batches are launched in worker groups of `workers`, all polled on the
//!   calling task; a group must settle before the next one starts
//! - Results are concatenated in batch order
//! - The first failing job fails the whole run
//!
//! ## Modules
//!
//! - [`batch`]: batch planning, the runner and progress reporting
//! - [`logging`]: tracing subscriber setup

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

/// Result type for batch runs
pub type Result<T> = std::result::Result<T, BatchError>;

/// Main error type for batch runs
#[derive(Error, Debug)]
pub enum BatchError {
    /// A job invocation failed; the run was aborted
    #[error("{title}: job failed for batch {batch_index}: {source}")]
    JobFailure {
        /// Title of the failed run
        title: String,
        /// Index of the batch whose job failed
        batch_index: usize,
        /// Error returned by the job
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Batch size or worker count is unusable
    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),
}

impl BatchError {
    /// Index of the failing batch, for job failures
    pub fn batch_index(&self) -> Option<usize> {
        match self {
            BatchError::JobFailure { batch_index, .. } => Some(*batch_index),
            BatchError::InvalidConfig(_) => None,
        }
    }
}

/// Batch planning, execution and progress reporting
pub mod batch;

/// Tracing subscriber setup
pub mod logging;

pub use batch::{async_batches, BatchConfig, BatchRunner};
