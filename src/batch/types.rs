use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{BatchError, Result};

/// Batch execution configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of items handed to a single job invocation
    pub batch_size: usize,
    /// Number of batches in flight at once
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            workers: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a configuration with explicit sizes
    pub fn new(batch_size: usize, workers: usize) -> Self {
        Self { batch_size, workers }
    }

    /// Parse a configuration from JSON, filling missing fields with defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BatchError::InvalidConfig(format!("malformed batch config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject sizes that would make the run loop meaningless
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(BatchError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(BatchError::InvalidConfig(
                "workers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A contiguous window over the input, handed to one job invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Batch {
    /// Position of the batch in the run
    pub index: usize,
    /// Offset of the first item in the input
    pub offset: usize,
    /// First item index, clamped to the input length
    pub start: usize,
    /// One past the last item index, clamped to the input length
    pub end: usize,
    /// Fraction of the input covered once this batch is done
    pub progress: f64,
}

impl Batch {
    /// Item range as a slice index
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Number of items in the batch
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the batch carries no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Partitioning of an input of known length into batches.
///
/// The batch count is `len / batch_size + 1`, so a run always ends with a
/// trailing batch. That batch is empty when `len` is a multiple of
/// `batch_size`, and it is the only batch when `len` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    len: usize,
    batch_size: usize,
    batch_count: usize,
}

impl BatchPlan {
    /// Plan a run over `len` items. `batch_size` must be non-zero.
    pub fn new(len: usize, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(BatchError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            len,
            batch_size,
            batch_count: len / batch_size + 1,
        })
    }

    /// Number of input items
    pub fn item_count(&self) -> usize {
        self.len
    }

    /// Items per batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches, including the trailing one
    pub fn batch_count(&self) -> usize {
        self.batch_count
    }

    /// Describe batch `index`
    pub fn batch(&self, index: usize) -> Batch {
        let offset = index.saturating_mul(self.batch_size);
        let end = offset.saturating_add(self.batch_size);
        let start = offset.min(self.len);
        let progress = if self.len == 0 {
            1.0
        } else {
            self.len.min(end) as f64 / self.len as f64
        };

        Batch {
            index,
            offset,
            start,
            end: end.min(self.len),
            progress,
        }
    }

    /// Worker groups: consecutive index ranges of at most `workers` batches
    pub fn groups(&self, workers: usize) -> WorkerGroups {
        WorkerGroups {
            cursor: 0,
            step: workers.max(1),
            batch_count: self.batch_count,
        }
    }
}

/// Iterator over the worker groups of a [`BatchPlan`]
#[derive(Debug, Clone)]
pub struct WorkerGroups {
    cursor: usize,
    step: usize,
    batch_count: usize,
}

impl Iterator for WorkerGroups {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.batch_count {
            return None;
        }
        let start = self.cursor;
        let end = start.saturating_add(self.step).min(self.batch_count);
        self.cursor = end;
        Some(start..end)
    }
}
