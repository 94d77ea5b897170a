use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Sizing of a worker pool and its queues.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Number of workers executing tasks in parallel.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Capacity of the submission queues. `0` selects [`SchedulerConfig::DEFAULT_CHAN_SIZE`].
    #[serde(default)]
    pub chan_size: usize,
}

impl SchedulerConfig {
    /// Default number of workers.
    pub const DEFAULT_NUM_WORKERS: usize = 4;

    /// Queue capacity used when `chan_size` is zero.
    pub const DEFAULT_CHAN_SIZE: usize = 8;

    /// Creates a configuration with `num_workers` workers and `chan_size` queue slots.
    pub fn new(num_workers: usize, chan_size: usize) -> Self {
        Self {
            num_workers,
            chan_size,
        }
    }

    /// Returns the effective queue capacity.
    pub fn queue_capacity(&self) -> usize {
        if self.chan_size == 0 {
            Self::DEFAULT_CHAN_SIZE
        } else {
            self.chan_size
        }
    }

    /// Ensures at least one worker is configured.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.num_workers == 0 {
            return Err(ValidationError::invalid(
                "scheduler.num_workers",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(default_num_workers(), 0)
    }
}

fn default_num_workers() -> usize {
    SchedulerConfig::DEFAULT_NUM_WORKERS
}
