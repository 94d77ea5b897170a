use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{RetryConfig, ValidationError};

/// Batching configuration for a write task.
///
/// Records are flushed to the destination once `batch_size` of them have accumulated, or once
/// `batch_timeout_ms` elapses with a partial batch pending.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of records written in one batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum time, in milliseconds, a partial batch waits before being flushed.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
    /// Whether failures of individual records during the one-by-one fallback are swallowed.
    #[serde(default)]
    pub ignore_one_by_one_error: bool,
    /// Retry strategy applied to batch and per-record writes. No retries when absent.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl BatchConfig {
    /// Default number of records per batch.
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    /// Default partial batch timeout in milliseconds.
    pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 1000;

    /// Returns the batch timeout as a [`Duration`].
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Validates the batch settings and the nested retry strategy.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::invalid(
                "batch.batch_size",
                "must be greater than 0",
            ));
        }

        if self.batch_timeout_ms == 0 {
            return Err(ValidationError::invalid(
                "batch.batch_timeout_ms",
                "must be greater than 0",
            ));
        }

        if let Some(retry) = &self.retry {
            retry.validate()?;
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            ignore_one_by_one_error: false,
            retry: None,
        }
    }
}

fn default_batch_size() -> usize {
    BatchConfig::DEFAULT_BATCH_SIZE
}

fn default_batch_timeout_ms() -> u64 {
    BatchConfig::DEFAULT_BATCH_TIMEOUT_MS
}
