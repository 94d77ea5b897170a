use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry strategy descriptor.
///
/// Serialized as a `type` discriminator next to a nested `strategy` object holding the
/// parameters of that type:
///
/// ```json
/// { "type": "ntimes", "strategy": { "n": 3, "wait_ms": 1000 } }
/// ```
///
/// Unknown types and missing parameters are rejected during deserialization.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "strategy", rename_all = "lowercase")]
pub enum RetryConfig {
    /// Retry at most `n` times, waiting `wait_ms` between attempts.
    NTimes { n: u32, wait_ms: u64 },
    /// Retry without limit, waiting `wait_ms` between attempts.
    Forever { wait_ms: u64 },
    /// Retry with jittered exponential backoff starting at `init_ms`. Retrying stops once the
    /// computed wait reaches `max_ms`.
    Exponential { init_ms: u64, max_ms: u64 },
}

impl RetryConfig {
    /// Validates the strategy parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match *self {
            RetryConfig::NTimes { n, .. } if n == 0 => Err(ValidationError::invalid(
                "retry.strategy.n",
                "must be greater than 0",
            )),
            RetryConfig::Exponential { init_ms, .. } if init_ms == 0 => Err(
                ValidationError::invalid("retry.strategy.init_ms", "must be greater than 0"),
            ),
            RetryConfig::Exponential { init_ms, max_ms } if max_ms <= init_ms => Err(
                ValidationError::invalid("retry.strategy.max_ms", "must be greater than init_ms"),
            ),
            _ => Ok(()),
        }
    }
}
