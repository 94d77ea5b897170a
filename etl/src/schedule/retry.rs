//! Retry policies.
//!
//! A [`RetryStrategy`] decides, after a failed attempt, whether the work should be attempted
//! again and how long to wait first. Strategies other than [`NoneRetryStrategy`] consult a
//! [`RetryJudger`] supplied by the caller, usually the destination, to tell transient failures
//! from fatal ones.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use etl_config::shared::RetryConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;

/// Decides whether an error is worth retrying.
pub trait RetryJudger: Send + Sync {
    /// Returns `true` if the operation that produced `err` may succeed when attempted again.
    fn should_retry(&self, err: &EtlError) -> bool;
}

impl<F> RetryJudger for F
where
    F: Fn(&EtlError) -> bool + Send + Sync,
{
    fn should_retry(&self, err: &EtlError) -> bool {
        self(err)
    }
}

/// Policy deciding whether and when a failed attempt is retried.
pub trait RetryStrategy: fmt::Debug + Send + Sync {
    /// Returns the wait before the next attempt, or `None` to stop retrying.
    ///
    /// `attempt` is the number of attempts made so far, starting at 1 after the first failure.
    fn next(&self, err: &EtlError, attempt: u32) -> Option<Duration>;
}

/// Never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneRetryStrategy;

impl RetryStrategy for NoneRetryStrategy {
    fn next(&self, _err: &EtlError, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Retries up to `n` times with a fixed wait while the judger accepts the error.
pub struct NTimesRetryStrategy {
    judger: Arc<dyn RetryJudger>,
    n: u32,
    wait: Duration,
}

impl NTimesRetryStrategy {
    pub fn new(judger: Arc<dyn RetryJudger>, n: u32, wait: Duration) -> Self {
        Self { judger, n, wait }
    }
}

impl fmt::Debug for NTimesRetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NTimesRetryStrategy")
            .field("n", &self.n)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl RetryStrategy for NTimesRetryStrategy {
    fn next(&self, err: &EtlError, attempt: u32) -> Option<Duration> {
        if attempt > self.n || !self.judger.should_retry(err) {
            return None;
        }

        Some(self.wait)
    }
}

/// Retries without limit with a fixed wait while the judger accepts the error.
pub struct ForeverRetryStrategy {
    judger: Arc<dyn RetryJudger>,
    wait: Duration,
}

impl ForeverRetryStrategy {
    pub fn new(judger: Arc<dyn RetryJudger>, wait: Duration) -> Self {
        Self { judger, wait }
    }
}

impl fmt::Debug for ForeverRetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeverRetryStrategy")
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl RetryStrategy for ForeverRetryStrategy {
    fn next(&self, err: &EtlError, _attempt: u32) -> Option<Duration> {
        self.judger.should_retry(err).then_some(self.wait)
    }
}

/// Retries with jittered exponential backoff while the judger accepts the error.
///
/// The wait before attempt `n + 1` is `x * init * 2^n` with `x` drawn uniformly from `[1, 2)`.
/// Retrying stops as soon as that wait reaches `max`, so `max` bounds the total retry budget
/// rather than clamping individual waits.
pub struct ExponentialRetryStrategy {
    judger: Arc<dyn RetryJudger>,
    init: Duration,
    max: Duration,
    rng: Mutex<StdRng>,
}

impl ExponentialRetryStrategy {
    /// Creates a strategy whose jitter source is seeded once from the OS.
    pub fn new(judger: Arc<dyn RetryJudger>, init: Duration, max: Duration) -> Self {
        Self::with_rng(judger, init, max, StdRng::from_entropy())
    }

    /// Creates a strategy with a deterministic jitter source.
    pub fn with_seed(
        judger: Arc<dyn RetryJudger>,
        init: Duration,
        max: Duration,
        seed: u64,
    ) -> Self {
        Self::with_rng(judger, init, max, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        judger: Arc<dyn RetryJudger>,
        init: Duration,
        max: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            judger,
            init,
            max,
            rng: Mutex::new(rng),
        }
    }

    fn jitter(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        rng.gen_range(1.0..2.0)
    }
}

impl fmt::Debug for ExponentialRetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExponentialRetryStrategy")
            .field("init", &self.init)
            .field("max", &self.max)
            .finish_non_exhaustive()
    }
}

impl RetryStrategy for ExponentialRetryStrategy {
    fn next(&self, err: &EtlError, attempt: u32) -> Option<Duration> {
        if !self.judger.should_retry(err) {
            return None;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let wait_secs = self.jitter() * self.init.as_secs_f64() * 2f64.powi(exponent);
        if !wait_secs.is_finite() || wait_secs >= self.max.as_secs_f64() {
            return None;
        }

        Some(Duration::from_secs_f64(wait_secs))
    }
}

/// Parses a retry descriptor such as `{"type": "ntimes", "strategy": {"n": 3, "wait_ms": 100}}`.
///
/// Unknown strategy types and missing parameters are reported as [`ErrorKind::ConfigError`].
pub fn parse_retry_config(value: &serde_json::Value) -> EtlResult<RetryConfig> {
    let config = RetryConfig::deserialize(value).map_err(|err| {
        etl_error!(
            ErrorKind::ConfigError,
            "Invalid retry strategy descriptor",
            err.to_string(),
            source: err
        )
    })?;
    config.validate()?;

    Ok(config)
}

/// Builds the strategy described by `config`, or [`NoneRetryStrategy`] when it is absent.
pub fn build_retry_strategy(
    judger: Arc<dyn RetryJudger>,
    config: Option<&RetryConfig>,
) -> EtlResult<Arc<dyn RetryStrategy>> {
    let Some(config) = config else {
        return Ok(Arc::new(NoneRetryStrategy));
    };

    config.validate()?;

    let strategy: Arc<dyn RetryStrategy> = match *config {
        RetryConfig::NTimes { n, wait_ms } => Arc::new(NTimesRetryStrategy::new(
            judger,
            n,
            Duration::from_millis(wait_ms),
        )),
        RetryConfig::Forever { wait_ms } => Arc::new(ForeverRetryStrategy::new(
            judger,
            Duration::from_millis(wait_ms),
        )),
        RetryConfig::Exponential { init_ms, max_ms } => Arc::new(ExponentialRetryStrategy::new(
            judger,
            Duration::from_millis(init_ms),
            Duration::from_millis(max_ms),
        )),
    };

    Ok(strategy)
}
