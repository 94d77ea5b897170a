use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::concurrency::timer::DeferredTimer;
use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::metrics::ETL_RETRY_ATTEMPTS_TOTAL;
use crate::schedule::retry::RetryStrategy;
use crate::schedule::task::Task;

/// Runs a [`Task`] repeatedly under a [`RetryStrategy`].
///
/// Each run stops on the first success, when the strategy declines another attempt, or when the
/// cancellation token fires. On cancellation the error of the last failed attempt is returned,
/// or [`ErrorKind::OperationCanceled`] if the task never failed. Backoff waits race against the
/// token, so cancellation interrupts them immediately.
#[derive(Debug)]
pub struct RetryTask<T> {
    task: T,
    strategy: Arc<dyn RetryStrategy>,
    cancel: CancellationToken,
}

impl<T: Task> RetryTask<T> {
    pub fn new(cancel: &CancellationToken, strategy: Arc<dyn RetryStrategy>, task: T) -> Self {
        Self {
            task,
            strategy,
            cancel: cancel.clone(),
        }
    }

    /// Returns the wrapped task.
    pub fn into_inner(self) -> T {
        self.task
    }

    async fn run_with_retries(&self) -> EtlResult<()> {
        let mut timer = DeferredTimer::new(Duration::ZERO);
        let mut last_error: Option<EtlError> = None;
        let mut attempt: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(last_error.unwrap_or_else(|| {
                    etl_error!(ErrorKind::OperationCanceled, "Retry task was canceled")
                }));
            }

            attempt = attempt.saturating_add(1);
            let err = match self.task.run().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(attempt, "task succeeded after retrying");
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            let Some(wait) = self.strategy.next(&err, attempt) else {
                return Err(err);
            };

            counter!(ETL_RETRY_ATTEMPTS_TOTAL).increment(1);
            warn!(
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "task failed, retrying"
            );

            timer.set_duration(wait);
            timer.start();
            last_error = Some(err);

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {}
                _ = &mut timer => {}
            }
        }
    }
}

#[async_trait]
impl<T: Task> Task for RetryTask<T> {
    async fn run(&self) -> EtlResult<()> {
        self.run_with_retries().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::Instant;

    use super::*;
    use crate::bail;
    use crate::schedule::retry::{
        ForeverRetryStrategy, NTimesRetryStrategy, NoneRetryStrategy, RetryJudger,
    };

    /// Fails its first `failures` runs, then succeeds.
    #[derive(Debug)]
    struct FlakyTask {
        failures: usize,
        runs: AtomicUsize,
    }

    impl FlakyTask {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                runs: AtomicUsize::new(0),
            }
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Task for FlakyTask {
        async fn run(&self) -> EtlResult<()> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.failures {
                bail!(
                    ErrorKind::DestinationWriteFailed,
                    "Write failed",
                    format!("run {run}")
                );
            }

            Ok(())
        }
    }

    fn always() -> Arc<dyn RetryJudger> {
        Arc::new(|_: &EtlError| true)
    }

    #[tokio::test(start_paused = true)]
    async fn success_runs_once() {
        let task = RetryTask::new(
            &CancellationToken::new(),
            Arc::new(NTimesRetryStrategy::new(always(), 3, Duration::from_secs(1))),
            FlakyTask::new(0),
        );

        task.run().await.unwrap();
        assert_eq!(task.into_inner().runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_strategy_returns_last_error() {
        let wait = Duration::from_millis(100);
        let task = RetryTask::new(
            &CancellationToken::new(),
            Arc::new(NTimesRetryStrategy::new(always(), 3, wait)),
            FlakyTask::new(usize::MAX),
        );

        let started = Instant::now();
        let err = task.run().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
        assert_eq!(err.detail(), Some("run 3"));
        assert!(started.elapsed() >= wait * 3);
        assert_eq!(task.into_inner().runs(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let task = RetryTask::new(
            &CancellationToken::new(),
            Arc::new(ForeverRetryStrategy::new(always(), Duration::from_millis(10))),
            FlakyTask::new(2),
        );

        task.run().await.unwrap();
        assert_eq!(task.into_inner().runs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn none_strategy_does_not_retry() {
        let task = RetryTask::new(
            &CancellationToken::new(),
            Arc::new(NoneRetryStrategy),
            FlakyTask::new(1),
        );

        assert!(task.run().await.is_err());
        assert_eq!(task.into_inner().runs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_before_first_run_is_reported() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let task = RetryTask::new(&cancel, Arc::new(NoneRetryStrategy), FlakyTask::new(0));

        let err = task.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCanceled);
        assert_eq!(task.into_inner().runs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_with_previous_error() {
        let cancel = CancellationToken::new();
        let task = Arc::new(RetryTask::new(
            &cancel,
            Arc::new(ForeverRetryStrategy::new(always(), Duration::from_secs(3600))),
            FlakyTask::new(usize::MAX),
        ));

        let handle = {
            let task = task.clone();
            tokio::spawn(async move { task.run().await })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
        assert_eq!(task.task.runs(), 1);
    }
}
