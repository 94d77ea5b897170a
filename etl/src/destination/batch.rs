use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etl_config::shared::BatchConfig;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::destination::base::{BatchExecer, BatchJudger, BatchWriter, WriteTaskId};
use crate::error::{EtlError, EtlResult};
use crate::metrics::{
    ETL_BATCH_IGNORED_RECORD_ERRORS_TOTAL, ETL_BATCH_ONE_BY_ONE_FALLBACKS_TOTAL, JOB_ID_LABEL,
    TASK_ID_LABEL,
};
use crate::schedule::retry::{RetryJudger, RetryStrategy, build_retry_strategy};
use crate::schedule::retry_task::RetryTask;
use crate::schedule::task::Task;

/// Exposes a [`BatchJudger`] where only its retry decision is needed.
struct BatchRetryJudger(Arc<dyn BatchJudger>);

impl RetryJudger for BatchRetryJudger {
    fn should_retry(&self, err: &EtlError) -> bool {
        self.0.should_retry(err)
    }
}

/// One call of [`BatchExecer::batch_exec`] over a slice of records.
struct ExecTask<'a, R, E> {
    execer: &'a E,
    records: &'a [R],
}

#[async_trait]
impl<R, E> Task for ExecTask<'_, R, E>
where
    R: Send + Sync,
    E: BatchExecer<R>,
{
    async fn run(&self) -> EtlResult<()> {
        self.execer.batch_exec(self.records).await
    }
}

/// [`BatchWriter`] over a [`BatchExecer`].
///
/// A batch is written through a [`RetryTask`] using the retry strategy of the batch
/// configuration. When the execer's judger asks for it, a failed batch is then written again
/// record by record, each record with its own [`RetryTask`]. Failed records either fail the write
/// or are skipped, depending on `ignore_one_by_one_error`.
///
/// An execer without judger never falls back to single records. Its failed batches are still
/// retried by the configured strategy, every error being considered retryable.
pub struct BaseBatchWriter<E, R> {
    id: WriteTaskId,
    execer: E,
    config: BatchConfig,
    strategy: Arc<dyn RetryStrategy>,
    judger: Option<Arc<dyn BatchJudger>>,
    _records: PhantomData<fn(&[R])>,
}

impl<E, R> BaseBatchWriter<E, R>
where
    E: BatchExecer<R>,
    R: Send + Sync,
{
    /// Creates a writer, validating `config` and building its retry strategy.
    ///
    /// Retry decisions go to the execer's judger when it has one. Otherwise any error may be
    /// retried, within the limits of the configured strategy.
    pub fn new(id: WriteTaskId, execer: E, config: BatchConfig) -> EtlResult<Self> {
        config.validate()?;

        let judger = execer.judger();
        let retry_judger: Arc<dyn RetryJudger> = match &judger {
            Some(judger) => Arc::new(BatchRetryJudger(judger.clone())),
            None => Arc::new(|_: &EtlError| true),
        };
        let strategy = build_retry_strategy(retry_judger, config.retry.as_ref())?;

        Ok(Self {
            id,
            execer,
            config,
            strategy,
            judger,
            _records: PhantomData,
        })
    }

    async fn exec_with_retry(&self, cancel: &CancellationToken, records: &[R]) -> EtlResult<()> {
        let task = ExecTask {
            execer: &self.execer,
            records,
        };

        RetryTask::new(cancel, self.strategy.clone(), task).run().await
    }

    async fn write_one_by_one(&self, cancel: &CancellationToken, records: &[R]) -> EtlResult<()> {
        for (index, record) in records.iter().enumerate() {
            let Err(err) = self
                .exec_with_retry(cancel, std::slice::from_ref(record))
                .await
            else {
                continue;
            };

            if !self.config.ignore_one_by_one_error || cancel.is_cancelled() {
                return Err(err);
            }

            warn!(
                job_id = self.id.job_id,
                task_id = self.id.task_id,
                record_index = index,
                error = %err,
                "ignoring failed record write"
            );
            counter!(
                ETL_BATCH_IGNORED_RECORD_ERRORS_TOTAL,
                JOB_ID_LABEL => self.id.job_id.to_string(),
                TASK_ID_LABEL => self.id.task_id.to_string(),
            )
            .increment(1);
        }

        Ok(())
    }
}

impl<E, R> BatchWriter<R> for BaseBatchWriter<E, R>
where
    E: BatchExecer<R>,
    R: Send + Sync,
{
    fn job_id(&self) -> u64 {
        self.id.job_id
    }

    fn task_group_id(&self) -> u64 {
        self.id.task_group_id
    }

    fn task_id(&self) -> u64 {
        self.id.task_id
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn batch_timeout(&self) -> Duration {
        self.config.batch_timeout()
    }

    async fn batch_write(&self, cancel: &CancellationToken, records: &[R]) -> EtlResult<()> {
        let err = match self.exec_with_retry(cancel, records).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let Some(judger) = self.judger.as_ref() else {
            return Err(err);
        };

        if cancel.is_cancelled() || !judger.should_one_by_one(&err) {
            return Err(err);
        }

        warn!(
            job_id = self.id.job_id,
            task_id = self.id.task_id,
            batch_size = records.len(),
            error = %err,
            "batch write failed, writing records one by one"
        );
        counter!(
            ETL_BATCH_ONE_BY_ONE_FALLBACKS_TOTAL,
            JOB_ID_LABEL => self.id.job_id.to_string(),
            TASK_ID_LABEL => self.id.task_id.to_string(),
        )
        .increment(1);

        self.write_one_by_one(cancel, records).await
    }
}

impl<E, R> fmt::Debug for BaseBatchWriter<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseBatchWriter")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}
