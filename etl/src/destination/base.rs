use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{EtlError, EtlResult};
use crate::schedule::retry::RetryJudger;

/// Classifies batch write failures for a destination.
///
/// Besides deciding whether a failed write may be retried, a judger can ask for a failed batch
/// to be written again one record at a time, typically when a single bad record rejects the
/// whole batch.
pub trait BatchJudger: RetryJudger {
    /// Returns `true` if the batch that failed with `err` should be retried record by record.
    fn should_one_by_one(&self, err: &EtlError) -> bool;
}

/// Destination-side operation invoked for every flushed batch.
///
/// Implementations decide how a batch is executed, for example in a single transaction or as
/// independent statements.
pub trait BatchExecer<R>: Send + Sync {
    /// Writes `records` to the destination.
    fn batch_exec(&self, records: &[R]) -> impl Future<Output = EtlResult<()>> + Send;

    /// Returns the judger classifying failures of this destination, if it has one.
    ///
    /// Without a judger failed batches are neither retried nor split.
    fn judger(&self) -> Option<Arc<dyn BatchJudger>> {
        None
    }
}

/// A write task able to persist batches of records.
///
/// The identifiers are only used for diagnostics.
pub trait BatchWriter<R>: Send + Sync {
    fn job_id(&self) -> u64;

    fn task_group_id(&self) -> u64;

    fn task_id(&self) -> u64;

    /// Maximum number of records per batch.
    fn batch_size(&self) -> usize;

    /// Maximum time a partial batch waits before being flushed.
    fn batch_timeout(&self) -> Duration;

    /// Writes one batch. Blocking work must stop promptly once `cancel` fires.
    fn batch_write(
        &self,
        cancel: &CancellationToken,
        records: &[R],
    ) -> impl Future<Output = EtlResult<()>> + Send;
}

/// Identifies a write task in logs, metrics and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteTaskId {
    pub job_id: u64,
    pub task_group_id: u64,
    pub task_id: u64,
}

impl WriteTaskId {
    pub fn new(job_id: u64, task_group_id: u64, task_id: u64) -> Self {
        Self {
            job_id,
            task_group_id,
            task_id,
        }
    }
}

impl fmt::Display for WriteTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "job_id={} task_group_id={} task_id={}",
            self.job_id, self.task_group_id, self.task_id
        )
    }
}
