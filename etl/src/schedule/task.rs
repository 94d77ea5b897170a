use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::error;

use crate::error::{ErrorKind, EtlResult};
use crate::etl_error;

/// A unit of work with a single fallible step.
///
/// Implementations are shared by reference between schedulers, retry loops and callers, so
/// `run` takes `&self` and may be invoked more than once.
#[async_trait]
pub trait Task: Send + Sync {
    /// Performs the work once.
    async fn run(&self) -> EtlResult<()>;
}

/// A unit of work split into a parallel step and an ordered step.
///
/// [`AsyncTask::run`] may execute concurrently with other tasks. [`AsyncTask::post`] is invoked
/// only after `run` succeeded, and only once every task submitted before it has been
/// post-processed.
#[async_trait]
pub trait AsyncTask: Send + Sync {
    /// Performs the order-independent part of the work.
    async fn run(&self) -> EtlResult<()>;

    /// Performs the order-sensitive part of the work.
    async fn post(&self) -> EtlResult<()>;
}

#[async_trait]
impl<T: Task + ?Sized> Task for Arc<T> {
    async fn run(&self) -> EtlResult<()> {
        (**self).run().await
    }
}

#[async_trait]
impl<T: Task + ?Sized> Task for Box<T> {
    async fn run(&self) -> EtlResult<()> {
        (**self).run().await
    }
}

#[async_trait]
impl<T: AsyncTask + ?Sized> AsyncTask for Arc<T> {
    async fn run(&self) -> EtlResult<()> {
        (**self).run().await
    }

    async fn post(&self) -> EtlResult<()> {
        (**self).post().await
    }
}

/// Adapts a closure returning a future into a [`Task`].
pub struct FnTask<F> {
    f: F,
}

impl<F> fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask").finish_non_exhaustive()
    }
}

/// Creates a [`Task`] that calls `f` on every run.
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = EtlResult<()>> + Send + 'static,
{
    FnTask { f }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = EtlResult<()>> + Send + 'static,
{
    async fn run(&self) -> EtlResult<()> {
        (self.f)().await
    }
}

/// Awaits a task future on a worker, turning a panic into an [`ErrorKind::WorkerPanic`] error so
/// the worker stays alive.
pub(crate) async fn catch_task_panic<F>(future: F) -> EtlResult<()>
where
    F: Future<Output = EtlResult<()>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!("task panicked");
            Err(etl_error!(ErrorKind::WorkerPanic, "Task panicked"))
        }
    }
}
