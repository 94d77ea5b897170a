//! Work scheduling primitives.
//!
//! - [`task`] defines the [`Task`] and [`AsyncTask`] contracts.
//! - [`scheduler`] runs [`Task`]s on a fixed worker pool, one result receiver per submission.
//! - [`async_scheduler`] runs [`AsyncTask::run`] in parallel and [`AsyncTask::post`] in
//!   submission order, stopping at the first failure.
//! - [`retry`] and [`retry_task`] decide when and how failed tasks are attempted again.
//! - [`resource_map`] shares reference counted resources between callers.
//! - [`task_manager`] tracks keyed tasks across a pending queue and an in-flight set.

pub mod async_scheduler;
pub mod resource_map;
pub mod retry;
pub mod retry_task;
pub mod scheduler;
pub mod task;
pub mod task_manager;

pub use async_scheduler::{AsyncTaskScheduler, ErrorRx};
pub use resource_map::{MappedResource, ResourceMap};
pub use retry::{
    ExponentialRetryStrategy, ForeverRetryStrategy, NTimesRetryStrategy, NoneRetryStrategy,
    RetryJudger, RetryStrategy, build_retry_strategy,
};
pub use retry_task::RetryTask;
pub use scheduler::{TaskResultRx, TaskScheduler};
pub use task::{AsyncTask, FnTask, Task, task_fn};
pub use task_manager::{MappedTask, MappedTaskManager};
