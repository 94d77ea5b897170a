use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use etl_config::shared::SchedulerConfig;
use metrics::{counter, gauge};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::metrics::{
    ETL_SCHEDULER_OUTSTANDING_TASKS, ETL_SCHEDULER_REJECTED_TOTAL, SCHEDULER_LABEL,
};
use crate::schedule::task::{Task, catch_task_panic};

/// A submitted task paired with the channel its result is published on.
struct TaskWrapper {
    task: Box<dyn Task>,
    result_tx: oneshot::Sender<EtlResult<()>>,
}

/// Receiver for the result of a single submission to a [`TaskScheduler`].
#[derive(Debug)]
pub struct TaskResultRx {
    rx: oneshot::Receiver<EtlResult<()>>,
}

impl TaskResultRx {
    /// Waits for the task to complete and returns its result.
    ///
    /// Resolves to [`ErrorKind::SchedulerClosed`] if the scheduler stopped before the task ran.
    pub async fn recv(self) -> EtlResult<()> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(closed_error()),
        }
    }
}

fn closed_error() -> EtlError {
    etl_error!(ErrorKind::SchedulerClosed, "Task scheduler is closed")
}

/// Fixed-size worker pool executing [`Task`]s from a bounded queue.
///
/// Each accepted submission produces a [`TaskResultRx`]. The scheduler runs until
/// [`TaskScheduler::stop`] is called or the parent cancellation token fires. A task that has been
/// dequeued by a worker always runs to completion, tasks still queued when the scheduler stops
/// resolve with [`ErrorKind::SchedulerClosed`].
#[derive(Debug)]
pub struct TaskScheduler {
    tx: mpsc::Sender<TaskWrapper>,
    rx: Arc<Mutex<mpsc::Receiver<TaskWrapper>>>,
    workers: Mutex<JoinSet<()>>,
    outstanding: Arc<AtomicUsize>,
    stopped: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for TaskWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskWrapper").finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Starts `config.num_workers` workers whose lifetime is bound to a child of `cancel`.
    pub fn new(config: &SchedulerConfig, cancel: &CancellationToken) -> EtlResult<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let cancel = cancel.child_token();

        let mut workers = JoinSet::new();
        for worker_id in 0..config.num_workers {
            workers.spawn(run_worker(
                worker_id,
                rx.clone(),
                outstanding.clone(),
                cancel.clone(),
            ));
        }

        debug!(
            num_workers = config.num_workers,
            queue_capacity = config.queue_capacity(),
            "task scheduler started"
        );

        Ok(Self {
            tx,
            rx,
            workers: Mutex::new(workers),
            outstanding,
            stopped: AtomicBool::new(false),
            cancel,
        })
    }

    /// Submits a task, waiting for queue space if needed.
    ///
    /// Fails with [`ErrorKind::SchedulerClosed`] once the scheduler is stopped or its cancellation
    /// token fires before the task could be enqueued.
    pub async fn push<T>(&self, task: T) -> EtlResult<TaskResultRx>
    where
        T: Task + 'static,
    {
        if self.stopped.load(Ordering::Acquire) || self.cancel.is_cancelled() {
            return Err(self.reject());
        }

        let permit = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return Err(self.reject()),
            permit = self.tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => return Err(self.reject()),
            },
        };

        let (result_tx, rx) = oneshot::channel();
        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        permit.send(TaskWrapper {
            task: Box::new(task),
            result_tx,
        });

        gauge!(ETL_SCHEDULER_OUTSTANDING_TASKS, SCHEDULER_LABEL => "task")
            .set(outstanding as f64);

        Ok(TaskResultRx { rx })
    }

    /// Returns the number of accepted tasks whose result has not been published yet.
    pub fn size(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Stops the workers and waits for them to exit.
    ///
    /// Only the first call has an effect. Tasks left in the queue resolve with
    /// [`ErrorKind::SchedulerClosed`].
    pub async fn stop(&self) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.cancel.cancel();

        let mut workers = self.workers.lock().await;
        while let Some(result) = workers.join_next().await {
            if let Err(err) = result
                && !err.is_cancelled()
            {
                error!(error = %err, "task scheduler worker terminated abnormally");
            }
        }

        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok(wrapper) = rx.try_recv() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            let _ = wrapper.result_tx.send(Err(closed_error()));
        }

        debug!("task scheduler stopped");
    }

    fn reject(&self) -> EtlError {
        counter!(ETL_SCHEDULER_REJECTED_TOTAL, SCHEDULER_LABEL => "task").increment(1);
        closed_error()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<TaskWrapper>>>,
    outstanding: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let wrapper = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => None,
                wrapper = rx.recv() => wrapper,
            }
        };

        let Some(wrapper) = wrapper else {
            break;
        };

        let result = catch_task_panic(wrapper.task.run()).await;

        let outstanding = outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(ETL_SCHEDULER_OUTSTANDING_TASKS, SCHEDULER_LABEL => "task")
            .set(outstanding as f64);

        // The caller may have dropped its receiver.
        let _ = wrapper.result_tx.send(result);
    }

    debug!(worker_id, "task scheduler worker exited");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::{Barrier, Notify};

    use super::*;
    use crate::schedule::task::task_fn;

    fn scheduler(num_workers: usize, chan_size: usize) -> TaskScheduler {
        TaskScheduler::new(
            &SchedulerConfig::new(num_workers, chan_size),
            &CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_each_task_result() {
        let scheduler = scheduler(2, 4);

        let ok = scheduler.push(task_fn(|| async { Ok(()) })).await.unwrap();
        let failed = scheduler
            .push(task_fn(|| async {
                Err(etl_error!(ErrorKind::TaskFailed, "Task failed"))
            }))
            .await
            .unwrap();

        assert!(ok.recv().await.is_ok());
        assert_eq!(failed.recv().await.unwrap_err().kind(), ErrorKind::TaskFailed);
        assert_eq!(scheduler.size(), 0);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn runs_tasks_in_parallel() {
        let scheduler = scheduler(3, 0);
        // Every task blocks until all three run at the same time.
        let barrier = Arc::new(Barrier::new(3));

        let mut receivers = Vec::new();
        for _ in 0..3 {
            let barrier = barrier.clone();
            receivers.push(
                scheduler
                    .push(task_fn(move || {
                        let barrier = barrier.clone();
                        async move {
                            barrier.wait().await;
                            Ok(())
                        }
                    }))
                    .await
                    .unwrap(),
            );
        }

        for rx in receivers {
            rx.recv().await.unwrap();
        }
        assert_eq!(scheduler.size(), 0);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn push_after_stop_is_rejected() {
        let scheduler = scheduler(1, 1);
        scheduler.stop().await;

        let err = scheduler
            .push(task_fn(|| async { Ok(()) }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchedulerClosed);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let scheduler = scheduler(2, 2);

        scheduler.stop().await;
        scheduler.stop().await;

        assert_eq!(scheduler.size(), 0);
    }

    #[tokio::test]
    async fn parent_cancellation_rejects_push() {
        let parent = CancellationToken::new();
        let scheduler = TaskScheduler::new(&SchedulerConfig::new(1, 1), &parent).unwrap();

        parent.cancel();

        let err = scheduler
            .push(task_fn(|| async { Ok(()) }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchedulerClosed);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn running_task_completes_and_queued_task_is_closed_on_stop() {
        let scheduler = Arc::new(scheduler(1, 4));
        let release = Arc::new(Notify::new());
        let running = Arc::new(Notify::new());

        let first = {
            let release = release.clone();
            let running = running.clone();
            scheduler
                .push(task_fn(move || {
                    let release = release.clone();
                    let running = running.clone();
                    async move {
                        running.notify_one();
                        release.notified().await;
                        Ok(())
                    }
                }))
                .await
                .unwrap()
        };
        let second = scheduler.push(task_fn(|| async { Ok(()) })).await.unwrap();

        running.notified().await;

        let stopping = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        release.notify_one();
        stopping.await.unwrap();

        assert!(first.recv().await.is_ok());
        assert_eq!(second.recv().await.unwrap_err().kind(), ErrorKind::SchedulerClosed);
        assert_eq!(scheduler.size(), 0);
    }

    #[tokio::test]
    async fn panicking_task_reports_worker_panic() {
        let scheduler = scheduler(1, 1);

        let rx = scheduler
            .push(task_fn(|| async {
                if true {
                    panic!("boom");
                }
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap_err().kind(), ErrorKind::WorkerPanic);

        // The worker survives the panic.
        let rx = scheduler.push(task_fn(|| async { Ok(()) })).await.unwrap();
        assert!(rx.recv().await.is_ok());

        scheduler.stop().await;
    }
}
