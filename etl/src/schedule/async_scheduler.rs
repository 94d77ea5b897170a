use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use etl_config::shared::SchedulerConfig;
use metrics::{counter, gauge};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::etl_error;
use crate::metrics::{
    ERROR_KIND_LABEL, ETL_SCHEDULER_FAILURES_TOTAL, ETL_SCHEDULER_OUTSTANDING_TASKS,
    ETL_SCHEDULER_REJECTED_TOTAL, SCHEDULER_LABEL,
};
use crate::schedule::task::{AsyncTask, catch_task_panic};

/// Work handed to the execution workers.
struct ExecItem {
    task: Arc<dyn AsyncTask>,
    result_tx: oneshot::Sender<EtlResult<()>>,
}

/// Slot consumed by the collector, queued in submission order.
struct OrderItem {
    task: Arc<dyn AsyncTask>,
    result_rx: oneshot::Receiver<EtlResult<()>>,
}

/// Receiver of the terminal error of an [`AsyncTaskScheduler`].
#[derive(Debug, Clone)]
pub struct ErrorRx {
    rx: watch::Receiver<Option<EtlError>>,
}

impl ErrorRx {
    /// Waits for the first failure of the scheduler.
    ///
    /// Returns `None` once the scheduler has shut down without failing.
    pub async fn recv(&mut self) -> Option<EtlError> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(err) => (*err).clone(),
            Err(_) => None,
        }
    }

    /// Returns the latched error without waiting.
    pub fn latched(&self) -> Option<EtlError> {
        self.rx.borrow().clone()
    }
}

/// Worker pool that runs [`AsyncTask::run`] in parallel and [`AsyncTask::post`] in submission
/// order.
///
/// Submissions flow through two bounded queues: the execution queue feeding the workers and the
/// order queue feeding a single collector. The collector waits for each task's result in the
/// order tasks were pushed and calls `post` on success. The first error from either step is
/// latched, stops the collector and shuts the scheduler down.
#[derive(Debug)]
pub struct AsyncTaskScheduler {
    exec_tx: mpsc::Sender<ExecItem>,
    order_tx: mpsc::Sender<OrderItem>,
    error_rx: watch::Receiver<Option<EtlError>>,
    handles: Mutex<JoinSet<()>>,
    outstanding: Arc<AtomicUsize>,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ExecItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecItem").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for OrderItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderItem").finish_non_exhaustive()
    }
}

impl AsyncTaskScheduler {
    /// Starts the execution workers and the collector under a child of `cancel`.
    pub fn new(config: &SchedulerConfig, cancel: &CancellationToken) -> EtlResult<Self> {
        config.validate()?;

        let capacity = config.queue_capacity();
        let (exec_tx, exec_rx) = mpsc::channel(capacity);
        let (order_tx, order_rx) = mpsc::channel(capacity);
        let (error_tx, error_rx) = watch::channel(None);
        let exec_rx = Arc::new(Mutex::new(exec_rx));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let cancel = cancel.child_token();

        let mut handles = JoinSet::new();
        for worker_id in 0..config.num_workers {
            handles.spawn(run_exec_worker(worker_id, exec_rx.clone(), cancel.clone()));
        }
        handles.spawn(run_collector(
            order_rx,
            error_tx,
            outstanding.clone(),
            cancel.clone(),
        ));

        debug!(
            num_workers = config.num_workers,
            queue_capacity = capacity,
            "async task scheduler started"
        );

        Ok(Self {
            exec_tx,
            order_tx,
            error_rx,
            handles: Mutex::new(handles),
            outstanding,
            closed: AtomicBool::new(false),
            cancel,
        })
    }

    /// Submits a task.
    ///
    /// The task is accepted only once it holds a slot in both the execution and the order queue.
    /// Waiting for slots races against cancellation and the latched error, either of which makes
    /// the push fail with [`ErrorKind::SchedulerClosed`].
    pub async fn push<T>(&self, task: T) -> EtlResult<()>
    where
        T: AsyncTask + 'static,
    {
        let mut errors = self.error_rx.clone();
        if self.closed.load(Ordering::Acquire)
            || self.cancel.is_cancelled()
            || errors.borrow().is_some()
        {
            return Err(self.reject());
        }

        let (exec_permit, order_permit) = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return Err(self.reject()),
            _ = errors.wait_for(Option::is_some) => return Err(self.reject()),
            permits = async {
                let exec_permit = self.exec_tx.reserve().await.ok()?;
                let order_permit = self.order_tx.reserve().await.ok()?;
                Some((exec_permit, order_permit))
            } => match permits {
                Some(permits) => permits,
                None => return Err(self.reject()),
            },
        };

        let task: Arc<dyn AsyncTask> = Arc::new(task);
        let (result_tx, result_rx) = oneshot::channel();
        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;

        exec_permit.send(ExecItem {
            task: task.clone(),
            result_tx,
        });
        order_permit.send(OrderItem { task, result_rx });

        gauge!(ETL_SCHEDULER_OUTSTANDING_TASKS, SCHEDULER_LABEL => "async")
            .set(outstanding as f64);

        Ok(())
    }

    /// Returns the number of accepted tasks whose result has not been collected yet.
    ///
    /// Results stop being collected once the scheduler fails or is closed. Tasks accepted before
    /// that and never collected stay counted, so the size may remain above zero afterwards.
    pub fn size(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Returns a receiver for the terminal error of this scheduler.
    pub fn errors(&self) -> ErrorRx {
        ErrorRx {
            rx: self.error_rx.clone(),
        }
    }

    /// Cancels the scheduler and waits for the workers and the collector to exit.
    ///
    /// Only the first call has an effect.
    pub async fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.cancel.cancel();

        let mut handles = self.handles.lock().await;
        while let Some(result) = handles.join_next().await {
            if let Err(err) = result
                && !err.is_cancelled()
            {
                error!(error = %err, "async task scheduler task terminated abnormally");
            }
        }

        debug!("async task scheduler closed");
    }

    fn reject(&self) -> EtlError {
        counter!(ETL_SCHEDULER_REJECTED_TOTAL, SCHEDULER_LABEL => "async").increment(1);
        etl_error!(ErrorKind::SchedulerClosed, "Async task scheduler is closed")
    }
}

impl Drop for AsyncTaskScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_exec_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<ExecItem>>>,
    cancel: CancellationToken,
) {
    loop {
        let item = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;

                _ = cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };

        let Some(item) = item else {
            break;
        };

        let result = catch_task_panic(item.task.run()).await;
        // The collector is gone once the scheduler is closed.
        let _ = item.result_tx.send(result);
    }

    debug!(worker_id, "async task scheduler worker exited");
}

async fn run_collector(
    mut order_rx: mpsc::Receiver<OrderItem>,
    error_tx: watch::Sender<Option<EtlError>>,
    outstanding: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            item = order_rx.recv() => item,
        };

        let Some(item) = item else {
            break;
        };

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,
            result = item.result_rx => result.unwrap_or_else(|_| {
                Err(etl_error!(
                    ErrorKind::TaskFailed,
                    "Task result was dropped before completion"
                ))
            }),
        };

        let remaining = outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        gauge!(ETL_SCHEDULER_OUTSTANDING_TASKS, SCHEDULER_LABEL => "async")
            .set(remaining as f64);

        let result = match result {
            Ok(()) => catch_task_panic(item.task.post()).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            error!(error = %err, "async task failed, stopping scheduler");
            counter!(
                ETL_SCHEDULER_FAILURES_TOTAL,
                SCHEDULER_LABEL => "async",
                ERROR_KIND_LABEL => format!("{:?}", err.kind()),
            )
            .increment(1);
            error_tx.send_replace(Some(err));
            cancel.cancel();
            break;
        }
    }

    debug!("async task scheduler collector exited");
}
