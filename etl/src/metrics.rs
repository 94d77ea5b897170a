//! Metric names emitted by the runtime.
//!
//! The runtime records through the `metrics` facade only. Installing a recorder or exporter is
//! left to the embedding binary.

/// Label carrying the job identifier of a write task.
pub const JOB_ID_LABEL: &str = "job_id";

/// Label carrying the task identifier of a write task.
pub const TASK_ID_LABEL: &str = "task_id";

/// Label distinguishing the scheduler kind (`task` or `async`).
pub const SCHEDULER_LABEL: &str = "scheduler";

/// Label for error kind in metrics.
pub const ERROR_KIND_LABEL: &str = "error_kind";

// Scheduler metrics

/// Gauge for tasks accepted by a scheduler and not yet completed.
pub const ETL_SCHEDULER_OUTSTANDING_TASKS: &str = "etl_scheduler_outstanding_tasks";

/// Counter for submissions rejected because the scheduler was closed.
pub const ETL_SCHEDULER_REJECTED_TOTAL: &str = "etl_scheduler_rejected_total";

/// Counter for failures that stopped an async task scheduler.
pub const ETL_SCHEDULER_FAILURES_TOTAL: &str = "etl_scheduler_failures_total";

// Retry metrics

/// Counter for retry attempts scheduled by a retry task.
pub const ETL_RETRY_ATTEMPTS_TOTAL: &str = "etl_retry_attempts_total";

// Batch write metrics

/// Counter for batches flushed to a destination.
pub const ETL_BATCH_FLUSHES_TOTAL: &str = "etl_batch_flushes_total";

/// Counter for records handed to a destination in flushed batches.
pub const ETL_BATCH_RECORDS_TOTAL: &str = "etl_batch_records_total";

/// Counter for batches that fell back to record-by-record writes.
pub const ETL_BATCH_ONE_BY_ONE_FALLBACKS_TOTAL: &str = "etl_batch_one_by_one_fallbacks_total";

/// Counter for individual record failures ignored during the one-by-one fallback.
pub const ETL_BATCH_IGNORED_RECORD_ERRORS_TOTAL: &str = "etl_batch_ignored_record_errors_total";
