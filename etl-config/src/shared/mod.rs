//! Shared configuration types for the ETL runtime.

mod base;
mod batch;
mod retry;
mod scheduler;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use retry::RetryConfig;
pub use scheduler::SchedulerConfig;
