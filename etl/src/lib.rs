//! Concurrency runtime for ETL jobs.
//!
//! - [`schedule`]: worker pools, ordered post-processing, retries, shared resources and task
//!   tracking.
//! - [`destination`] and [`source`]: the batched write pipeline between a record source and a
//!   destination.
//! - [`concurrency`]: stream and timer building blocks.

pub mod concurrency;
pub mod destination;
pub mod error;
mod macros;
pub mod metrics;
pub mod schedule;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
