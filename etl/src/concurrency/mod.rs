//! Concurrency primitives shared by the schedulers and the write pipeline.
//!
//! - [`timer`] provides an arm-on-demand timer that can be re-armed in place, used for retry
//!   backoff inside `tokio::select!`.
//! - [`stream`] provides the size and timeout bounded batching adapter used by the write
//!   pipeline consumer.
//!
//! Cancellation is expressed everywhere with [`tokio_util::sync::CancellationToken`]. Components
//! take a token by reference and derive child tokens for scopes they own.

pub mod stream;
pub mod timer;
