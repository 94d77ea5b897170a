//! Test doubles for the write pipeline.
//!
//! - [`source`] provides record receivers fed from memory or from a channel.
//! - [`destination`] provides a batch execer recording what it was asked to write, with
//!   injectable failures, and a judger giving fixed answers.
//!
//! ```rust,no_run
//! use etl::destination::{BaseBatchWriter, WriteTaskId, start_write};
//! use etl::test_utils::destination::RecordingExecer;
//! use etl::test_utils::source::MemoryRecordReceiver;
//! use etl_config::shared::BatchConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> etl::error::EtlResult<()> {
//! let execer = RecordingExecer::new();
//! let writer = BaseBatchWriter::new(WriteTaskId::new(1, 1, 1), execer.clone(), BatchConfig::default())?;
//!
//! start_write(&CancellationToken::new(), &writer, MemoryRecordReceiver::new(vec![1, 2, 3])).await?;
//! assert_eq!(execer.written(), vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod destination;
pub mod source;
