//! Batched writing of records to a destination.
//!
//! [`start_write`] drives a [`RecordReceiver`](crate::source::RecordReceiver) into a
//! [`BatchWriter`]. [`BaseBatchWriter`] is the writer used by destinations that only know how to
//! execute a batch, see [`BatchExecer`].

mod base;
mod batch;
mod write;

pub use base::{BatchExecer, BatchJudger, BatchWriter, WriteTaskId};
pub use batch::BaseBatchWriter;
pub use write::start_write;
