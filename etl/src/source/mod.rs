//! Record sources feeding the write pipeline.

mod base;

pub use base::RecordReceiver;
