use std::future::Future;

use crate::error::EtlResult;

/// Upstream source of records for a write task.
///
/// The write pipeline calls [`RecordReceiver::fetch`] in a loop from a dedicated producer task.
/// Two error kinds carry special meaning:
///
/// - [`crate::error::ErrorKind::ReceiverEmpty`]: no record is available yet, the producer
///   yields and polls again.
/// - [`crate::error::ErrorKind::ReceiverTerminated`]: the stream ended normally.
///
/// Any other error ends the stream and fails the write task.
pub trait RecordReceiver: Send {
    /// Opaque record type handed to the destination.
    type Record: Send + Sync + 'static;

    /// Returns the next record.
    fn fetch(&mut self) -> impl Future<Output = EtlResult<Self::Record>> + Send;
}
