use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::error::{ErrorKind, EtlError, EtlResult};
use crate::{bail, etl_error};
use crate::source::RecordReceiver;

/// Record receiver serving a fixed list of records.
///
/// Once the records are exhausted every fetch fails with [`ErrorKind::ReceiverTerminated`], or
/// with the error given to [`MemoryRecordReceiver::ending_with`].
#[derive(Debug)]
pub struct MemoryRecordReceiver<R> {
    records: VecDeque<R>,
    empty_polls: usize,
    pending_empty_polls: usize,
    end: Option<EtlError>,
}

impl<R> MemoryRecordReceiver<R> {
    pub fn new(records: Vec<R>) -> Self {
        Self {
            records: records.into(),
            empty_polls: 0,
            pending_empty_polls: 0,
            end: None,
        }
    }

    /// Answers `polls` fetches with [`ErrorKind::ReceiverEmpty`] before each record.
    pub fn with_empty_polls(mut self, polls: usize) -> Self {
        self.empty_polls = polls;
        self.pending_empty_polls = polls;
        self
    }

    /// Fails with `err` once the records are exhausted.
    pub fn ending_with(mut self, err: EtlError) -> Self {
        self.end = Some(err);
        self
    }
}

impl<R> RecordReceiver for MemoryRecordReceiver<R>
where
    R: Send + Sync + 'static,
{
    type Record = R;

    async fn fetch(&mut self) -> EtlResult<R> {
        if self.pending_empty_polls > 0 {
            self.pending_empty_polls -= 1;
            bail!(ErrorKind::ReceiverEmpty, "No record available");
        }

        match self.records.pop_front() {
            Some(record) => {
                self.pending_empty_polls = self.empty_polls;
                Ok(record)
            }
            None => Err(self.end.clone().unwrap_or_else(|| {
                etl_error!(ErrorKind::ReceiverTerminated, "Record source exhausted")
            })),
        }
    }
}

/// Record receiver fed by the sending half of a channel.
///
/// Fetches wait for the next record. The source terminates once every sender is dropped.
#[derive(Debug)]
pub struct ChannelRecordReceiver<R> {
    rx: mpsc::Receiver<R>,
}

impl<R> ChannelRecordReceiver<R> {
    /// Creates a receiver together with the sender feeding it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<R>, Self) {
        let (tx, rx) = mpsc::channel(capacity);

        (tx, Self { rx })
    }
}

impl<R> RecordReceiver for ChannelRecordReceiver<R>
where
    R: Send + Sync + 'static,
{
    type Record = R;

    async fn fetch(&mut self) -> EtlResult<R> {
        match self.rx.recv().await {
            Some(record) => Ok(record),
            None => Err(etl_error!(
                ErrorKind::ReceiverTerminated,
                "Record channel closed"
            )),
        }
    }
}
