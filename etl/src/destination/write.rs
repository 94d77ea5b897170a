use std::pin::pin;

use futures::StreamExt;
use futures::stream::poll_fn;
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::concurrency::stream::BatchStream;
use crate::destination::base::{BatchWriter, WriteTaskId};
use crate::error::{ErrorKind, EtlResult};
use crate::{bail, etl_error};
use crate::metrics::{ETL_BATCH_FLUSHES_TOTAL, ETL_BATCH_RECORDS_TOTAL, JOB_ID_LABEL, TASK_ID_LABEL};
use crate::source::RecordReceiver;

/// Moves records from `receiver` into batches written by `writer` until the source ends.
///
/// A producer task fetches records and hands them over a channel bounded by the batch size. The
/// calling task groups them with a [`BatchStream`] and flushes a batch once it is full, once the
/// batch timeout elapses with records pending, and when the source ends.
///
/// The first failed flush stops consumption. The producer runs in a child scope of `cancel` that
/// is cancelled, and awaited, before returning. Cancellation of `cancel` and a terminated source
/// are a normal end and return `Ok(())`. Any other failure is returned with the ids of the write
/// task in its detail, a flush failure taking precedence over a source failure.
pub async fn start_write<W, V>(cancel: &CancellationToken, writer: &W, receiver: V) -> EtlResult<()>
where
    W: BatchWriter<V::Record>,
    V: RecordReceiver + 'static,
{
    let id = WriteTaskId::new(writer.job_id(), writer.task_group_id(), writer.task_id());
    let batch_size = writer.batch_size().max(1);

    let producer_cancel = cancel.child_token();
    let producer_guard = producer_cancel.clone().drop_guard();
    let (tx, mut rx) = mpsc::channel(batch_size);
    let producer = tokio::spawn(produce(producer_cancel, receiver, tx));

    debug!(%id, batch_size, "write task started");

    let batches = BatchStream::wrap(
        poll_fn(move |cx| rx.poll_recv(cx)),
        batch_size,
        writer.batch_timeout(),
    );
    let consumed = consume(cancel, writer, id, batches).await;

    drop(producer_guard);
    let produced = match producer.await {
        Ok(result) => result,
        Err(err) => Err(etl_error!(
            ErrorKind::WorkerPanic,
            "Record producer failed",
            source: err
        )),
    };

    match consumed.and(produced) {
        Ok(()) => {
            debug!(%id, "write task finished");
            Ok(())
        }
        Err(err) if err.kind().is_graceful_stop() => {
            debug!(%id, reason = ?err.kind(), "write task stopped");
            Ok(())
        }
        Err(err) => {
            error!(%id, error = %err, backtrace = %err.backtrace(), "write task failed");
            Err(etl_error!(
                err.kind(),
                "Batch write task failed",
                id,
                source: err
            ))
        }
    }
}

async fn produce<V>(
    cancel: CancellationToken,
    mut receiver: V,
    tx: mpsc::Sender<V::Record>,
) -> EtlResult<()>
where
    V: RecordReceiver,
{
    loop {
        let fetched = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Ok(()),
            fetched = receiver.fetch() => fetched,
        };

        match fetched {
            Ok(record) => {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return Ok(()),
                    sent = tx.send(record) => {
                        // The consumer is gone.
                        if sent.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
            Err(err) if err.kind() == ErrorKind::ReceiverEmpty => {
                tokio::task::yield_now().await;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn consume<W, R, S>(
    cancel: &CancellationToken,
    writer: &W,
    id: WriteTaskId,
    batches: BatchStream<S>,
) -> EtlResult<()>
where
    W: BatchWriter<R>,
    S: futures::Stream<Item = R>,
{
    let mut batches = pin!(batches);

    loop {
        let batch = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                bail!(ErrorKind::OperationCanceled, "Write task was canceled");
            }
            batch = batches.next() => batch,
        };

        let Some(batch) = batch else {
            return Ok(());
        };

        debug!(%id, records = batch.len(), "flushing batch");
        counter!(
            ETL_BATCH_FLUSHES_TOTAL,
            JOB_ID_LABEL => id.job_id.to_string(),
            TASK_ID_LABEL => id.task_id.to_string(),
        )
        .increment(1);
        counter!(
            ETL_BATCH_RECORDS_TOTAL,
            JOB_ID_LABEL => id.job_id.to_string(),
            TASK_ID_LABEL => id.task_id.to_string(),
        )
        .increment(batch.len() as u64);

        writer.batch_write(cancel, &batch).await?;
    }
}
