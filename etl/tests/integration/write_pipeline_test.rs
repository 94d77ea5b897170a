use std::sync::Arc;
use std::time::Duration;

use etl::destination::{BaseBatchWriter, WriteTaskId, start_write};
use etl::error::ErrorKind;
use etl::etl_error;
use etl::test_utils::destination::{FixedJudger, RecordingExecer};
use etl::test_utils::source::{ChannelRecordReceiver, MemoryRecordReceiver};
use etl_config::shared::{BatchConfig, RetryConfig};
use etl_telemetry::tracing::init_test_tracing;
use tokio_util::sync::CancellationToken;

fn batch_config(batch_size: usize, batch_timeout_ms: u64) -> BatchConfig {
    BatchConfig {
        batch_size,
        batch_timeout_ms,
        ..BatchConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn records_are_flushed_in_full_batches_then_remainder() {
    init_test_tracing();

    let execer = RecordingExecer::new();
    let writer = BaseBatchWriter::new(
        WriteTaskId::new(1, 1, 1),
        execer.clone(),
        BatchConfig::default(),
    )
    .unwrap();
    let receiver = MemoryRecordReceiver::new((0..2500u32).collect());

    start_write(&CancellationToken::new(), &writer, receiver)
        .await
        .unwrap();

    assert_eq!(execer.call_sizes(), vec![1000, 1000, 500]);
    assert_eq!(execer.written(), (0..2500u32).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn partial_batch_is_flushed_on_timeout() {
    init_test_tracing();

    let execer = RecordingExecer::new();
    let writer = Arc::new(
        BaseBatchWriter::new(WriteTaskId::new(1, 1, 2), execer.clone(), batch_config(100, 1000))
            .unwrap(),
    );
    let (tx, receiver) = ChannelRecordReceiver::channel(16);

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let writer = writer.clone();
        let cancel = cancel.clone();
        async move { start_write(&cancel, writer.as_ref(), receiver).await }
    });

    for record in 0..3u32 {
        tx.send(record).await.unwrap();
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(execer.call_sizes(), vec![3]);

    drop(tx);
    task.await.unwrap().unwrap();

    assert_eq!(execer.call_sizes(), vec![3]);
    assert_eq!(execer.written(), vec![0, 1, 2]);
}

#[tokio::test]
async fn caller_cancellation_ends_the_write_successfully() {
    init_test_tracing();

    let execer = RecordingExecer::new();
    let writer = Arc::new(
        BaseBatchWriter::new(
            WriteTaskId::new(1, 1, 3),
            execer.clone(),
            batch_config(100, 60_000),
        )
        .unwrap(),
    );
    let (tx, receiver) = ChannelRecordReceiver::channel(16);

    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let writer = writer.clone();
        let cancel = cancel.clone();
        async move { start_write(&cancel, writer.as_ref(), receiver).await }
    });

    tx.send(1u32).await.unwrap();
    tx.send(2u32).await.unwrap();
    cancel.cancel();

    task.await.unwrap().unwrap();

    // Buffered records are not flushed once the caller cancels.
    assert_eq!(execer.calls(), 0);
    // The sender outlives the write task.
    drop(tx);
}

#[tokio::test]
async fn source_error_is_wrapped_with_task_ids() {
    init_test_tracing();

    let execer = RecordingExecer::new();
    let writer = BaseBatchWriter::new(
        WriteTaskId::new(4, 5, 6),
        execer.clone(),
        batch_config(2, 60_000),
    )
    .unwrap();
    let receiver = MemoryRecordReceiver::new(vec![1u32, 2, 3])
        .ending_with(etl_error!(ErrorKind::SourceError, "Connection lost"));

    let err = start_write(&CancellationToken::new(), &writer, receiver)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SourceError);
    assert_eq!(err.detail(), Some("job_id=4 task_group_id=5 task_id=6"));
    assert_eq!(execer.call_sizes(), vec![2, 1]);
}

#[tokio::test(start_paused = true)]
async fn transient_destination_failures_are_retried() {
    init_test_tracing();

    let execer = RecordingExecer::new()
        .fail_when(|_: &[u32], call| {
            (call == 0).then(|| etl_error!(ErrorKind::DestinationError, "Connection reset"))
        })
        .with_judger(FixedJudger::new(true, false));
    let config = BatchConfig {
        retry: Some(RetryConfig::NTimes {
            n: 3,
            wait_ms: 100,
        }),
        ..batch_config(10, 1000)
    };
    let writer = BaseBatchWriter::new(WriteTaskId::new(1, 1, 4), execer.clone(), config).unwrap();
    let receiver = MemoryRecordReceiver::new((0..10u32).collect());

    start_write(&CancellationToken::new(), &writer, receiver)
        .await
        .unwrap();

    assert_eq!(execer.call_sizes(), vec![10, 10]);
    assert_eq!(execer.written(), (0..10u32).collect::<Vec<_>>());
}
