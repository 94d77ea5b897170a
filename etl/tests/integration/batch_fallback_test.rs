use etl::destination::{BaseBatchWriter, WriteTaskId, start_write};
use etl::error::{ErrorKind, EtlError};
use etl::etl_error;
use etl::test_utils::destination::{FixedJudger, RecordingExecer};
use etl::test_utils::source::MemoryRecordReceiver;
use etl_config::shared::BatchConfig;
use etl_telemetry::tracing::init_test_tracing;
use tokio_util::sync::CancellationToken;

const BAD_RECORD: u32 = 3;

fn reject_bad_record(records: &[u32], _call: usize) -> Option<EtlError> {
    records.contains(&BAD_RECORD).then(|| {
        etl_error!(
            ErrorKind::DestinationWriteFailed,
            "Row violates a constraint"
        )
    })
}

fn config(ignore_one_by_one_error: bool) -> BatchConfig {
    BatchConfig {
        batch_size: 5,
        batch_timeout_ms: 60_000,
        ignore_one_by_one_error,
        retry: None,
    }
}

#[tokio::test]
async fn bad_record_is_skipped_when_record_errors_are_ignored() {
    init_test_tracing();

    let execer = RecordingExecer::new()
        .fail_when(reject_bad_record)
        .with_judger(FixedJudger::new(false, true));
    let writer = BaseBatchWriter::new(WriteTaskId::new(1, 1, 1), execer.clone(), config(true))
        .unwrap();
    let receiver = MemoryRecordReceiver::new((0..10u32).collect());

    start_write(&CancellationToken::new(), &writer, receiver)
        .await
        .unwrap();

    assert_eq!(execer.call_sizes(), vec![5, 1, 1, 1, 1, 1, 5]);
    assert_eq!(execer.written(), vec![0, 1, 2, 4, 5, 6, 7, 8, 9]);
}

#[tokio::test]
async fn bad_record_fails_the_write_when_record_errors_are_not_ignored() {
    init_test_tracing();

    let execer = RecordingExecer::new()
        .fail_when(reject_bad_record)
        .with_judger(FixedJudger::new(false, true));
    let writer = BaseBatchWriter::new(WriteTaskId::new(2, 3, 4), execer.clone(), config(false))
        .unwrap();
    let receiver = MemoryRecordReceiver::new((0..10u32).collect());

    let err = start_write(&CancellationToken::new(), &writer, receiver)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    assert_eq!(err.description(), "Batch write task failed");
    assert_eq!(err.detail(), Some("job_id=2 task_group_id=3 task_id=4"));
    // The failing batch, then records 0 to 3. The second batch is never written.
    assert_eq!(execer.call_sizes(), vec![5, 1, 1, 1, 1]);
    assert_eq!(execer.written(), vec![0, 1, 2]);
}

#[tokio::test]
async fn destination_without_judger_fails_on_the_first_batch() {
    init_test_tracing();

    let execer = RecordingExecer::new().fail_when(reject_bad_record);
    let writer = BaseBatchWriter::new(WriteTaskId::new(1, 1, 2), execer.clone(), config(true))
        .unwrap();
    let receiver = MemoryRecordReceiver::new((0..10u32).collect());

    let err = start_write(&CancellationToken::new(), &writer, receiver)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DestinationWriteFailed);
    assert_eq!(execer.call_sizes(), vec![5]);
    assert!(execer.written().is_empty());
}
