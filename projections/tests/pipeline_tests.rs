//! End-to-end tests of the micro-batch runner, archiver, and projectors
//! against in-memory and filesystem collaborators.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use orderstream_core::environment::Clock;
use orderstream_core::event::{Envelope, SourceRow};
use orderstream_core::event_bus::{LogError, LogPosition, LogPublisher};
use orderstream_core::projection::{
    Checkpoint, CheckpointError, CheckpointStore, RecordSink, SinkError,
};
use orderstream_projections::{
    BatchHandler, ComponentState, DomainProjector, FileCheckpointStore, FileRecordSink,
    ItemRecord, ItemsProjection, MicroBatchRunner, OrderRecord, OrdersProjection, PaymentRecord,
    PaymentsProjection, PipelineError, RawArchiver, RunnerSettings,
};
use orderstream_testing::{
    InMemoryArchiveStore, InMemoryCheckpointStore, InMemoryEventLog, InMemoryRecordSink,
    fixtures, test_clock,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn settings(max_batch_records: usize) -> RunnerSettings {
    RunnerSettings {
        max_batch_records,
        idle_wait: Duration::from_millis(10),
    }
}

async fn publish(log: &InMemoryEventLog, envelope: &Envelope) {
    log.publish(envelope.partition_key(), &envelope.to_bytes().unwrap())
        .await
        .unwrap();
}

async fn publish_orders(log: &InMemoryEventLog, rows: &[SourceRow]) {
    for row in rows {
        publish(log, &Envelope::order_snapshot(row)).await;
    }
}

fn runner<H: BatchHandler>(
    handler: H,
    log: &InMemoryEventLog,
    checkpoints: &InMemoryCheckpointStore,
    batch: usize,
) -> (MicroBatchRunner<H>, tokio::sync::watch::Sender<bool>) {
    let (runner, shutdown) = MicroBatchRunner::new(
        handler,
        Box::new(log.reader()),
        Arc::new(checkpoints.clone()),
        Arc::new(test_clock()),
    );
    (runner.with_settings(settings(batch)), shutdown)
}

/// Run until the component's checkpoint covers the whole log, then stop it.
async fn drain<H: BatchHandler + 'static>(
    mut runner: MicroBatchRunner<H>,
    shutdown: tokio::sync::watch::Sender<bool>,
    log: &InMemoryEventLog,
    checkpoints: &InMemoryCheckpointStore,
) -> MicroBatchRunner<H> {
    let component = runner.component().to_string();
    let handle = tokio::spawn(async move {
        let result = runner.run().await;
        (runner, result)
    });

    let expected = i64::try_from(log.len()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let consumed = checkpoints
                .get(&component)
                .map_or(0, |c| c.position.consumed());
            if consumed >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("component did not catch up with the log");

    shutdown.send(true).unwrap();
    let (runner, result) = handle.await.unwrap();
    result.unwrap();
    assert_eq!(runner.state(), ComponentState::Stopped);
    runner
}

#[tokio::test]
async fn end_to_end_scenario_materializes_each_key_once() {
    let log = InMemoryEventLog::new(3);
    let clock = test_clock();

    publish_orders(
        &log,
        &[
            fixtures::order_row("o1", "created"),
            fixtures::order_row("o1", "approved"),
            fixtures::order_row("o1", "delivered"),
        ],
    )
    .await;
    publish(&log, &Envelope::item_added(&fixtures::item_row("o1", "1"))).await;
    publish(&log, &Envelope::item_added(&fixtures::item_row("o1", "2"))).await;
    publish(
        &log,
        &Envelope::payment_received(&fixtures::payment_row("o1", "1", "10.5"), &clock),
    )
    .await;
    publish(
        &log,
        &Envelope::payment_received(&fixtures::payment_row("o1", "2", "0"), &clock),
    )
    .await;

    let checkpoints = InMemoryCheckpointStore::new();
    let archive = InMemoryArchiveStore::new();
    let orders = InMemoryRecordSink::<OrderRecord>::new();
    let items = InMemoryRecordSink::<ItemRecord>::new();
    let payments = InMemoryRecordSink::<PaymentRecord>::new();

    let (raw_runner, raw_stop) = runner(RawArchiver::new(archive.clone()), &log, &checkpoints, 2);
    let (orders_runner, orders_stop) = runner(
        DomainProjector::new(OrdersProjection, orders.clone()),
        &log,
        &checkpoints,
        2,
    );
    let (items_runner, items_stop) = runner(
        DomainProjector::new(ItemsProjection, items.clone()),
        &log,
        &checkpoints,
        2,
    );
    let (payments_runner, payments_stop) = runner(
        DomainProjector::new(PaymentsProjection, payments.clone()),
        &log,
        &checkpoints,
        2,
    );

    tokio::join!(
        drain(raw_runner, raw_stop, &log, &checkpoints),
        drain(orders_runner, orders_stop, &log, &checkpoints),
        drain(items_runner, items_stop, &log, &checkpoints),
        drain(payments_runner, payments_stop, &log, &checkpoints),
    );

    let order_rows = orders.rows();
    assert_eq!(order_rows.len(), 1);
    assert_eq!(order_rows[0].order_status.as_deref(), Some("created"));
    assert_eq!(items.rows().len(), 2);
    let payment_rows = payments.rows();
    assert_eq!(payment_rows.len(), 1);
    assert!((payment_rows[0].payment_value - 10.5).abs() < f64::EPSILON);
    assert_eq!(archive.payloads().len(), 7);

    for component in ["raw", "orders", "items", "payments"] {
        assert_eq!(checkpoints.get(component).unwrap().position.consumed(), 7);
    }
}

#[tokio::test]
async fn duplicates_in_later_batches_are_suppressed() {
    let log = InMemoryEventLog::new(1);
    publish_orders(
        &log,
        &[
            fixtures::order_row("o1", "created"),
            fixtures::order_row("o2", "created"),
            fixtures::order_row("o1", "canceled"),
        ],
    )
    .await;

    let checkpoints = InMemoryCheckpointStore::new();
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (runner, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        1,
    );
    drain(runner, stop, &log, &checkpoints).await;

    let rows = sink.rows();
    assert_eq!(rows.len(), 2);
    let o1 = rows.iter().find(|r| r.order_id == "o1").unwrap();
    assert_eq!(o1.order_status.as_deref(), Some("created"));
    assert_eq!(checkpoints.get("orders").unwrap().batch_id, 2);
}

#[tokio::test]
async fn dedup_survives_restart() {
    let log = InMemoryEventLog::new(2);
    publish_orders(&log, &[fixtures::order_row("o1", "created")]).await;

    let checkpoints = InMemoryCheckpointStore::new();
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (first, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );
    drain(first, stop, &log, &checkpoints).await;

    // A brand-new projector instance: nothing in memory but the sink.
    publish_orders(&log, &[fixtures::order_row("o1", "delivered")]).await;
    let (second, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );
    let second = drain(second, stop, &log, &checkpoints).await;

    assert_eq!(sink.rows().len(), 1);
    assert_eq!(sink.rows()[0].order_status.as_deref(), Some("created"));
    assert_eq!(second.handler().written_keys(), 1);
}

#[tokio::test]
async fn crash_between_write_and_checkpoint_replays_exactly_once() {
    let log = InMemoryEventLog::new(2);
    publish_orders(
        &log,
        &[
            fixtures::order_row("o1", "created"),
            fixtures::order_row("o2", "created"),
        ],
    )
    .await;

    let checkpoints = InMemoryCheckpointStore::new();
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (mut crashed, _stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );

    checkpoints.fail_next_save();
    let error = crashed.run().await.unwrap_err();
    assert!(error.is_recoverable());
    assert_eq!(crashed.state(), ComponentState::Failed);
    assert_eq!(sink.rows().len(), 2, "the write itself was durable");
    assert!(checkpoints.get("orders").is_none());

    // Restart re-enters STARTING, discards the uncommitted batch, replays it.
    let (replayed, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );
    drain(replayed, stop, &log, &checkpoints).await;

    let mut ids: Vec<_> = sink.rows().into_iter().map(|r| r.order_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["o1".to_string(), "o2".to_string()]);
    assert_eq!(sink.batch_ids(), vec![0]);
    assert_eq!(checkpoints.get("orders").unwrap().batch_id, 0);
}

#[tokio::test]
async fn same_runner_restarts_after_failure() {
    let log = InMemoryEventLog::new(1);
    publish_orders(&log, &[fixtures::order_row("o1", "created")]).await;

    let checkpoints = InMemoryCheckpointStore::new();
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (mut runner, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );

    log.fail_next_read(LogError::Unavailable("broker down".into()));
    let error = runner.run().await.unwrap_err();
    assert!(matches!(error, PipelineError::Log(LogError::Unavailable(_))));
    assert_eq!(runner.state(), ComponentState::Failed);

    drain(runner, stop, &log, &checkpoints).await;
    assert_eq!(sink.rows().len(), 1);
}

#[tokio::test]
async fn read_timeouts_are_retried() {
    let log = InMemoryEventLog::new(1);
    publish_orders(&log, &[fixtures::order_row("o1", "created")]).await;
    log.fail_next_read(LogError::Timeout("poll".into()));
    log.fail_next_read(LogError::Timeout("poll".into()));

    let checkpoints = InMemoryCheckpointStore::new();
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (runner, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );
    drain(runner, stop, &log, &checkpoints).await;

    assert_eq!(sink.rows().len(), 1);
}

#[tokio::test]
async fn corrupted_checkpoint_fails_without_resetting() {
    let log = InMemoryEventLog::new(1);
    publish_orders(&log, &[fixtures::order_row("o1", "created")]).await;

    let checkpoints = InMemoryCheckpointStore::new();
    checkpoints.corrupt("orders");
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (mut runner, _stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );

    let error = runner.run().await.unwrap_err();

    assert!(matches!(
        error,
        PipelineError::Checkpoint(CheckpointError::Corrupted { .. })
    ));
    assert!(!error.is_recoverable());
    assert_eq!(runner.state(), ComponentState::Failed);
    assert!(sink.rows().is_empty(), "never processed from earliest");
    assert_eq!(checkpoints.save_count(), 0);
}

#[tokio::test]
async fn exhausted_batch_id_is_treated_as_corruption() {
    let log = InMemoryEventLog::new(1);
    publish_orders(&log, &[fixtures::order_row("o1", "created")]).await;

    let checkpoints = InMemoryCheckpointStore::new();
    checkpoints.insert(
        "orders",
        Checkpoint::new("orders", u64::MAX, LogPosition::earliest(), test_clock().now()),
    );
    let sink = InMemoryRecordSink::<OrderRecord>::new();
    let (mut runner, _stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );

    let error = runner.run().await.unwrap_err();

    assert!(matches!(
        error,
        PipelineError::Checkpoint(CheckpointError::Corrupted { .. })
    ));
    assert!(!error.is_recoverable());
    assert_eq!(runner.state(), ComponentState::Failed);
    assert!(sink.rows().is_empty());
    assert_eq!(checkpoints.get("orders").unwrap().batch_id, u64::MAX);
}

#[tokio::test]
async fn malformed_and_foreign_records_do_not_stop_the_stream() {
    let log = InMemoryEventLog::new(2);
    log.publish("unknown", b"{ not an envelope").await.unwrap();
    log.publish(
        "o9",
        br#"{"event_type":"ORDER_SHIPPED","event_time":"","order_id":"o9","data":{}}"#,
    )
    .await
    .unwrap();
    publish(&log, &Envelope::item_added(&fixtures::item_row("o1", "1"))).await;
    publish_orders(
        &log,
        &[
            fixtures::with(fixtures::order_row("o2", "created"), "order_purchase_timestamp", "n/a"),
            fixtures::order_row("o1", "created"),
        ],
    )
    .await;

    let checkpoints = InMemoryCheckpointStore::new();
    let archive = InMemoryArchiveStore::new();
    let sink = InMemoryRecordSink::<OrderRecord>::new();

    let (orders_runner, orders_stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        100,
    );
    let (raw_runner, raw_stop) = runner(RawArchiver::new(archive.clone()), &log, &checkpoints, 100);

    drain(orders_runner, orders_stop, &log, &checkpoints).await;
    drain(raw_runner, raw_stop, &log, &checkpoints).await;

    let rows = sink.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].order_id, "o1");
    assert_eq!(archive.payloads().len(), 5);
    assert_eq!(archive.payloads()[0], b"{ not an envelope".to_vec());
}

#[tokio::test]
async fn a_failing_projector_does_not_stall_the_others() {
    let log = InMemoryEventLog::new(2);
    let clock = test_clock();
    publish_orders(&log, &[fixtures::order_row("o1", "created")]).await;
    publish(
        &log,
        &Envelope::payment_received(&fixtures::payment_row("o1", "1", "99.0"), &clock),
    )
    .await;

    let checkpoints = InMemoryCheckpointStore::new();
    let orders = InMemoryRecordSink::<OrderRecord>::new();
    let payments = InMemoryRecordSink::<PaymentRecord>::new();
    payments.fail_next_write();

    let (mut payments_runner, _stop) = runner(
        DomainProjector::new(PaymentsProjection, payments.clone()),
        &log,
        &checkpoints,
        10,
    );
    assert!(payments_runner.run().await.is_err());

    let (orders_runner, stop) = runner(
        DomainProjector::new(OrdersProjection, orders.clone()),
        &log,
        &checkpoints,
        10,
    );
    drain(orders_runner, stop, &log, &checkpoints).await;

    assert_eq!(orders.rows().len(), 1);
    assert!(checkpoints.get("payments").is_none());
    assert_eq!(checkpoints.get("orders").unwrap().position.consumed(), 2);
}

#[tokio::test]
async fn shutdown_while_idle_stops_cleanly() {
    let log = InMemoryEventLog::new(1);
    let checkpoints = InMemoryCheckpointStore::new();
    let (mut runner, stop) = runner(
        DomainProjector::new(OrdersProjection, InMemoryRecordSink::<OrderRecord>::new()),
        &log,
        &checkpoints,
        10,
    );
    let mut states = runner.subscribe_state();

    let handle = tokio::spawn(async move {
        let result = runner.run().await;
        (runner, result)
    });

    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == ComponentState::Processing))
        .await
        .unwrap()
        .unwrap();
    stop.send(true).unwrap();

    let (runner, result) = handle.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(runner.state(), ComponentState::Stopped);
    assert!(checkpoints.get("orders").is_none());
}

#[tokio::test]
async fn file_backed_orders_are_partitioned_by_purchase_date() {
    let dir = tempfile::tempdir().unwrap();
    let log = InMemoryEventLog::new(2);
    publish_orders(
        &log,
        &[
            fixtures::order_row("o1", "created"),
            fixtures::with(
                fixtures::order_row("o2", "created"),
                "order_purchase_timestamp",
                "2018-02-03 08:00:00",
            ),
        ],
    )
    .await;

    let sink = FileRecordSink::<OrderRecord>::new(dir.path().join("processed/orders"));
    let checkpoint_dir = dir.path().join("checkpoints");
    let checkpoints = InMemoryCheckpointStore::new();
    let (runner, stop) = runner(
        DomainProjector::new(OrdersProjection, sink),
        &log,
        &checkpoints,
        10,
    );
    let runner = drain(runner, stop, &log, &checkpoints).await;

    assert!(dir.path().join("processed/orders/purchase_date=2018-01-01").is_dir());
    assert!(dir.path().join("processed/orders/purchase_date=2018-02-03").is_dir());
    assert_eq!(runner.handler().sink().read_all().await.unwrap().len(), 2);

    // The file checkpoint store accepts what the runner committed.
    let files = FileCheckpointStore::new(&checkpoint_dir);
    let committed = checkpoints.get("orders").unwrap();
    files.save(&committed).await.unwrap();
    let loaded = files.load("orders").await.unwrap();
    assert_eq!(loaded, Some(committed));
    assert_eq!(loaded.map(|c| c.committed_at), Some(test_clock().now()));
}

/// Record sink whose writes wait until the test releases them.
#[derive(Clone)]
struct GatedSink {
    inner: InMemoryRecordSink<OrderRecord>,
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl RecordSink<OrderRecord> for GatedSink {
    async fn recover(&self, committed: Option<u64>) -> Result<HashSet<String>, SinkError> {
        self.inner.recover(committed).await
    }

    async fn write_batch(&self, batch_id: u64, rows: &[OrderRecord]) -> Result<(), SinkError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.write_batch(batch_id, rows).await
    }
}

#[tokio::test]
async fn shutdown_mid_batch_finishes_write_and_checkpoint() {
    let log = InMemoryEventLog::new(1);
    publish_orders(
        &log,
        &[
            fixtures::order_row("o1", "created"),
            fixtures::order_row("o2", "created"),
        ],
    )
    .await;

    let checkpoints = InMemoryCheckpointStore::new();
    let sink = GatedSink {
        inner: InMemoryRecordSink::new(),
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    };
    let (mut runner, stop) = runner(
        DomainProjector::new(OrdersProjection, sink.clone()),
        &log,
        &checkpoints,
        10,
    );

    let handle = tokio::spawn(async move {
        let result = runner.run().await;
        (runner, result)
    });

    tokio::time::timeout(Duration::from_secs(5), sink.entered.notified())
        .await
        .expect("batch never reached the sink");
    stop.send(true).unwrap();
    sink.release.notify_one();

    let (runner, result) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("runner did not stop")
        .unwrap();
    result.unwrap();
    assert_eq!(runner.state(), ComponentState::Stopped);

    assert_eq!(sink.inner.rows().len(), 2);
    assert_eq!(sink.inner.batch_ids(), vec![0]);
    let checkpoint = checkpoints.get("orders").unwrap();
    assert_eq!(checkpoint.batch_id, 0);
    assert_eq!(checkpoint.position.consumed(), 2);
}
