//! Assembly of the four consumer components.
//!
//! Every component gets its own reader, sink, and checkpoint entry. The
//! checkpoint store is shared, but entries are keyed by component id so no
//! component can observe another's progress.

use crate::config::Config;
use crate::supervisor::Supervisor;
use orderstream_core::environment::Clock;
use orderstream_core::event_bus::{LogError, LogReader};
use orderstream_core::projection::CheckpointStore;
use orderstream_projections::{
    BatchHandler, DomainProjector, FileArchiveStore, FileRecordSink, ItemRecord, ItemsProjection,
    MicroBatchRunner, OrderRecord, OrdersProjection, PaymentRecord, PaymentsProjection,
    RAW_COMPONENT, RawArchiver,
};
use std::future::Future;
use std::sync::Arc;

/// Component ids, in start order.
pub const COMPONENTS: [&str; 4] = [RAW_COMPONENT, "orders", "items", "payments"];

/// Shared collaborators of the consumer components.
pub struct ComponentContext {
    /// Checkpoint store (entries keyed by component)
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Clock for `ingested_at` and checkpoint timestamps
    pub clock: Arc<dyn Clock>,
}

impl ComponentContext {
    fn start<H>(&self, supervisor: &mut Supervisor, config: &Config, handler: H, reader: Box<dyn LogReader>)
    where
        H: BatchHandler + 'static,
    {
        let (runner, shutdown) = MicroBatchRunner::new(
            handler,
            reader,
            Arc::clone(&self.checkpoints),
            Arc::clone(&self.clock),
        );
        let runner = runner.with_settings(config.runner_settings());
        tracing::info!(component = %runner.component(), "Starting component");
        supervisor.spawn(runner, shutdown);
    }
}

/// Start the raw archiver and the three domain projectors.
///
/// `open_reader` is called once per component id and must return a reader
/// that no other component shares. Every reader is opened before any
/// component starts.
///
/// # Errors
///
/// Returns [`LogError`] if a reader cannot be opened.
pub async fn start_components<F, Fut>(
    config: &Config,
    context: &ComponentContext,
    mut open_reader: F,
) -> Result<Supervisor, LogError>
where
    F: FnMut(&'static str) -> Fut,
    Fut: Future<Output = Result<Box<dyn LogReader>, LogError>>,
{
    let [raw, orders, items, payments] = COMPONENTS;
    let raw_reader = open_reader(raw).await?;
    let orders_reader = open_reader(orders).await?;
    let items_reader = open_reader(items).await?;
    let payments_reader = open_reader(payments).await?;

    let mut supervisor = Supervisor::new(config.restart_backoff());
    context.start(
        &mut supervisor,
        config,
        RawArchiver::new(FileArchiveStore::new(config.sinks.raw_dir.clone())),
        raw_reader,
    );
    context.start(
        &mut supervisor,
        config,
        DomainProjector::new(
            OrdersProjection,
            FileRecordSink::<OrderRecord>::new(config.processed_dir(orders)),
        ),
        orders_reader,
    );
    context.start(
        &mut supervisor,
        config,
        DomainProjector::new(
            ItemsProjection,
            FileRecordSink::<ItemRecord>::new(config.processed_dir(items)),
        ),
        items_reader,
    );
    context.start(
        &mut supervisor,
        config,
        DomainProjector::new(
            PaymentsProjection,
            FileRecordSink::<PaymentRecord>::new(config.processed_dir(payments)),
        ),
        payments_reader,
    );

    Ok(supervisor)
}
