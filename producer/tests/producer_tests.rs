//! End-to-end producer runs over CSV files on disk.

#![allow(clippy::unwrap_used)]

use orderstream_core::event::{Envelope, EventType};
use orderstream_producer::{EventProducer, ProducerError, ProducerSettings, SourceSet};
use orderstream_testing::{InMemoryEventLog, test_clock};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const ORDERS: &str = "\
order_id,customer_id,order_status,order_purchase_timestamp,order_approved_at,order_delivered_carrier_date,order_delivered_customer_date,order_estimated_delivery_date
o1,c1,delivered,2018-01-01 10:00:00,2018-01-01 10:15:00,2018-01-02 09:00:00,2018-01-05 12:00:00,2018-01-10 00:00:00
o2,c2,shipped,2018-02-01 08:00:00,,,,2018-02-10 00:00:00
";

const ITEMS: &str = "\
order_id,order_item_id,product_id,seller_id,shipping_limit_date,price,freight_value
o1,1,p1,s1,2018-01-03 10:00:00,59.90,8.72
o1,2,p2,s1,2018-01-03 10:00:00,10.00,1.00
,1,p3,s2,2018-01-03 10:00:00,5.00,0.50
";

const PAYMENTS: &str = "\
order_id,payment_sequential,payment_type,payment_installments,payment_value
o1,1,credit_card,1,86.62
";

fn write_sources(dir: &Path) -> SourceSet {
    let sources = SourceSet {
        orders: dir.join("orders.csv"),
        items: dir.join("order_items.csv"),
        payments: dir.join("order_payments.csv"),
    };
    fs::write(&sources.orders, ORDERS).unwrap();
    fs::write(&sources.items, ITEMS).unwrap();
    fs::write(&sources.payments, PAYMENTS).unwrap();
    sources
}

fn producer(log: &InMemoryEventLog, max_events: usize) -> EventProducer {
    EventProducer::new(
        Arc::new(log.clone()),
        Arc::new(test_clock()),
        ProducerSettings {
            max_events,
            emit_delay: Duration::ZERO,
            progress_every: 0,
            seed: Some(3),
        },
    )
}

fn published(log: &InMemoryEventLog) -> Vec<(String, Envelope)> {
    log.records()
        .into_iter()
        .map(|(key, payload)| (key, Envelope::from_bytes(&payload).unwrap()))
        .collect()
}

#[tokio::test]
async fn every_row_becomes_one_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path());
    let log = InMemoryEventLog::new(3);

    let emitted = producer(&log, 100).run(&sources).await.unwrap();

    assert_eq!(emitted, 6);
    let mut counts: HashMap<EventType, usize> = HashMap::new();
    for (_, envelope) in published(&log) {
        *counts.entry(envelope.event_type).or_default() += 1;
    }
    assert_eq!(counts.get(&EventType::OrderSnapshot), Some(&2));
    assert_eq!(counts.get(&EventType::ItemAdded), Some(&3));
    assert_eq!(counts.get(&EventType::PaymentReceived), Some(&1));
}

#[tokio::test]
async fn envelopes_are_keyed_by_order_id_or_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path());
    let log = InMemoryEventLog::new(3);

    producer(&log, 100).run(&sources).await.unwrap();

    for (key, envelope) in published(&log) {
        if envelope.order_id.is_empty() {
            assert_eq!(key, "unknown");
        } else {
            assert_eq!(key, envelope.order_id);
        }
    }
}

#[tokio::test]
async fn emission_is_capped() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path());
    let log = InMemoryEventLog::new(1);

    let emitted = producer(&log, 4).run(&sources).await.unwrap();

    assert_eq!(emitted, 4);
    assert_eq!(log.len(), 4);
}

#[tokio::test]
async fn blank_cells_survive_as_empty_strings() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path());
    let log = InMemoryEventLog::new(1);

    producer(&log, 100).run(&sources).await.unwrap();

    let shipped = published(&log)
        .into_iter()
        .map(|(_, envelope)| envelope)
        .find(|envelope| envelope.order_id == "o2")
        .unwrap();
    assert_eq!(shipped.field("order_approved_at"), Some(""));
    assert_eq!(shipped.order_status.as_deref(), Some("shipped"));
}

#[tokio::test]
async fn missing_dataset_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut sources = write_sources(dir.path());
    sources.payments = dir.path().join("absent.csv");
    let log = InMemoryEventLog::new(1);

    let result = producer(&log, 100).run(&sources).await;

    assert!(matches!(result, Err(ProducerError::Source { .. })));
    assert!(log.is_empty());
}
