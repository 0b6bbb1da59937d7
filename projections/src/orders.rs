//! Orders projection.
//!
//! Natural key `order_id`; output partitioned by `purchase_date`.

use chrono::{NaiveDate, NaiveDateTime};
use orderstream_core::event::{Envelope, EventType};
use orderstream_core::payload::Payload;
use orderstream_core::projection::{DomainProjection, OutputRecord, Partition, Rejection};
use orderstream_core::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the orders dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Natural key.
    pub order_id: String,
    /// Customer placing the order.
    pub customer_id: Option<String>,
    /// Lower-cased, trimmed status.
    pub order_status: Option<String>,
    /// When the order was placed.
    pub purchase_ts: NaiveDateTime,
    /// When payment was approved.
    pub approved_ts: Option<NaiveDateTime>,
    /// When the order was handed to the carrier.
    pub carrier_ts: Option<NaiveDateTime>,
    /// When the customer received the order.
    pub delivered_ts: Option<NaiveDateTime>,
    /// Promised delivery date.
    pub estimated_ts: Option<NaiveDateTime>,
    /// Calendar days from purchase to delivery.
    pub delivery_days: Option<i64>,
    /// Calendar days from estimate to delivery; negative when early.
    pub delivery_delay_days: Option<i64>,
    /// Start of the micro-batch that produced this row.
    pub ingested_at: DateTime<Utc>,
    /// Output partition.
    pub purchase_date: NaiveDate,
}

impl OutputRecord for OrderRecord {
    type Key = String;

    fn key(&self) -> String {
        self.order_id.clone()
    }

    fn partition(&self) -> Option<Partition> {
        Some(Partition {
            column: "purchase_date",
            value: self.purchase_date.format("%Y-%m-%d").to_string(),
        })
    }
}

/// Projection of `ORDER_SNAPSHOT` envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdersProjection;

impl DomainProjection for OrdersProjection {
    type Record = OrderRecord;

    fn name(&self) -> &'static str {
        "orders"
    }

    fn event_type(&self) -> EventType {
        EventType::OrderSnapshot
    }

    fn project(
        &self,
        envelope: &Envelope,
        ingested_at: DateTime<Utc>,
    ) -> Result<OrderRecord, Rejection> {
        let Payload::Order(order) = envelope.decode() else {
            return Err(Rejection::WrongVariant {
                expected: EventType::OrderSnapshot,
                found: envelope.event_type,
            });
        };

        let approved_ts = order.approved_ts?;
        let carrier_ts = order.carrier_ts?;
        let delivered_ts = order.delivered_ts?;
        let estimated_ts = order.estimated_ts?;
        let purchase_ts = order
            .purchase_ts?
            .ok_or(Rejection::MissingField("order_purchase_timestamp"))?;
        let order_id = order.order_id.ok_or(Rejection::MissingField("order_id"))?;

        Ok(OrderRecord {
            order_id,
            customer_id: order.customer_id,
            order_status: order.order_status,
            purchase_ts,
            approved_ts,
            carrier_ts,
            delivery_days: delivered_ts.map(|delivered| day_diff(delivered, purchase_ts)),
            delivery_delay_days: delivered_ts
                .zip(estimated_ts)
                .map(|(delivered, estimated)| day_diff(delivered, estimated)),
            delivered_ts,
            estimated_ts,
            ingested_at,
            purchase_date: purchase_ts.date(),
        })
    }
}

/// Calendar-day difference `end - start`; times of day are ignored.
#[must_use]
pub fn day_diff(end: NaiveDateTime, start: NaiveDateTime) -> i64 {
    (end.date() - start.date()).num_days()
}
