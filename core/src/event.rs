//! Event envelope model.
//!
//! Every event on the log is an [`Envelope`]: a flat record carrying the
//! variant discriminator, a handful of routing fields, and the verbatim source
//! row in `data`. Typing is deferred to projection time (see
//! [`crate::payload`]), so ingest never loses a column.
//!
//! # Wire Format
//!
//! Envelopes travel as JSON objects. All keys are always present; variant
//! fields that do not apply to a variant are written as `null`:
//!
//! ```text
//! {
//!   "event_type": "ITEM_ADDED",
//!   "event_time": "2017-09-19 09:45:35",
//!   "order_id": "00010242fe8c5a6d1ba2dd792cb16214",
//!   "customer_id": null,
//!   "order_status": null,
//!   "product_id": "4244733e06e7ecb4970a6e2683c13e61",
//!   "seller_id": "48436dade18ac8b2bce089ec2a041202",
//!   "data": { "order_item_id": "1", "price": "58.90", ... }
//! }
//! ```
//!
//! # Example
//!
//! ```
//! use orderstream_core::event::{Envelope, EventType, SourceRow};
//!
//! let mut row = SourceRow::new();
//! row.insert("order_id".to_string(), "o-1".to_string());
//! row.insert("order_status".to_string(), "delivered".to_string());
//!
//! let envelope = Envelope::order_snapshot(&row);
//! assert_eq!(envelope.event_type, EventType::OrderSnapshot);
//! assert_eq!(envelope.partition_key(), "o-1");
//! ```

use crate::environment::Clock;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A raw source row: original column name to string value.
pub type SourceRow = BTreeMap<String, String>;

/// Partition key used when an envelope carries no usable `order_id`.
pub const UNKNOWN_PARTITION_KEY: &str = "unknown";

/// Format of producer-assigned event times.
pub const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Error types for envelope operations.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Failed to serialize envelope to bytes.
    #[error("Failed to serialize envelope: {0}")]
    SerializationError(String),

    /// Failed to deserialize envelope from bytes.
    #[error("Failed to deserialize envelope: {0}")]
    DeserializationError(String),

    /// Unknown event type name.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// Envelope variant. Discriminates downstream routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Full snapshot of an order row.
    #[serde(rename = "ORDER_SNAPSHOT")]
    OrderSnapshot,
    /// One line item of an order.
    #[serde(rename = "ITEM_ADDED")]
    ItemAdded,
    /// One payment towards an order.
    #[serde(rename = "PAYMENT_RECEIVED")]
    PaymentReceived,
}

impl EventType {
    /// All variants, in producer concatenation order.
    pub const ALL: [Self; 3] = [Self::OrderSnapshot, Self::ItemAdded, Self::PaymentReceived];

    /// Wire name of the variant.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OrderSnapshot => "ORDER_SNAPSHOT",
            Self::ItemAdded => "ITEM_ADDED",
            Self::PaymentReceived => "PAYMENT_RECEIVED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|variant| variant.as_str() == s)
            .ok_or_else(|| EnvelopeError::UnknownEventType(s.to_string()))
    }
}

/// The canonical shape of every event on the log.
///
/// Envelopes are created once by the producer and never mutated; subscribers
/// may observe the same envelope many times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Variant discriminator. Always set by the constructor, never inferred.
    pub event_type: EventType,

    /// Advisory event time; provenance depends on the variant.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub event_time: String,

    /// Order the event belongs to. May be empty; see [`Envelope::partition_key`].
    #[serde(default, deserialize_with = "null_as_empty")]
    pub order_id: String,

    /// Customer identifier (orders only).
    #[serde(default)]
    pub customer_id: Option<String>,

    /// Raw order status (orders only).
    #[serde(default)]
    pub order_status: Option<String>,

    /// Product identifier (items only).
    #[serde(default)]
    pub product_id: Option<String>,

    /// Seller identifier (items only).
    #[serde(default)]
    pub seller_id: Option<String>,

    /// Every source column, verbatim.
    #[serde(default, deserialize_with = "lenient_data")]
    pub data: BTreeMap<String, String>,
}

impl Envelope {
    /// Build an `ORDER_SNAPSHOT` envelope from an orders row.
    ///
    /// `event_time` is the purchase timestamp.
    #[must_use]
    pub fn order_snapshot(row: &SourceRow) -> Self {
        Self {
            event_type: EventType::OrderSnapshot,
            event_time: column(row, "order_purchase_timestamp"),
            order_id: column(row, "order_id"),
            customer_id: Some(column(row, "customer_id")),
            order_status: Some(column(row, "order_status")),
            product_id: None,
            seller_id: None,
            data: row.clone(),
        }
    }

    /// Build an `ITEM_ADDED` envelope from an order-items row.
    ///
    /// `event_time` is the shipping limit date.
    #[must_use]
    pub fn item_added(row: &SourceRow) -> Self {
        Self {
            event_type: EventType::ItemAdded,
            event_time: column(row, "shipping_limit_date"),
            order_id: column(row, "order_id"),
            customer_id: None,
            order_status: None,
            product_id: Some(column(row, "product_id")),
            seller_id: Some(column(row, "seller_id")),
            data: row.clone(),
        }
    }

    /// Build a `PAYMENT_RECEIVED` envelope from a payments row.
    ///
    /// Payments carry no natural event time, so `event_time` is the moment of
    /// construction according to `clock`.
    #[must_use]
    pub fn payment_received(row: &SourceRow, clock: &dyn Clock) -> Self {
        Self {
            event_type: EventType::PaymentReceived,
            event_time: clock.now().format(EVENT_TIME_FORMAT).to_string(),
            order_id: column(row, "order_id"),
            customer_id: None,
            order_status: None,
            product_id: None,
            seller_id: None,
            data: row.clone(),
        }
    }

    /// Build the envelope of the given variant. Total: never fails.
    #[must_use]
    pub fn from_row(event_type: EventType, row: &SourceRow, clock: &dyn Clock) -> Self {
        match event_type {
            EventType::OrderSnapshot => Self::order_snapshot(row),
            EventType::ItemAdded => Self::item_added(row),
            EventType::PaymentReceived => Self::payment_received(row, clock),
        }
    }

    /// Key used to partition this envelope on the log.
    ///
    /// Falls back to [`UNKNOWN_PARTITION_KEY`] so the log never receives an
    /// empty key.
    #[must_use]
    pub fn partition_key(&self) -> &str {
        if self.order_id.trim().is_empty() {
            UNKNOWN_PARTITION_KEY
        } else {
            &self.order_id
        }
    }

    /// Look up a raw source column.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).map(String::as_str)
    }

    /// Serialize to the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::SerializationError(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::DeserializationError`] if the bytes are not a
    /// valid envelope (including an unknown `event_type`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Envelope {{ type: {}, order_id: {}, fields: {} }}",
            self.event_type,
            self.partition_key(),
            self.data.len()
        )
    }
}

fn column(row: &SourceRow, name: &str) -> String {
    row.get(name).cloned().unwrap_or_default()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

// Producers in other languages emit numeric cells as JSON numbers; keep them
// as their textual form so projection coerces them like any other string.
fn lenient_data<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect())
}
