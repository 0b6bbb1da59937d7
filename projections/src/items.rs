//! Items projection. Natural key `(order_id, order_item_id)`.

use chrono::NaiveDateTime;
use orderstream_core::event::{Envelope, EventType};
use orderstream_core::payload::Payload;
use orderstream_core::projection::{DomainProjection, OutputRecord, Rejection};
use orderstream_core::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the items dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    /// Order the item belongs to.
    pub order_id: String,
    /// Position of the item within the order.
    pub order_item_id: i32,
    /// Product sold.
    pub product_id: Option<String>,
    /// Seller fulfilling the item.
    pub seller_id: Option<String>,
    /// Latest date the seller must hand the item to the carrier.
    pub shipping_limit_ts: Option<NaiveDateTime>,
    /// Item price.
    pub price: f64,
    /// Freight charged for the item.
    pub freight_value: Option<f64>,
    /// Start of the micro-batch that produced this row.
    pub ingested_at: DateTime<Utc>,
}

impl OutputRecord for ItemRecord {
    type Key = (String, i32);

    fn key(&self) -> (String, i32) {
        (self.order_id.clone(), self.order_item_id)
    }
}

/// Projection of `ITEM_ADDED` envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ItemsProjection;

impl DomainProjection for ItemsProjection {
    type Record = ItemRecord;

    fn name(&self) -> &'static str {
        "items"
    }

    fn event_type(&self) -> EventType {
        EventType::ItemAdded
    }

    fn project(
        &self,
        envelope: &Envelope,
        ingested_at: DateTime<Utc>,
    ) -> Result<ItemRecord, Rejection> {
        let Payload::Item(item) = envelope.decode() else {
            return Err(Rejection::WrongVariant {
                expected: EventType::ItemAdded,
                found: envelope.event_type,
            });
        };

        let shipping_limit_ts = item.shipping_limit_ts?;
        let freight_value = item.freight_value?;
        let order_item_id = item
            .order_item_id?
            .ok_or(Rejection::MissingField("order_item_id"))?;
        let price = item.price?.ok_or(Rejection::MissingField("price"))?;
        let order_id = item.order_id.ok_or(Rejection::MissingField("order_id"))?;

        Ok(ItemRecord {
            order_id,
            order_item_id,
            product_id: item.product_id,
            seller_id: item.seller_id,
            shipping_limit_ts,
            price,
            freight_value,
            ingested_at,
        })
    }
}
