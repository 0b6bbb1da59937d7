//! Strongly-typed views of envelope payloads.
//!
//! An [`Envelope`] carries its source row as untyped strings. Projection
//! decodes it exactly once into the variant's payload struct, where every
//! typed column is a [`Field`]: `Ok(None)` for a blank cell, `Ok(Some(_))` for
//! a parsed value, and `Err(FieldError)` for a value that does not coerce. A
//! projector can then drop one bad record without failing its batch.
//!
//! # Coercion Rules
//!
//! - Blank (empty or whitespace-only) cells are null.
//! - Timestamps: `YYYY-MM-DD HH:MM:SS[.f]`, `YYYY-MM-DDTHH:MM:SS[.f]`,
//!   RFC 3339 (converted to UTC), or a bare `YYYY-MM-DD` (midnight).
//! - Integers: decimal integers, or integral decimals such as `"1.0"`.
//! - Doubles: any finite decimal; `NaN` and infinities do not coerce.
//! - Categorical text (`order_status`, `payment_type`) is trimmed and
//!   lower-cased.

use crate::event::{Envelope, EventType};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

/// A typed column: blank cells are `Ok(None)`, bad cells are `Err`.
pub type Field<T> = Result<Option<T>, FieldError>;

/// A source cell that could not be coerced to its declared type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("column '{column}' value {value:?} is not a valid {expected}")]
pub struct FieldError {
    /// Source column name.
    pub column: &'static str,
    /// The offending raw value.
    pub value: String,
    /// Name of the expected type.
    pub expected: &'static str,
}

/// Decoded payload of an `ORDER_SNAPSHOT` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPayload {
    /// Order identifier, `None` when blank.
    pub order_id: Option<String>,
    /// Customer identifier, `None` when blank.
    pub customer_id: Option<String>,
    /// Normalized order status.
    pub order_status: Option<String>,
    /// `order_purchase_timestamp`
    pub purchase_ts: Field<NaiveDateTime>,
    /// `order_approved_at`
    pub approved_ts: Field<NaiveDateTime>,
    /// `order_delivered_carrier_at`
    pub carrier_ts: Field<NaiveDateTime>,
    /// `order_delivered_customer_date`
    pub delivered_ts: Field<NaiveDateTime>,
    /// `order_estimated_delivery_date`
    pub estimated_ts: Field<NaiveDateTime>,
}

/// Decoded payload of an `ITEM_ADDED` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPayload {
    /// Order identifier, `None` when blank.
    pub order_id: Option<String>,
    /// Product identifier, `None` when blank.
    pub product_id: Option<String>,
    /// Seller identifier, `None` when blank.
    pub seller_id: Option<String>,
    /// Position of the item within its order.
    pub order_item_id: Field<i32>,
    /// `shipping_limit_date`
    pub shipping_limit_ts: Field<NaiveDateTime>,
    /// Item price.
    pub price: Field<f64>,
    /// Freight charged for the item.
    pub freight_value: Field<f64>,
}

/// Decoded payload of a `PAYMENT_RECEIVED` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentPayload {
    /// Order identifier, `None` when blank.
    pub order_id: Option<String>,
    /// Sequence number of the payment within its order.
    pub payment_sequential: Field<i32>,
    /// Normalized payment type.
    pub payment_type: Option<String>,
    /// Number of installments.
    pub payment_installments: Field<i32>,
    /// Amount paid.
    pub payment_value: Field<f64>,
}

/// Variant-tagged typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Order snapshot.
    Order(OrderPayload),
    /// Line item.
    Item(ItemPayload),
    /// Payment.
    Payment(PaymentPayload),
}

impl Envelope {
    /// Decode the raw field bag into the typed payload for this variant.
    ///
    /// Decoding itself never fails; per-column failures are carried in the
    /// payload's [`Field`] values.
    #[must_use]
    pub fn decode(&self) -> Payload {
        match self.event_type {
            EventType::OrderSnapshot => Payload::Order(OrderPayload {
                order_id: non_blank(Some(&self.order_id)),
                customer_id: non_blank(self.customer_id.as_deref()),
                order_status: normalize(self.order_status.as_deref()),
                purchase_ts: self.timestamp("order_purchase_timestamp"),
                approved_ts: self.timestamp("order_approved_at"),
                carrier_ts: self.timestamp("order_delivered_carrier_at"),
                delivered_ts: self.timestamp("order_delivered_customer_date"),
                estimated_ts: self.timestamp("order_estimated_delivery_date"),
            }),
            EventType::ItemAdded => Payload::Item(ItemPayload {
                order_id: non_blank(Some(&self.order_id)),
                product_id: non_blank(self.product_id.as_deref()),
                seller_id: non_blank(self.seller_id.as_deref()),
                order_item_id: parse_int("order_item_id", self.field("order_item_id")),
                shipping_limit_ts: self.timestamp("shipping_limit_date"),
                price: parse_double("price", self.field("price")),
                freight_value: parse_double("freight_value", self.field("freight_value")),
            }),
            EventType::PaymentReceived => Payload::Payment(PaymentPayload {
                order_id: non_blank(Some(&self.order_id)),
                payment_sequential: parse_int(
                    "payment_sequential",
                    self.field("payment_sequential"),
                ),
                payment_type: normalize(self.field("payment_type")),
                payment_installments: parse_int(
                    "payment_installments",
                    self.field("payment_installments"),
                ),
                payment_value: parse_double("payment_value", self.field("payment_value")),
            }),
        }
    }

    fn timestamp(&self, column: &'static str) -> Field<NaiveDateTime> {
        parse_timestamp(column, self.field(column))
    }
}

/// `Some(trimmed)` unless the value is absent or blank.
#[must_use]
pub fn non_blank(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Trim and lower-case a categorical value.
#[must_use]
pub fn normalize(raw: Option<&str>) -> Option<String> {
    non_blank(raw).map(|s| s.to_lowercase())
}

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Coerce a cell to a timestamp.
///
/// # Errors
///
/// Returns [`FieldError`] when a non-blank value matches none of the
/// accepted layouts.
pub fn parse_timestamp(column: &'static str, raw: Option<&str>) -> Field<NaiveDateTime> {
    let Some(value) = non_blank(raw) else {
        return Ok(None);
    };

    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(&value, format) {
            return Ok(Some(ts));
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(&value) {
        return Ok(Some(ts.naive_utc()));
    }
    if let Some(midnight) = NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(Some(midnight));
    }

    Err(FieldError {
        column,
        value,
        expected: "timestamp",
    })
}

/// Coerce a cell to a 32-bit integer.
///
/// # Errors
///
/// Returns [`FieldError`] when a non-blank value is not an integer (or an
/// integral decimal) in range.
#[allow(clippy::cast_possible_truncation)] // Range checked before the cast
pub fn parse_int(column: &'static str, raw: Option<&str>) -> Field<i32> {
    let Some(value) = non_blank(raw) else {
        return Ok(None);
    };

    if let Ok(parsed) = value.parse::<i32>() {
        return Ok(Some(parsed));
    }
    match value.parse::<f64>() {
        Ok(parsed)
            if parsed.is_finite()
                && parsed.fract() == 0.0
                && parsed >= f64::from(i32::MIN)
                && parsed <= f64::from(i32::MAX) =>
        {
            Ok(Some(parsed as i32))
        }
        _ => Err(FieldError {
            column,
            value,
            expected: "integer",
        }),
    }
}

/// Coerce a cell to a finite double.
///
/// # Errors
///
/// Returns [`FieldError`] when a non-blank value is not a finite number.
pub fn parse_double(column: &'static str, raw: Option<&str>) -> Field<f64> {
    let Some(value) = non_blank(raw) else {
        return Ok(None);
    };

    match value.parse::<f64>() {
        Ok(parsed) if parsed.is_finite() => Ok(Some(parsed)),
        _ => Err(FieldError {
            column,
            value,
            expected: "double",
        }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::event::SourceRow;

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn timestamps_accept_space_t_and_date_layouts() {
        assert_eq!(
            parse_timestamp("c", Some("2018-01-01 10:00:00")).unwrap(),
            Some(ts("2018-01-01 10:00:00"))
        );
        assert_eq!(
            parse_timestamp("c", Some("2018-01-01T10:00:00")).unwrap(),
            Some(ts("2018-01-01 10:00:00"))
        );
        assert_eq!(
            parse_timestamp("c", Some("2018-01-01 10:00:00.250")).unwrap(),
            Some(ts("2018-01-01 10:00:00") + chrono::Duration::milliseconds(250))
        );
        assert_eq!(
            parse_timestamp("c", Some("2018-01-10")).unwrap(),
            Some(ts("2018-01-10 00:00:00"))
        );
        assert_eq!(
            parse_timestamp("c", Some("2018-01-01T12:00:00+02:00")).unwrap(),
            Some(ts("2018-01-01 10:00:00"))
        );
    }

    #[test]
    fn blank_cells_are_null_not_errors() {
        assert_eq!(parse_timestamp("c", Some("  ")).unwrap(), None);
        assert_eq!(parse_timestamp("c", None).unwrap(), None);
        assert_eq!(parse_int("c", Some("")).unwrap(), None);
        assert_eq!(parse_double("c", None).unwrap(), None);
    }

    #[test]
    fn bad_cells_report_column_and_value() {
        let err = parse_double("price", Some("12,50")).unwrap_err();
        assert_eq!(err.column, "price");
        assert_eq!(err.value, "12,50");
        assert_eq!(err.expected, "double");

        assert!(parse_timestamp("c", Some("yesterday")).is_err());
        assert!(parse_int("c", Some("1.5")).is_err());
        assert!(parse_int("c", Some("99999999999")).is_err());
        assert!(parse_double("c", Some("NaN")).is_err());
        assert!(parse_double("c", Some("inf")).is_err());
    }

    #[test]
    fn integers_accept_integral_decimals() {
        assert_eq!(parse_int("c", Some("3")).unwrap(), Some(3));
        assert_eq!(parse_int("c", Some(" 2.0 ")).unwrap(), Some(2));
        assert_eq!(parse_int("c", Some("-4")).unwrap(), Some(-4));
    }

    #[test]
    fn decodes_payment_payload() {
        let row: SourceRow = [
            ("order_id", "o-1"),
            ("payment_sequential", "1"),
            ("payment_type", "  Credit_Card "),
            ("payment_installments", "8"),
            ("payment_value", "99.33"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let envelope = Envelope::payment_received(&row, &crate::environment::SystemClock);
        let Payload::Payment(payment) = envelope.decode() else {
            unreachable!("payment envelope decodes to payment payload");
        };

        assert_eq!(payment.order_id.as_deref(), Some("o-1"));
        assert_eq!(payment.payment_sequential, Ok(Some(1)));
        assert_eq!(payment.payment_type.as_deref(), Some("credit_card"));
        assert_eq!(payment.payment_installments, Ok(Some(8)));
        assert_eq!(payment.payment_value, Ok(Some(99.33)));
    }

    #[test]
    fn decodes_order_payload_with_blank_dates() {
        let row: SourceRow = [
            ("order_id", "o-1"),
            ("customer_id", "c-1"),
            ("order_status", "SHIPPED"),
            ("order_purchase_timestamp", "2018-01-01 10:00:00"),
            ("order_delivered_customer_date", ""),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let Payload::Order(order) = Envelope::order_snapshot(&row).decode() else {
            unreachable!("order envelope decodes to order payload");
        };

        assert_eq!(order.order_status.as_deref(), Some("shipped"));
        assert_eq!(order.purchase_ts, Ok(Some(ts("2018-01-01 10:00:00"))));
        assert_eq!(order.delivered_ts, Ok(None));
        assert_eq!(order.approved_ts, Ok(None));
    }
}
