//! Payments projection. Natural key `(order_id, payment_sequential)`.
//!
//! Only strictly positive payment values are kept.

use orderstream_core::event::{Envelope, EventType};
use orderstream_core::payload::Payload;
use orderstream_core::projection::{DomainProjection, OutputRecord, Rejection};
use orderstream_core::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the payments dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Order the payment settles.
    pub order_id: String,
    /// Sequence of the payment within the order.
    pub payment_sequential: Option<i32>,
    /// Lower-cased, trimmed payment method.
    pub payment_type: Option<String>,
    /// Number of installments.
    pub payment_installments: Option<i32>,
    /// Amount paid, always greater than zero.
    pub payment_value: f64,
    /// Start of the micro-batch that produced this row.
    pub ingested_at: DateTime<Utc>,
}

impl OutputRecord for PaymentRecord {
    type Key = (String, Option<i32>);

    fn key(&self) -> (String, Option<i32>) {
        (self.order_id.clone(), self.payment_sequential)
    }
}

/// Projection of `PAYMENT_RECEIVED` envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentsProjection;

impl DomainProjection for PaymentsProjection {
    type Record = PaymentRecord;

    fn name(&self) -> &'static str {
        "payments"
    }

    fn event_type(&self) -> EventType {
        EventType::PaymentReceived
    }

    fn project(
        &self,
        envelope: &Envelope,
        ingested_at: DateTime<Utc>,
    ) -> Result<PaymentRecord, Rejection> {
        let Payload::Payment(payment) = envelope.decode() else {
            return Err(Rejection::WrongVariant {
                expected: EventType::PaymentReceived,
                found: envelope.event_type,
            });
        };

        let payment_sequential = payment.payment_sequential?;
        let payment_installments = payment.payment_installments?;
        let payment_value = payment
            .payment_value?
            .ok_or(Rejection::MissingField("payment_value"))?;
        let order_id = payment
            .order_id
            .ok_or(Rejection::MissingField("order_id"))?;

        if payment_value <= 0.0 {
            return Err(Rejection::Invalid {
                column: "payment_value",
                reason: format!("must be greater than zero, got {payment_value}"),
            });
        }

        Ok(PaymentRecord {
            order_id,
            payment_sequential,
            payment_type: payment.payment_type,
            payment_installments,
            payment_value,
            ingested_at,
        })
    }
}
