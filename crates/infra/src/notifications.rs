//! Post-commit notifications (`order-created`, `po-updated`).
//!
//! Publishing is fire-and-forget: it happens after the transaction committed,
//! and a failed publish is logged, never propagated.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use stockwise_core::{AggregateId, TenantId};
use stockwise_events::{Event, EventBus, EventEnvelope};
use stockwise_purchasing::PurchaseOrder;
use stockwise_sales::SalesOrder;

pub const ORDER_CREATED: &str = "order-created";
pub const PO_UPDATED: &str = "po-updated";

/// Payload is the full record as committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LedgerNotification {
    OrderCreated(SalesOrder),
    PurchaseOrderUpdated(PurchaseOrder),
}

impl LedgerNotification {
    pub fn aggregate_id(&self) -> AggregateId {
        match self {
            LedgerNotification::OrderCreated(order) => order.id.0,
            LedgerNotification::PurchaseOrderUpdated(order) => order.id.0,
        }
    }

    pub fn aggregate_type(&self) -> &'static str {
        match self {
            LedgerNotification::OrderCreated(_) => "sales_order",
            LedgerNotification::PurchaseOrderUpdated(_) => "purchase_order",
        }
    }

    /// The record as JSON, for transports that carry plain JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Event for LedgerNotification {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerNotification::OrderCreated(_) => ORDER_CREATED,
            LedgerNotification::PurchaseOrderUpdated(_) => PO_UPDATED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerNotification::OrderCreated(order) => order.updated_at,
            LedgerNotification::PurchaseOrderUpdated(order) => order.updated_at,
        }
    }
}

pub type NotificationEnvelope = EventEnvelope<LedgerNotification>;

/// Wraps notifications in tenant-scoped envelopes and hands them to the bus.
#[derive(Debug, Clone)]
pub struct Notifier<B> {
    bus: B,
}

impl<B> Notifier<B>
where
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn publish(&self, tenant_id: TenantId, notification: LedgerNotification) {
        let aggregate_id = notification.aggregate_id();
        let aggregate_type = notification.aggregate_type();
        let topic = notification.event_type();

        let envelope = EventEnvelope::wrap(tenant_id, aggregate_id, aggregate_type, notification);
        if let Err(err) = self.bus.publish(envelope) {
            warn!(
                tenant_id = %tenant_id,
                aggregate_id = %aggregate_id,
                topic,
                error = %err,
                "notification publish failed; change stays committed"
            );
        }
    }
}
