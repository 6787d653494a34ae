//! Goods receipt against a purchase order.
//!
//! Receiving is capped per line at the outstanding quantity, so a line can
//! never be received beyond what was ordered, however many shipments arrive.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockwise_catalog::{ProductId, Sku};
use stockwise_core::{DomainError, DomainResult, Lifecycle};

use crate::order::{PurchaseOrder, PurchaseOrderStatus};

/// One received item as reported by the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub sku: String,
    pub quantity: i64,
    /// Invoiced cost when it differs from the contracted one.
    #[serde(default)]
    pub actual_unit_cost: Option<Decimal>,
}

/// Stock that has to be booked in for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedGoods {
    pub product_id: ProductId,
    pub sku: Sku,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiptOutcome {
    pub received: Vec<ReceivedGoods>,
    /// Lines ignored because the SKU is not on the order or is already fully received.
    pub skipped: Vec<Sku>,
    /// Total price variance added to the order total.
    pub variance: Decimal,
}

impl PurchaseOrder {
    /// Apply a shipment to the order.
    ///
    /// Updates received quantities, unit costs, total and status. The stock
    /// side is returned in the outcome and must be booked in the same
    /// transaction that persists the order.
    pub fn receive(
        &mut self,
        lines: &[ReceiptLine],
        now: DateTime<Utc>,
    ) -> DomainResult<ReceiptOutcome> {
        if self.status.is_closed() {
            return Err(DomainError::invalid_state(format!(
                "Cannot receive items for a PO with status {}",
                self.status.label()
            )));
        }
        if lines.is_empty() {
            return Err(DomainError::validation("a receipt needs at least one item"));
        }

        let mut parsed = Vec::with_capacity(lines.len());
        for line in lines {
            let sku = Sku::parse(&line.sku)?;
            if line.quantity < 1 {
                return Err(DomainError::validation(format!(
                    "received quantity for {sku} must be at least 1"
                )));
            }
            if line.actual_unit_cost.is_some_and(|c| c < Decimal::ZERO) {
                return Err(DomainError::validation(format!(
                    "actual_unit_cost for {sku} cannot be negative"
                )));
            }
            parsed.push((sku, line.quantity, line.actual_unit_cost));
        }

        // Work on a copy so a rejected receipt leaves the order as it was.
        let mut items = self.items.clone();
        let mut outcome = ReceiptOutcome::default();
        for (sku, requested, actual_cost) in parsed {
            let Some(line) = items.iter_mut().find(|l| l.sku == sku) else {
                outcome.skipped.push(sku);
                continue;
            };

            let to_receive = requested.min(line.outstanding());
            if to_receive <= 0 {
                outcome.skipped.push(sku);
                continue;
            }

            if let Some(actual) = actual_cost {
                if actual != line.unit_cost {
                    outcome.variance = actual
                        .checked_sub(line.unit_cost)
                        .and_then(|delta| delta.checked_mul(Decimal::from(line.quantity)))
                        .and_then(|variance| outcome.variance.checked_add(variance))
                        .ok_or_else(|| {
                            DomainError::validation(format!("price variance for {sku} out of range"))
                        })?;
                    line.unit_cost = actual;
                }
            }

            line.received_quantity += to_receive;
            outcome.received.push(ReceivedGoods {
                product_id: line.product_id,
                sku,
                quantity: to_receive,
            });
        }

        let total_amount = self
            .total_amount
            .checked_add(outcome.variance)
            .ok_or_else(|| DomainError::validation("order total out of range"))?;

        self.items = items;
        self.total_amount = total_amount;
        if self.all_lines_closed() {
            self.status = PurchaseOrderStatus::Received;
            self.received_date = Some(now);
        } else {
            self.status = PurchaseOrderStatus::PartiallyReceived;
        }
        self.updated_at = now;

        Ok(outcome)
    }
}
