use core::str::FromStr;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockwise_catalog::{ProductId, Sku};
use stockwise_core::{
    AggregateId, DomainError, DomainResult, Lifecycle, StatusChange, TenantId,
    TransitionPolicy, check_transition,
};

/// Purchase order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Vendor reference. Vendors themselves are managed outside the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(pub AggregateId);

impl core::fmt::Display for VendorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    Confirmed,
    Received,
    PartiallyReceived,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub const ALL: [PurchaseOrderStatus; 6] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Sent,
        PurchaseOrderStatus::Confirmed,
        PurchaseOrderStatus::Received,
        PurchaseOrderStatus::PartiallyReceived,
        PurchaseOrderStatus::Cancelled,
    ];

    /// Statuses whose outstanding quantities count as incoming stock.
    pub const AWAITING_RECEIPT: [PurchaseOrderStatus; 4] = [
        PurchaseOrderStatus::Draft,
        PurchaseOrderStatus::Sent,
        PurchaseOrderStatus::Confirmed,
        PurchaseOrderStatus::PartiallyReceived,
    ];

    pub fn is_awaiting_receipt(self) -> bool {
        Self::AWAITING_RECEIPT.contains(&self)
    }

    /// No further receipts or status changes.
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::Cancelled
        )
    }
}

impl Lifecycle for PurchaseOrderStatus {
    fn label(self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "DRAFT",
            PurchaseOrderStatus::Sent => "SENT",
            PurchaseOrderStatus::Confirmed => "CONFIRMED",
            PurchaseOrderStatus::Received => "RECEIVED",
            PurchaseOrderStatus::PartiallyReceived => "PARTIALLY_RECEIVED",
            PurchaseOrderStatus::Cancelled => "CANCELLED",
        }
    }

    // Receipt statuses are only reached through `receive`, so they are not listed here.
    fn successors(self) -> &'static [Self] {
        use PurchaseOrderStatus::*;
        match self {
            Draft => &[Sent, Confirmed, Cancelled],
            Sent => &[Confirmed, Cancelled],
            Confirmed => &[Cancelled],
            PartiallyReceived => &[Cancelled],
            Received | Cancelled => &[],
        }
    }
}

impl FromStr for PurchaseOrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.label() == s)
            .ok_or_else(|| {
                DomainError::validation(format!("unknown purchase order status '{s}'"))
            })
    }
}

/// Purchase order line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoLine {
    pub product_id: ProductId,
    pub sku: Sku,
    pub quantity: i64,
    pub received_quantity: i64,
    pub unit_cost: Decimal,
}

impl PoLine {
    /// Units still expected on this line (never negative).
    pub fn outstanding(&self) -> i64 {
        (self.quantity - self.received_quantity).max(0)
    }

    pub fn is_closed(&self) -> bool {
        self.received_quantity >= self.quantity
    }
}

/// Requested line, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoLineRequest {
    pub sku: String,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

/// A validated line whose product still has to be resolved from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPoLine {
    pub sku: Sku,
    pub quantity: i64,
    pub unit_cost: Decimal,
}

impl ValidatedPoLine {
    pub fn resolve(self, product_id: ProductId) -> PoLine {
        PoLine {
            product_id,
            sku: self.sku,
            quantity: self.quantity,
            received_quantity: 0,
            unit_cost: self.unit_cost,
        }
    }
}

/// Create-purchase-order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub vendor_id: VendorId,
    pub items: Vec<PoLineRequest>,
    /// Defaults to the sum of `quantity * unit_cost` over the items.
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub expected_date: Option<DateTime<Utc>>,
}

impl CreatePurchaseOrder {
    pub fn validate(&self) -> DomainResult<Vec<ValidatedPoLine>> {
        if self.items.is_empty() {
            return Err(DomainError::validation(
                "a purchase order needs at least one item",
            ));
        }
        if self.total_amount.is_some_and(|t| t < Decimal::ZERO) {
            return Err(DomainError::validation("total_amount cannot be negative"));
        }

        let mut seen = HashSet::new();
        let lines = self
            .items
            .iter()
            .map(|item| {
                let sku = Sku::parse(&item.sku)?;
                if !seen.insert(sku.clone()) {
                    return Err(DomainError::validation(format!(
                        "SKU {sku} appears more than once"
                    )));
                }
                if item.quantity < 1 {
                    return Err(DomainError::validation(format!(
                        "quantity for {sku} must be at least 1"
                    )));
                }
                if item.unit_cost < Decimal::ZERO {
                    return Err(DomainError::validation(format!(
                        "unit_cost for {sku} cannot be negative"
                    )));
                }
                Ok(ValidatedPoLine {
                    sku,
                    quantity: item.quantity,
                    unit_cost: item.unit_cost,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        purchase_total(lines.iter().map(|line| (line.unit_cost, line.quantity)))?;
        Ok(lines)
    }
}

/// `sum(unit_cost * quantity)`; a validation error when it does not fit a `Decimal`.
pub fn purchase_total(lines: impl IntoIterator<Item = (Decimal, i64)>) -> DomainResult<Decimal> {
    lines
        .into_iter()
        .try_fold(Decimal::ZERO, |total, (unit_cost, quantity)| {
            unit_cost
                .checked_mul(Decimal::from(quantity))
                .and_then(|line_total| total.checked_add(line_total))
        })
        .ok_or_else(|| DomainError::validation("order total out of range"))
}

/// Purchase order record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: PurchaseOrderId,
    pub tenant_id: TenantId,
    pub vendor_id: VendorId,
    pub items: Vec<PoLine>,
    pub status: PurchaseOrderStatus,
    pub total_amount: Decimal,
    pub expected_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    /// New `DRAFT` order; no stock effect.
    pub fn create(
        id: PurchaseOrderId,
        tenant_id: TenantId,
        request: CreatePurchaseOrder,
        items: Vec<PoLine>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let computed = purchase_total(items.iter().map(|line| (line.unit_cost, line.quantity)))?;

        Ok(Self {
            id,
            tenant_id,
            vendor_id: request.vendor_id,
            items,
            status: PurchaseOrderStatus::Draft,
            total_amount: request.total_amount.unwrap_or(computed),
            expected_date: request.expected_date,
            received_date: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("purchase order {}", self.id)));
        }
        Ok(())
    }

    pub fn line(&self, sku: &Sku) -> Option<&PoLine> {
        self.items.iter().find(|line| &line.sku == sku)
    }

    pub fn all_lines_closed(&self) -> bool {
        self.items.iter().all(PoLine::is_closed)
    }

    /// Plain status change. `RECEIVED` and `PARTIALLY_RECEIVED` are reachable
    /// only through a receipt.
    pub fn change_status(
        &mut self,
        next: PurchaseOrderStatus,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange<PurchaseOrderStatus>> {
        if self.status.is_closed() {
            return Err(DomainError::invalid_state(format!(
                "purchase order is {} and cannot change status",
                self.status.label()
            )));
        }
        if matches!(
            next,
            PurchaseOrderStatus::Received | PurchaseOrderStatus::PartiallyReceived
        ) {
            return Err(DomainError::validation(format!(
                "{} is set by receiving goods, not by a status update",
                next.label()
            )));
        }

        let change = check_transition(self.status, next, policy)?;
        self.status = next;
        self.updated_at = now;
        Ok(change)
    }
}
