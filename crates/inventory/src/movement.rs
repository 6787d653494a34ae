use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockwise_catalog::{ProductId, Sku};
use stockwise_core::{AggregateId, DomainError, DomainResult, TenantId, UserId};

/// Movement identifier (UUIDv7, so id order follows recording order).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub AggregateId);

impl MovementId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementDirection {
    In,
    Out,
}

impl MovementDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementDirection::In => "IN",
            MovementDirection::Out => "OUT",
        }
    }
}

impl FromStr for MovementDirection {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            other => Err(DomainError::validation(format!(
                "unknown movement direction '{other}'"
            ))),
        }
    }
}

/// Why stock moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementReason {
    Purchase,
    Sale,
    ReturnFromCustomer,
    ReturnToSupplier,
    /// Manual correction after a count; the default for ad-hoc adjustments.
    #[default]
    StockTake,
    Damaged,
}

impl MovementReason {
    pub const ALL: [MovementReason; 6] = [
        MovementReason::Purchase,
        MovementReason::Sale,
        MovementReason::ReturnFromCustomer,
        MovementReason::ReturnToSupplier,
        MovementReason::StockTake,
        MovementReason::Damaged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementReason::Purchase => "PURCHASE",
            MovementReason::Sale => "SALE",
            MovementReason::ReturnFromCustomer => "RETURN_FROM_CUSTOMER",
            MovementReason::ReturnToSupplier => "RETURN_TO_SUPPLIER",
            MovementReason::StockTake => "STOCK_TAKE",
            MovementReason::Damaged => "DAMAGED",
        }
    }
}

impl FromStr for MovementReason {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement reason '{s}'")))
    }
}

/// Business document that caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum MovementReference {
    SalesOrder(AggregateId),
    PurchaseOrder(AggregateId),
}

impl MovementReference {
    pub fn kind(&self) -> &'static str {
        match self {
            MovementReference::SalesOrder(_) => "sales_order",
            MovementReference::PurchaseOrder(_) => "purchase_order",
        }
    }

    pub fn id(&self) -> AggregateId {
        match self {
            MovementReference::SalesOrder(id) | MovementReference::PurchaseOrder(id) => *id,
        }
    }

    /// Rebuild from the stored `(kind, id)` pair.
    pub fn from_parts(kind: &str, id: AggregateId) -> DomainResult<Self> {
        match kind {
            "sales_order" => Ok(Self::SalesOrder(id)),
            "purchase_order" => Ok(Self::PurchaseOrder(id)),
            other => Err(DomainError::validation(format!(
                "unknown movement reference kind '{other}'"
            ))),
        }
    }
}

/// Immutable record of one stock change. Never updated, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: Sku,
    pub direction: MovementDirection,
    /// Always positive; the sign lives in `direction`.
    pub quantity: i64,
    pub reason: MovementReason,
    pub reference: Option<MovementReference>,
    pub actor: UserId,
    pub recorded_at: DateTime<Utc>,
}

impl StockMovement {
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        tenant_id: TenantId,
        product_id: ProductId,
        sku: Sku,
        direction: MovementDirection,
        quantity: i64,
        reason: MovementReason,
        reference: Option<MovementReference>,
        actor: UserId,
        recorded_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "movement quantity for {sku} must be positive, got {quantity}"
            )));
        }

        Ok(Self {
            id: MovementId::new(AggregateId::new()),
            tenant_id,
            product_id,
            sku,
            direction,
            quantity,
            reason,
            reference,
            actor,
            recorded_at,
        })
    }

    /// Quantity with the direction applied (`IN` positive, `OUT` negative).
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            MovementDirection::In => self.quantity,
            MovementDirection::Out => -self.quantity,
        }
    }
}

/// History filter; both fields narrow the result when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    #[serde(default)]
    pub product_id: Option<ProductId>,
    #[serde(default)]
    pub sku: Option<Sku>,
}

impl MovementFilter {
    pub fn for_sku(sku: Sku) -> Self {
        Self {
            product_id: None,
            sku: Some(sku),
        }
    }

    pub fn matches(&self, movement: &StockMovement) -> bool {
        self.product_id.is_none_or(|id| movement.product_id == id)
            && self.sku.as_ref().is_none_or(|sku| &movement.sku == sku)
    }
}

/// Newest first; ties on the timestamp fall back to id order.
pub fn sort_newest_first(movements: &mut [StockMovement]) {
    movements.sort_by(|a, b| {
        b.recorded_at
            .cmp(&a.recorded_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
