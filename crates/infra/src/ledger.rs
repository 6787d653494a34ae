//! Stock mutation engine: every stock change is a conditional update plus the
//! matching movement, written in the caller's transaction.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use stockwise_catalog::Sku;
use stockwise_core::{AggregateId, DomainError, TenantId, UserId};
use stockwise_inventory::{MovementDirection, MovementReason, MovementReference, StockMovement};

use crate::store::{AdjustStockError, LedgerTransaction, StoreError};

/// Failure of a ledger operation: either a business rule or the storage backend.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            LedgerError::Domain(err) => Some(err),
            LedgerError::Store(_) => None,
        }
    }
}

/// One requested stock change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockChange {
    pub tenant_id: TenantId,
    pub sku: Sku,
    /// Units to move; must be positive.
    pub quantity: i64,
    pub reason: MovementReason,
    pub reference: Option<MovementReference>,
    pub actor: UserId,
}

/// Stateless; safe to share and copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StockMutationEngine;

impl StockMutationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Take stock out. Fails with `InsufficientStock` if it would go below zero.
    pub async fn deduct(
        &self,
        tx: &mut dyn LedgerTransaction,
        change: StockChange,
    ) -> Result<StockMovement, LedgerError> {
        self.apply(tx, change, MovementDirection::Out).await
    }

    /// Put stock back (returns, cancellations, positive corrections).
    pub async fn restore(
        &self,
        tx: &mut dyn LedgerTransaction,
        change: StockChange,
    ) -> Result<StockMovement, LedgerError> {
        self.apply(tx, change, MovementDirection::In).await
    }

    /// Book goods in against a purchase order.
    pub async fn receive(
        &self,
        tx: &mut dyn LedgerTransaction,
        tenant_id: TenantId,
        actor: UserId,
        sku: Sku,
        quantity: i64,
        purchase_order: AggregateId,
    ) -> Result<StockMovement, LedgerError> {
        let change = StockChange {
            tenant_id,
            sku,
            quantity,
            reason: MovementReason::Purchase,
            reference: Some(MovementReference::PurchaseOrder(purchase_order)),
            actor,
        };
        self.apply(tx, change, MovementDirection::In).await
    }

    async fn apply(
        &self,
        tx: &mut dyn LedgerTransaction,
        change: StockChange,
        direction: MovementDirection,
    ) -> Result<StockMovement, LedgerError> {
        if change.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity for {} must be positive, got {}",
                change.sku, change.quantity
            ))
            .into());
        }

        let delta = match direction {
            MovementDirection::In => change.quantity,
            MovementDirection::Out => -change.quantity,
        };

        let level = tx
            .adjust_stock(change.tenant_id, &change.sku, delta, 0)
            .await
            .map_err(|err| match err {
                AdjustStockError::NotFound(sku) => {
                    LedgerError::Domain(DomainError::not_found(format!("SKU {sku}")))
                }
                AdjustStockError::Insufficient { sku, available } => {
                    debug!(%sku, available, requested = change.quantity, "deduction rejected");
                    LedgerError::Domain(DomainError::insufficient_stock(
                        sku.as_str(),
                        available,
                        change.quantity,
                    ))
                }
                AdjustStockError::OutOfRange(sku) => LedgerError::Domain(
                    DomainError::validation(format!("stock for {sku} out of range")),
                ),
                AdjustStockError::Store(err) => LedgerError::Store(err),
            })?;

        let movement = StockMovement::record(
            change.tenant_id,
            level.product_id,
            change.sku,
            direction,
            change.quantity,
            change.reason,
            change.reference,
            change.actor,
            Utc::now(),
        )?;
        tx.append_movement(&movement).await?;

        debug!(
            sku = %movement.sku,
            direction = movement.direction.as_str(),
            quantity = movement.quantity,
            stock = level.stock,
            "stock moved"
        );
        Ok(movement)
    }
}
