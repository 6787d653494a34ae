//! Low-stock alerts: variants at or under their reorder level once stock
//! already on order is counted in.

use std::collections::HashMap;

use serde::Serialize;

use stockwise_catalog::{ProductId, Sku};
use stockwise_core::TenantId;
use stockwise_purchasing::PurchaseOrder;

use crate::ledger::LedgerResult;
use crate::store::{LedgerStore, VariantRecord};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub product_name: String,
    pub category: String,
    pub sku: Sku,
    pub variant_name: String,
    pub current_stock: i64,
    pub reorder_level: i64,
    /// Outstanding quantity on purchase orders still awaiting receipt.
    pub pending_stock: i64,
}

/// Stateless projection; every call reads the store afresh.
#[derive(Debug, Clone)]
pub struct LowStockProjection<S> {
    store: S,
}

impl<S> LowStockProjection<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn alerts(&self, tenant_id: TenantId) -> LedgerResult<Vec<LowStockAlert>> {
        let at_risk = self.store.low_stock_variants(tenant_id).await?;
        if at_risk.is_empty() {
            return Ok(Vec::new());
        }

        let open_orders = self
            .store
            .list_purchase_orders(tenant_id, None)
            .await?
            .into_iter()
            .filter(|po| po.status.is_awaiting_receipt())
            .collect::<Vec<_>>();

        Ok(compute_alerts(at_risk, &open_orders))
    }
}

/// Pending quantity per SKU over orders awaiting receipt.
fn pending_by_sku(orders: &[PurchaseOrder]) -> HashMap<&Sku, i64> {
    let mut pending = HashMap::new();
    for line in orders
        .iter()
        .filter(|po| po.status.is_awaiting_receipt())
        .flat_map(|po| &po.items)
    {
        let outstanding = line.outstanding();
        if outstanding > 0 {
            *pending.entry(&line.sku).or_insert(0) += outstanding;
        }
    }
    pending
}

/// Turn at-risk variants into alerts, dropping those that open orders will cover.
pub fn compute_alerts(variants: Vec<VariantRecord>, orders: &[PurchaseOrder]) -> Vec<LowStockAlert> {
    let pending = pending_by_sku(orders);

    let mut alerts: Vec<LowStockAlert> = variants
        .into_iter()
        .filter(|record| record.variant.is_at_or_below_reorder_level())
        .filter_map(|record| {
            let pending_stock = pending.get(&record.variant.sku).copied().unwrap_or(0);
            let projected = record.variant.stock.saturating_add(pending_stock);
            if projected > record.variant.reorder_level {
                return None;
            }
            Some(LowStockAlert {
                product_id: record.product_id,
                product_name: record.product_name,
                category: record.category,
                sku: record.variant.sku,
                variant_name: record.variant.name,
                current_stock: record.variant.stock,
                reorder_level: record.variant.reorder_level,
                pending_stock,
            })
        })
        .collect();

    alerts.sort_by(|a, b| a.sku.cmp(&b.sku));
    alerts
}
