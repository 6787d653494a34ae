//! Ledger audit: the movement log must explain the current stock exactly.

use serde::{Deserialize, Serialize};

use stockwise_catalog::Sku;

use crate::StockMovement;

/// Result of comparing a variant's stock with its movement history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub sku: Sku,
    pub stock: i64,
    pub ledger_net: i64,
    pub consistent: bool,
}

/// `sum(IN) - sum(OUT)` over the given movements.
pub fn ledger_net<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> i64 {
    movements.into_iter().map(StockMovement::signed_quantity).sum()
}

/// Compare `stock` with the net of every movement recorded for `sku`.
pub fn reconcile(sku: Sku, stock: i64, movements: &[StockMovement]) -> Reconciliation {
    let ledger_net = ledger_net(movements.iter().filter(|m| m.sku == sku));
    Reconciliation {
        consistent: ledger_net == stock,
        sku,
        stock,
        ledger_net,
    }
}
