//! Append-only stock movement ledger (domain records and audit helpers).

pub mod adjustment;
pub mod movement;
pub mod reconcile;

pub use adjustment::{StockAdjustment, ValidatedAdjustment};
pub use movement::{
    MovementDirection, MovementFilter, MovementId, MovementReason, MovementReference,
    StockMovement, sort_newest_first,
};
pub use reconcile::{Reconciliation, ledger_net, reconcile};
