//! Read-side projections computed on demand from the ledger store.
//!
//! Nothing here caches state between calls.

pub mod low_stock;

pub use low_stock::{LowStockAlert, LowStockProjection, compute_alerts};
