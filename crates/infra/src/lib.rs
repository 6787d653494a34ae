//! Infrastructure layer: ledger storage (in-memory and Postgres), the stock
//! mutation engine, order coordination, projections, notifications and config.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod ledger;
pub mod notifications;
pub mod projections;
pub mod store;

mod integration_tests;

pub use catalog::CatalogService;
pub use config::{AppConfig, ConfigError, StorageConfig};
pub use coordinator::{OrderCoordinator, StatusUpdate};
pub use ledger::{LedgerError, LedgerResult, StockChange, StockMutationEngine};
pub use notifications::{
    LedgerNotification, NotificationEnvelope, Notifier, ORDER_CREATED, PO_UPDATED,
};
pub use projections::{LowStockAlert, LowStockProjection};
pub use store::{InMemoryLedgerStore, LedgerStore, LedgerTransaction, PostgresLedgerStore, StoreError};
