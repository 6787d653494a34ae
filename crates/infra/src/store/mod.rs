//! Ledger storage: catalog rows, the movement log and order documents.
//!
//! Every mutation runs inside a [`LedgerTransaction`] obtained from
//! [`LedgerStore::begin`]. A transaction that is dropped without `commit`
//! (error path, timeout, cancelled request task) discards every staged write
//! and releases every row lock it holds.
//!
//! ## Row locking
//!
//! Touching a row inside a transaction locks it until the transaction ends.
//! Callers take variant locks in SKU order so that two multi-line operations
//! never wait on each other in a cycle. Operations spanning several products
//! lock all of their SKUs up front with [`LedgerTransaction::lock_skus`].

mod in_memory;
mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use stockwise_catalog::{Product, ProductFilter, ProductId, ProductVariant, Sku};
use stockwise_core::TenantId;
use stockwise_inventory::{MovementFilter, MovementId, StockMovement};
use stockwise_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};
use stockwise_sales::{OrderStatus, SalesOrder, SalesOrderId};

use crate::config::StorageConfig;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// Infrastructure failures. Business rule violations never show up here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failed during {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// A unique key is already taken (e.g. a tenant's SKU).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("timed out waiting for the row lock on {0}")]
    LockTimeout(String),
}

impl StoreError {
    pub(crate) fn backend(operation: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            message: message.to_string(),
        }
    }
}

/// Outcome of a failed conditional stock update.
#[derive(Debug, Error)]
pub enum AdjustStockError {
    #[error("variant {0} not found")]
    NotFound(Sku),

    /// Applying the delta would cross the floor; nothing was written.
    #[error("insufficient stock for {sku}: {available} available")]
    Insufficient { sku: Sku, available: i64 },

    /// The resulting stock does not fit the stock column.
    #[error("stock for {0} out of range")]
    OutOfRange(Sku),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Variant stock after a successful conditional update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub sku: Sku,
    pub stock: i64,
}

/// A variant together with the product fields needed to present it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantRecord {
    pub product_id: ProductId,
    pub product_name: String,
    pub category: String,
    pub variant: ProductVariant,
}

/// Read side of the ledger plus the entry point for transactions.
///
/// Reads outside a transaction see committed data only.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError>;

    async fn get_product(
        &self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError>;

    async fn list_products(
        &self,
        tenant_id: TenantId,
        filter: &ProductFilter,
    ) -> Result<Vec<Product>, StoreError>;

    async fn find_variant(
        &self,
        tenant_id: TenantId,
        sku: &Sku,
    ) -> Result<Option<VariantRecord>, StoreError>;

    /// Variants with `stock <= reorder_level`.
    async fn low_stock_variants(&self, tenant_id: TenantId)
    -> Result<Vec<VariantRecord>, StoreError>;

    /// Newest first.
    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StoreError>;

    async fn get_sales_order(
        &self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError>;

    /// Newest first.
    async fn list_sales_orders(
        &self,
        tenant_id: TenantId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<SalesOrder>, StoreError>;

    async fn get_purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    /// Newest first.
    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        status: Option<PurchaseOrderStatus>,
    ) -> Result<Vec<PurchaseOrder>, StoreError>;
}

/// One unit of work. Writes become visible to others only on `commit`.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Add `delta` to the variant's stock if the result stays `>= min_resulting`.
    ///
    /// Locks the variant row for the rest of the transaction. On failure
    /// nothing is written and the error reports the stock currently available.
    async fn adjust_stock(
        &mut self,
        tenant_id: TenantId,
        sku: &Sku,
        delta: i64,
        min_resulting: i64,
    ) -> Result<StockLevel, AdjustStockError>;

    async fn append_movement(&mut self, movement: &StockMovement)
    -> Result<MovementId, StoreError>;

    /// Insert a product and all its variants, stock included.
    ///
    /// A SKU already used by the tenant fails with [`StoreError::Duplicate`].
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError>;

    /// Add variants to an existing product (same duplicate rule as `insert_product`).
    async fn insert_variants(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        variants: &[ProductVariant],
    ) -> Result<(), StoreError>;

    /// Lock the given SKUs of a tenant in sorted order, existing or not.
    ///
    /// Later locks on the same SKUs within this transaction are no-ops.
    async fn lock_skus(&mut self, tenant_id: TenantId, skus: &[Sku]) -> Result<(), StoreError>;

    /// Load a product and lock it against concurrent metadata updates.
    async fn lock_product(
        &mut self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError>;

    /// Persist product and variant metadata. Stock columns are left untouched.
    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError>;

    async fn insert_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError>;

    async fn lock_sales_order(
        &mut self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError>;

    async fn save_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError>;

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    async fn lock_purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError>;

    async fn save_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        (**self).begin().await
    }

    async fn get_product(
        &self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        (**self).get_product(tenant_id, id).await
    }

    async fn list_products(
        &self,
        tenant_id: TenantId,
        filter: &ProductFilter,
    ) -> Result<Vec<Product>, StoreError> {
        (**self).list_products(tenant_id, filter).await
    }

    async fn find_variant(
        &self,
        tenant_id: TenantId,
        sku: &Sku,
    ) -> Result<Option<VariantRecord>, StoreError> {
        (**self).find_variant(tenant_id, sku).await
    }

    async fn low_stock_variants(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<VariantRecord>, StoreError> {
        (**self).low_stock_variants(tenant_id).await
    }

    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).list_movements(tenant_id, filter).await
    }

    async fn get_sales_order(
        &self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        (**self).get_sales_order(tenant_id, id).await
    }

    async fn list_sales_orders(
        &self,
        tenant_id: TenantId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<SalesOrder>, StoreError> {
        (**self).list_sales_orders(tenant_id, status).await
    }

    async fn get_purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        (**self).get_purchase_order(tenant_id, id).await
    }

    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        status: Option<PurchaseOrderStatus>,
    ) -> Result<Vec<PurchaseOrder>, StoreError> {
        (**self).list_purchase_orders(tenant_id, status).await
    }
}

/// Open the store selected by configuration.
///
/// The Postgres store runs pending migrations first when asked to.
pub async fn open(
    config: &StorageConfig,
    lock_timeout: Duration,
) -> Result<Arc<dyn LedgerStore>, StoreError> {
    match config {
        StorageConfig::InMemory => {
            tracing::info!("using in-memory ledger store");
            Ok(Arc::new(InMemoryLedgerStore::with_lock_timeout(lock_timeout)))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            run_migrations,
        } => {
            let store = PostgresLedgerStore::connect(url, *max_connections, lock_timeout).await?;
            if *run_migrations {
                store.migrate().await?;
            }
            tracing::info!(max_connections, "using postgres ledger store");
            Ok(Arc::new(store))
        }
    }
}
