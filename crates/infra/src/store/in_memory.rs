//! In-process ledger store for tests and single-node development.
//!
//! Committed data lives behind one `RwLock`. A transaction locks each row it
//! touches with a per-row async mutex (waiting at most `lock_timeout`) and
//! stages its writes privately; `commit` applies the staged writes in one
//! critical section, so other readers see either none or all of them.
//! A row's mutex is forgotten again once no transaction holds or waits on it.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use stockwise_catalog::{Product, ProductFilter, ProductId, ProductVariant, Sku};
use stockwise_core::TenantId;
use stockwise_inventory::{MovementFilter, MovementId, StockMovement, sort_newest_first};
use stockwise_purchasing::{PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus};
use stockwise_sales::{OrderStatus, SalesOrder, SalesOrderId};

use super::{
    AdjustStockError, LedgerStore, LedgerTransaction, StockLevel, StoreError, VariantRecord,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Product(TenantId, ProductId),
    Variant(TenantId, Sku),
    SalesOrder(TenantId, SalesOrderId),
    PurchaseOrder(TenantId, PurchaseOrderId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Product(tenant, id) => write!(f, "product {id} (tenant {tenant})"),
            RowKey::Variant(tenant, sku) => write!(f, "variant {sku} (tenant {tenant})"),
            RowKey::SalesOrder(tenant, id) => write!(f, "sales order {id} (tenant {tenant})"),
            RowKey::PurchaseOrder(tenant, id) => {
                write!(f, "purchase order {id} (tenant {tenant})")
            }
        }
    }
}

/// Product header; `header.variants` is always empty, the variants live in
/// their own table so stock can be locked per SKU.
#[derive(Debug, Clone)]
struct ProductRow {
    header: Product,
    skus: Vec<Sku>,
}

#[derive(Debug, Clone)]
struct VariantRow {
    product_id: ProductId,
    variant: ProductVariant,
}

#[derive(Debug, Default)]
struct Tables {
    products: HashMap<(TenantId, ProductId), ProductRow>,
    variants: HashMap<(TenantId, Sku), VariantRow>,
    movements: Vec<StockMovement>,
    sales_orders: HashMap<(TenantId, SalesOrderId), SalesOrder>,
    purchase_orders: HashMap<(TenantId, PurchaseOrderId), PurchaseOrder>,
}

impl Tables {
    fn materialize(&self, tenant_id: TenantId, row: &ProductRow) -> Product {
        let mut product = row.header.clone();
        product.variants = row
            .skus
            .iter()
            .filter_map(|sku| self.variants.get(&(tenant_id, sku.clone())))
            .map(|v| v.variant.clone())
            .collect();
        product
    }

    fn variant_record(&self, tenant_id: TenantId, row: &VariantRow) -> Option<VariantRecord> {
        let product = self.products.get(&(tenant_id, row.product_id))?;
        Some(VariantRecord {
            product_id: row.product_id,
            product_name: product.header.name.clone(),
            category: product.header.category.clone(),
            variant: row.variant.clone(),
        })
    }
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    lock_timeout: Duration,
}

impl Inner {
    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    /// Drop the mutexes of `keys` that only the table itself still references.
    fn prune_row_locks<'a>(&self, keys: impl IntoIterator<Item = &'a RowKey>) {
        let Ok(mut locks) = self.row_locks.lock() else {
            return;
        };
        for key in keys {
            if locks.get(key).is_some_and(|mutex| Arc::strong_count(mutex) == 1) {
                locks.remove(key);
            }
        }
    }
}

/// In-memory [`LedgerStore`]. Cloning shares the same data.
#[derive(Debug, Clone)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Row lock waits longer than `lock_timeout` fail with [`StoreError::LockTimeout`].
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }
}

#[cfg(test)]
impl InMemoryLedgerStore {
    fn row_lock_count(&self) -> usize {
        self.inner.row_locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first<T>(records: &mut [T], key: impl Fn(&T) -> (chrono::DateTime<chrono::Utc>, uuid::Uuid)) {
    records.sort_by(|a, b| key(b).cmp(&key(a)));
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            inner: self.inner.clone(),
            held: HashMap::new(),
            staged: Staged::default(),
        }))
    }

    async fn get_product(
        &self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let tables = self.inner.read()?;
        Ok(tables
            .products
            .get(&(tenant_id, id))
            .map(|row| tables.materialize(tenant_id, row)))
    }

    async fn list_products(
        &self,
        tenant_id: TenantId,
        filter: &ProductFilter,
    ) -> Result<Vec<Product>, StoreError> {
        let tables = self.inner.read()?;
        let mut products: Vec<Product> = tables
            .products
            .iter()
            .filter(|((tenant, _), _)| *tenant == tenant_id)
            .map(|(_, row)| tables.materialize(tenant_id, row))
            .filter(|product| filter.matches(product))
            .collect();
        newest_first(&mut products, |p| (p.created_at, *p.id.0.as_uuid()));
        Ok(products)
    }

    async fn find_variant(
        &self,
        tenant_id: TenantId,
        sku: &Sku,
    ) -> Result<Option<VariantRecord>, StoreError> {
        let tables = self.inner.read()?;
        Ok(tables
            .variants
            .get(&(tenant_id, sku.clone()))
            .and_then(|row| tables.variant_record(tenant_id, row)))
    }

    async fn low_stock_variants(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<VariantRecord>, StoreError> {
        let tables = self.inner.read()?;
        let mut records: Vec<VariantRecord> = tables
            .variants
            .iter()
            .filter(|((tenant, _), row)| {
                *tenant == tenant_id && row.variant.is_at_or_below_reorder_level()
            })
            .filter_map(|(_, row)| tables.variant_record(tenant_id, row))
            .collect();
        records.sort_by(|a, b| {
            a.product_name
                .cmp(&b.product_name)
                .then_with(|| a.variant.sku.cmp(&b.variant.sku))
        });
        Ok(records)
    }

    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let tables = self.inner.read()?;
        let mut movements: Vec<StockMovement> = tables
            .movements
            .iter()
            .filter(|m| m.tenant_id == tenant_id && filter.matches(m))
            .cloned()
            .collect();
        sort_newest_first(&mut movements);
        Ok(movements)
    }

    async fn get_sales_order(
        &self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        let tables = self.inner.read()?;
        Ok(tables.sales_orders.get(&(tenant_id, id)).cloned())
    }

    async fn list_sales_orders(
        &self,
        tenant_id: TenantId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<SalesOrder>, StoreError> {
        let tables = self.inner.read()?;
        let mut orders: Vec<SalesOrder> = tables
            .sales_orders
            .values()
            .filter(|o| o.tenant_id == tenant_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        newest_first(&mut orders, |o| (o.created_at, *o.id.0.as_uuid()));
        Ok(orders)
    }

    async fn get_purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let tables = self.inner.read()?;
        Ok(tables.purchase_orders.get(&(tenant_id, id)).cloned())
    }

    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        status: Option<PurchaseOrderStatus>,
    ) -> Result<Vec<PurchaseOrder>, StoreError> {
        let tables = self.inner.read()?;
        let mut orders: Vec<PurchaseOrder> = tables
            .purchase_orders
            .values()
            .filter(|o| o.tenant_id == tenant_id && status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        newest_first(&mut orders, |o| (o.created_at, *o.id.0.as_uuid()));
        Ok(orders)
    }
}

/// Writes private to one transaction.
#[derive(Debug, Default)]
struct Staged {
    products: HashMap<(TenantId, ProductId), ProductRow>,
    new_variants: HashMap<(TenantId, Sku), VariantRow>,
    /// Metadata for existing variants; the stock field is ignored on apply.
    variant_meta: HashMap<(TenantId, Sku), ProductVariant>,
    stock: HashMap<(TenantId, Sku), i64>,
    movements: Vec<StockMovement>,
    sales_orders: HashMap<(TenantId, SalesOrderId), SalesOrder>,
    purchase_orders: HashMap<(TenantId, PurchaseOrderId), PurchaseOrder>,
}

impl Staged {
    fn apply(self, tables: &mut Tables) {
        tables.products.extend(self.products);
        tables.variants.extend(self.new_variants);

        for (key, meta) in self.variant_meta {
            if let Some(row) = tables.variants.get_mut(&key) {
                let stock = row.variant.stock;
                row.variant = meta;
                row.variant.stock = stock;
            }
        }
        for (key, stock) in self.stock {
            if let Some(row) = tables.variants.get_mut(&key) {
                row.variant.stock = stock;
            }
        }

        tables.movements.extend(self.movements);
        tables.sales_orders.extend(self.sales_orders);
        tables.purchase_orders.extend(self.purchase_orders);
    }
}

/// Transaction over [`InMemoryLedgerStore`]. Dropping it rolls back.
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged: Staged,
}

impl InMemoryTransaction {
    /// Take the row lock unless this transaction already holds it.
    async fn lock(&mut self, key: RowKey) -> Result<(), StoreError> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let mutex = {
            let mut locks = self
                .inner
                .row_locks
                .lock()
                .map_err(|_| StoreError::Poisoned)?;
            locks.entry(key.clone()).or_default().clone()
        };

        match tokio::time::timeout(self.inner.lock_timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                self.held.insert(key, guard);
                Ok(())
            }
            Err(_) => {
                self.inner.prune_row_locks([&key]);
                Err(StoreError::LockTimeout(key.to_string()))
            }
        }
    }

    /// Current `(product, stock)` of a variant as this transaction sees it.
    fn variant_stock(
        &self,
        tenant_id: TenantId,
        sku: &Sku,
    ) -> Result<Option<(ProductId, i64)>, StoreError> {
        let key = (tenant_id, sku.clone());
        if let Some(row) = self.staged.new_variants.get(&key) {
            return Ok(Some((row.product_id, row.variant.stock)));
        }

        let tables = self.inner.read()?;
        Ok(tables.variants.get(&key).map(|row| {
            let stock = self
                .staged
                .stock
                .get(&key)
                .copied()
                .unwrap_or(row.variant.stock);
            (row.product_id, stock)
        }))
    }

    fn view_variant(&self, tables: &Tables, tenant_id: TenantId, sku: &Sku) -> Option<ProductVariant> {
        let key = (tenant_id, sku.clone());
        if let Some(row) = self.staged.new_variants.get(&key) {
            return Some(row.variant.clone());
        }

        let row = tables.variants.get(&key)?;
        let mut variant = self
            .staged
            .variant_meta
            .get(&key)
            .cloned()
            .unwrap_or_else(|| row.variant.clone());
        variant.stock = self
            .staged
            .stock
            .get(&key)
            .copied()
            .unwrap_or(row.variant.stock);
        Some(variant)
    }

    fn view_product(
        &self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let tables = self.inner.read()?;
        let key = (tenant_id, id);
        let Some(row) = self
            .staged
            .products
            .get(&key)
            .or_else(|| tables.products.get(&key))
        else {
            return Ok(None);
        };

        let mut product = row.header.clone();
        product.variants = row
            .skus
            .iter()
            .filter_map(|sku| self.view_variant(&tables, tenant_id, sku))
            .collect();
        Ok(Some(product))
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        let held = std::mem::take(&mut self.held);
        let keys: Vec<RowKey> = held.keys().cloned().collect();
        drop(held);
        self.inner.prune_row_locks(&keys);
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn adjust_stock(
        &mut self,
        tenant_id: TenantId,
        sku: &Sku,
        delta: i64,
        min_resulting: i64,
    ) -> Result<StockLevel, AdjustStockError> {
        self.lock(RowKey::Variant(tenant_id, sku.clone())).await?;

        let Some((product_id, current)) = self.variant_stock(tenant_id, sku)? else {
            return Err(AdjustStockError::NotFound(sku.clone()));
        };
        let next = current
            .checked_add(delta)
            .ok_or_else(|| AdjustStockError::OutOfRange(sku.clone()))?;
        if next < min_resulting {
            return Err(AdjustStockError::Insufficient {
                sku: sku.clone(),
                available: current,
            });
        }

        let key = (tenant_id, sku.clone());
        match self.staged.new_variants.get_mut(&key) {
            Some(row) => row.variant.stock = next,
            None => {
                self.staged.stock.insert(key, next);
            }
        }

        Ok(StockLevel {
            product_id,
            sku: sku.clone(),
            stock: next,
        })
    }

    async fn append_movement(
        &mut self,
        movement: &StockMovement,
    ) -> Result<MovementId, StoreError> {
        self.staged.movements.push(movement.clone());
        Ok(movement.id)
    }

    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let key = (product.tenant_id, product.id);
        self.lock(RowKey::Product(product.tenant_id, product.id)).await?;
        {
            let tables = self.inner.read()?;
            if tables.products.contains_key(&key) || self.staged.products.contains_key(&key) {
                return Err(StoreError::Duplicate(format!("product {}", product.id)));
            }
        }

        let mut header = product.clone();
        header.variants.clear();
        self.staged.products.insert(
            key,
            ProductRow {
                header,
                skus: Vec::new(),
            },
        );

        self.insert_variants(product.tenant_id, product.id, &product.variants)
            .await
    }

    async fn insert_variants(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        variants: &[ProductVariant],
    ) -> Result<(), StoreError> {
        let skus: Vec<Sku> = variants.iter().map(|v| v.sku.clone()).collect();
        self.lock_skus(tenant_id, &skus).await?;

        let mut seen = HashSet::new();
        {
            let tables = self.inner.read()?;
            for variant in variants {
                let key = (tenant_id, variant.sku.clone());
                let taken = tables.variants.contains_key(&key)
                    || self.staged.new_variants.contains_key(&key)
                    || !seen.insert(variant.sku.clone());
                if taken {
                    return Err(StoreError::Duplicate(format!("SKU {}", variant.sku)));
                }
            }

            let row = match self.staged.products.entry((tenant_id, product_id)) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => match tables.products.get(&(tenant_id, product_id)) {
                    Some(row) => entry.insert(row.clone()),
                    None => {
                        return Err(StoreError::backend(
                            "insert_variants",
                            format!("product {product_id} does not exist"),
                        ));
                    }
                },
            };
            for variant in variants {
                if !row.skus.contains(&variant.sku) {
                    row.skus.push(variant.sku.clone());
                }
            }
        }

        for variant in variants {
            self.staged.new_variants.insert(
                (tenant_id, variant.sku.clone()),
                VariantRow {
                    product_id,
                    variant: variant.clone(),
                },
            );
        }
        Ok(())
    }

    async fn lock_skus(&mut self, tenant_id: TenantId, skus: &[Sku]) -> Result<(), StoreError> {
        let mut sorted: Vec<&Sku> = skus.iter().collect();
        sorted.sort();
        sorted.dedup();
        for sku in sorted {
            self.lock(RowKey::Variant(tenant_id, sku.clone())).await?;
        }
        Ok(())
    }

    async fn lock_product(
        &mut self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        self.lock(RowKey::Product(tenant_id, id)).await?;
        self.view_product(tenant_id, id)
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        let tenant_id = product.tenant_id;
        let key = (tenant_id, product.id);
        self.lock(RowKey::Product(tenant_id, product.id)).await?;

        let tables = self.inner.read()?;
        if !self.staged.products.contains_key(&key) && !tables.products.contains_key(&key) {
            return Err(StoreError::backend(
                "update_product",
                format!("product {} does not exist", product.id),
            ));
        }

        let mut header = product.clone();
        header.variants.clear();
        let skus = product.variants.iter().map(|v| v.sku.clone()).collect();
        self.staged.products.insert(key, ProductRow { header, skus });

        for variant in &product.variants {
            let variant_key = (tenant_id, variant.sku.clone());
            if let Some(row) = self.staged.new_variants.get_mut(&variant_key) {
                let stock = row.variant.stock;
                row.variant = variant.clone();
                row.variant.stock = stock;
            } else if tables
                .variants
                .get(&variant_key)
                .is_some_and(|row| row.product_id == product.id)
            {
                self.staged.variant_meta.insert(variant_key, variant.clone());
            }
        }
        Ok(())
    }

    async fn insert_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        let key = (order.tenant_id, order.id);
        self.lock(RowKey::SalesOrder(order.tenant_id, order.id)).await?;
        {
            let tables = self.inner.read()?;
            if tables.sales_orders.contains_key(&key) || self.staged.sales_orders.contains_key(&key)
            {
                return Err(StoreError::Duplicate(format!("sales order {}", order.id)));
            }
        }
        self.staged.sales_orders.insert(key, order.clone());
        Ok(())
    }

    async fn lock_sales_order(
        &mut self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        self.lock(RowKey::SalesOrder(tenant_id, id)).await?;
        let key = (tenant_id, id);
        if let Some(order) = self.staged.sales_orders.get(&key) {
            return Ok(Some(order.clone()));
        }
        let tables = self.inner.read()?;
        Ok(tables.sales_orders.get(&key).cloned())
    }

    async fn save_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        self.lock(RowKey::SalesOrder(order.tenant_id, order.id)).await?;
        self.staged
            .sales_orders
            .insert((order.tenant_id, order.id), order.clone());
        Ok(())
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        let key = (order.tenant_id, order.id);
        self.lock(RowKey::PurchaseOrder(order.tenant_id, order.id)).await?;
        {
            let tables = self.inner.read()?;
            if tables.purchase_orders.contains_key(&key)
                || self.staged.purchase_orders.contains_key(&key)
            {
                return Err(StoreError::Duplicate(format!("purchase order {}", order.id)));
            }
        }
        self.staged.purchase_orders.insert(key, order.clone());
        Ok(())
    }

    async fn lock_purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        self.lock(RowKey::PurchaseOrder(tenant_id, id)).await?;
        let key = (tenant_id, id);
        if let Some(order) = self.staged.purchase_orders.get(&key) {
            return Ok(Some(order.clone()));
        }
        let tables = self.inner.read()?;
        Ok(tables.purchase_orders.get(&key).cloned())
    }

    async fn save_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        self.lock(RowKey::PurchaseOrder(order.tenant_id, order.id)).await?;
        self.staged
            .purchase_orders
            .insert((order.tenant_id, order.id), order.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        {
            let mut tables = self.inner.tables.write().map_err(|_| StoreError::Poisoned)?;
            staged.apply(&mut tables);
        }

        // Row locks are released only after the writes are visible.
        drop(self);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}
