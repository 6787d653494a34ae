//! Postgres-backed ledger store.
//!
//! ## Stock updates
//!
//! `adjust_stock` is a single conditional `UPDATE ... WHERE stock + delta >= min
//! RETURNING ...` executed inside the caller's transaction. The row lock it
//! takes is held until commit or rollback, so concurrent deductions on one SKU
//! serialize in the database and can never oversell. The `CHECK (stock >= 0)`
//! constraint on `product_variants` backs this up.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Duplicate` |
//! | Database (lock not available) | `55P03` | `LockTimeout` |
//! | Any other | N/A | `Backend` |
//!
//! `adjust_stock` additionally reports `22003` (numeric value out of range)
//! as [`AdjustStockError::OutOfRange`].
//!
//! ## SKU locks
//!
//! `lock_skus` takes transaction-scoped advisory locks keyed on tenant and
//! SKU, so SKUs that do not exist yet can be locked before they are inserted.
//!
//! ## Tenant Isolation
//!
//! Every statement filters on `tenant_id`; rows of another tenant are simply
//! not found.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use stockwise_catalog::{Product, ProductFilter, ProductId, ProductVariant, Sku};
use stockwise_core::{AggregateId, TenantId, UserId};
use stockwise_inventory::{MovementFilter, MovementId, MovementReference, StockMovement};
use stockwise_purchasing::{PoLine, PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus, VendorId};
use stockwise_sales::{OrderLine, OrderStatus, SalesOrder, SalesOrderId};

use super::{
    AdjustStockError, LedgerStore, LedgerTransaction, StockLevel, StoreError, VariantRecord,
};

const PRODUCT_COLUMNS: &str =
    "id, tenant_id, name, description, category, brand, created_at, updated_at";

const VARIANT_COLUMNS: &str = "product_id, sku, name, attributes, buying_price, selling_price, \
     stock, reorder_level";

const MOVEMENT_COLUMNS: &str = "id, tenant_id, product_id, sku, direction, quantity, reason, \
     reference_kind, reference_id, actor, recorded_at";

const SALES_ORDER_COLUMNS: &str = "id, tenant_id, customer_name, shipping_address, supplier_id, \
     items, status, total_amount, created_at, updated_at";

const PURCHASE_ORDER_COLUMNS: &str = "id, tenant_id, vendor_id, items, status, total_amount, \
     expected_date, received_date, created_at, updated_at";

/// Postgres [`super::LedgerStore`].
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Apply pending schema migrations from `migrations/`.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::backend("migrate", e))
    }

    async fn load_variants(
        &self,
        tenant_id: TenantId,
        product_ids: &[Uuid],
    ) -> Result<Vec<(Uuid, ProductVariant)>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants \
             WHERE tenant_id = $1 AND product_id = ANY($2) \
             ORDER BY product_id, position"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(product_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_variants", e))?;

        rows.iter()
            .map(|row| -> Result<(Uuid, ProductVariant), StoreError> {
                let product_id: Uuid = row.try_get("product_id").map_err(decode)?;
                Ok((product_id, variant_from_row(row)?))
            })
            .collect()
    }

    async fn products_with_variants(
        &self,
        tenant_id: TenantId,
        rows: Vec<PgRow>,
    ) -> Result<Vec<Product>, StoreError> {
        let mut products = rows
            .iter()
            .map(product_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let ids: Vec<Uuid> = products.iter().map(|p| *p.id.0.as_uuid()).collect();

        for (product_id, variant) in self.load_variants(tenant_id, &ids).await? {
            if let Some(product) = products
                .iter_mut()
                .find(|p| *p.id.0.as_uuid() == product_id)
            {
                product.variants.push(variant);
            }
        }
        Ok(products)
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Bounds how long this transaction waits on a row held by another one.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        Ok(Box::new(PostgresTransaction { tx }))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_product(
        &self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_product", e))?;

        Ok(self
            .products_with_variants(tenant_id, rows)
            .await?
            .into_iter()
            .next())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_products(
        &self,
        tenant_id: TenantId,
        filter: &ProductFilter,
    ) -> Result<Vec<Product>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(*tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_products", e))?;

        let mut products = self.products_with_variants(tenant_id, rows).await?;
        products.retain(|p| filter.matches(p));
        Ok(products)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, sku = %sku), err)]
    async fn find_variant(
        &self,
        tenant_id: TenantId,
        sku: &Sku,
    ) -> Result<Option<VariantRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT v.product_id, v.sku, v.name, v.attributes, v.buying_price,
                   v.selling_price, v.stock, v.reorder_level,
                   p.name AS product_name, p.category
            FROM product_variants v
            JOIN products p ON p.tenant_id = v.tenant_id AND p.id = v.product_id
            WHERE v.tenant_id = $1 AND v.sku = $2
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(sku.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_variant", e))?;

        row.as_ref().map(variant_record_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn low_stock_variants(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<VariantRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT v.product_id, v.sku, v.name, v.attributes, v.buying_price,
                   v.selling_price, v.stock, v.reorder_level,
                   p.name AS product_name, p.category
            FROM product_variants v
            JOIN products p ON p.tenant_id = v.tenant_id AND p.id = v.product_id
            WHERE v.tenant_id = $1 AND v.stock <= v.reorder_level
            ORDER BY p.name, v.sku
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("low_stock_variants", e))?;

        rows.iter().map(variant_record_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE tenant_id = $1 \
               AND ($2::uuid IS NULL OR product_id = $2) \
               AND ($3::text IS NULL OR sku = $3) \
             ORDER BY recorded_at DESC, id DESC"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(filter.product_id.map(|id| *id.0.as_uuid()))
        .bind(filter.sku.as_ref().map(|sku| sku.as_str().to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_movements", e))?;

        rows.iter().map(movement_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_sales_order(
        &self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SALES_ORDER_COLUMNS} FROM sales_orders WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_sales_order", e))?;

        row.as_ref().map(sales_order_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_sales_orders(
        &self,
        tenant_id: TenantId,
        status: Option<OrderStatus>,
    ) -> Result<Vec<SalesOrder>, StoreError> {
        use stockwise_core::Lifecycle;

        let rows = sqlx::query(&format!(
            "SELECT {SALES_ORDER_COLUMNS} FROM sales_orders \
             WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(status.map(|s| s.label()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_sales_orders", e))?;

        rows.iter().map(sales_order_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn get_purchase_order(
        &self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_ORDER_COLUMNS} FROM purchase_orders WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_purchase_order", e))?;

        row.as_ref().map(purchase_order_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        status: Option<PurchaseOrderStatus>,
    ) -> Result<Vec<PurchaseOrder>, StoreError> {
        use stockwise_core::Lifecycle;

        let rows = sqlx::query(&format!(
            "SELECT {PURCHASE_ORDER_COLUMNS} FROM purchase_orders \
             WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(status.map(|s| s.label()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_purchase_orders", e))?;

        rows.iter().map(purchase_order_from_row).collect()
    }
}

/// A `sqlx` transaction. Dropping it without commit rolls back.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    async fn write_variants(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        first_position: usize,
        variants: &[ProductVariant],
    ) -> Result<(), StoreError> {
        let skus: Vec<Sku> = variants.iter().map(|v| v.sku.clone()).collect();
        self.lock_skus(tenant_id, &skus).await?;

        for (offset, variant) in variants.iter().enumerate() {
            let position = i32::try_from(first_position + offset)
                .map_err(|e| StoreError::backend("insert_variants", e))?;
            sqlx::query(
                r#"
                INSERT INTO product_variants
                    (tenant_id, sku, product_id, position, name, attributes,
                     buying_price, selling_price, stock, reorder_level)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(*tenant_id.as_uuid())
            .bind(variant.sku.as_str())
            .bind(*product_id.0.as_uuid())
            .bind(position)
            .bind(&variant.name)
            .bind(Json(&variant.attributes))
            .bind(variant.buying_price)
            .bind(variant.selling_price)
            .bind(variant.stock)
            .bind(variant.reorder_level)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_variants", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, sku = %sku), err)]
    async fn adjust_stock(
        &mut self,
        tenant_id: TenantId,
        sku: &Sku,
        delta: i64,
        min_resulting: i64,
    ) -> Result<StockLevel, AdjustStockError> {
        let updated = sqlx::query(
            r#"
            UPDATE product_variants
            SET stock = stock + $3
            WHERE tenant_id = $1 AND sku = $2 AND stock + $3 >= $4
            RETURNING product_id, stock
            "#,
        )
        .bind(*tenant_id.as_uuid())
        .bind(sku.as_str())
        .bind(delta)
        .bind(min_resulting)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| {
            if is_out_of_range(&e) {
                AdjustStockError::OutOfRange(sku.clone())
            } else {
                AdjustStockError::Store(map_sqlx_error("adjust_stock", e))
            }
        })?;

        if let Some(row) = updated {
            let product_id: Uuid = row.try_get("product_id").map_err(decode)?;
            return Ok(StockLevel {
                product_id: ProductId::new(AggregateId::from_uuid(product_id)),
                sku: sku.clone(),
                stock: row.try_get("stock").map_err(decode)?,
            });
        }

        // Nothing matched: tell a missing SKU apart from a floor violation.
        let available: Option<i64> = sqlx::query_scalar(
            "SELECT stock FROM product_variants WHERE tenant_id = $1 AND sku = $2",
        )
        .bind(*tenant_id.as_uuid())
        .bind(sku.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("adjust_stock", e))?;

        Err(match available {
            Some(available) => AdjustStockError::Insufficient {
                sku: sku.clone(),
                available,
            },
            None => AdjustStockError::NotFound(sku.clone()),
        })
    }

    async fn append_movement(
        &mut self,
        movement: &StockMovement,
    ) -> Result<MovementId, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements
                (tenant_id, id, product_id, sku, direction, quantity, reason,
                 reference_kind, reference_id, actor, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(*movement.tenant_id.as_uuid())
        .bind(*movement.id.0.as_uuid())
        .bind(*movement.product_id.0.as_uuid())
        .bind(movement.sku.as_str())
        .bind(movement.direction.as_str())
        .bind(movement.quantity)
        .bind(movement.reason.as_str())
        .bind(movement.reference.as_ref().map(|r| r.kind()))
        .bind(movement.reference.as_ref().map(|r| *r.id().as_uuid()))
        .bind(*movement.actor.as_uuid())
        .bind(movement.recorded_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("append_movement", e))?;

        Ok(movement.id)
    }

    #[instrument(skip(self, product), fields(tenant_id = %product.tenant_id, product_id = %product.id), err)]
    async fn insert_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products
                (tenant_id, id, name, description, category, brand, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(*product.tenant_id.as_uuid())
        .bind(*product.id.0.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(&product.brand)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_product", e))?;

        self.write_variants(product.tenant_id, product.id, 0, &product.variants)
            .await
    }

    async fn insert_variants(
        &mut self,
        tenant_id: TenantId,
        product_id: ProductId,
        variants: &[ProductVariant],
    ) -> Result<(), StoreError> {
        let next_position: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM product_variants \
             WHERE tenant_id = $1 AND product_id = $2",
        )
        .bind(*tenant_id.as_uuid())
        .bind(*product_id.0.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_variants", e))?;

        let first = usize::try_from(next_position)
            .map_err(|e| StoreError::backend("insert_variants", e))?;
        self.write_variants(tenant_id, product_id, first, variants)
            .await
    }

    async fn lock_skus(&mut self, tenant_id: TenantId, skus: &[Sku]) -> Result<(), StoreError> {
        let mut sorted: Vec<&Sku> = skus.iter().collect();
        sorted.sort();
        sorted.dedup();
        for sku in sorted {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text || '/' || $2, 0))")
                .bind(*tenant_id.as_uuid())
                .bind(sku.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("lock_skus", e))?;
        }
        Ok(())
    }

    async fn lock_product(
        &mut self,
        tenant_id: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_product", e))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut product = product_from_row(&row)?;

        let variant_rows = sqlx::query(&format!(
            "SELECT {VARIANT_COLUMNS} FROM product_variants \
             WHERE tenant_id = $1 AND product_id = $2 ORDER BY position"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_product", e))?;

        product.variants = variant_rows
            .iter()
            .map(variant_from_row)
            .collect::<Result<_, _>>()?;
        Ok(Some(product))
    }

    async fn update_product(&mut self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE products
            SET name = $3, description = $4, category = $5, brand = $6, updated_at = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*product.tenant_id.as_uuid())
        .bind(*product.id.0.as_uuid())
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(&product.brand)
        .bind(product.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_product", e))?;

        for variant in &product.variants {
            sqlx::query(
                r#"
                UPDATE product_variants
                SET name = $4, attributes = $5, buying_price = $6, selling_price = $7,
                    reorder_level = $8
                WHERE tenant_id = $1 AND sku = $2 AND product_id = $3
                "#,
            )
            .bind(*product.tenant_id.as_uuid())
            .bind(variant.sku.as_str())
            .bind(*product.id.0.as_uuid())
            .bind(&variant.name)
            .bind(Json(&variant.attributes))
            .bind(variant.buying_price)
            .bind(variant.selling_price)
            .bind(variant.reorder_level)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("update_product", e))?;
        }
        Ok(())
    }

    async fn insert_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        use stockwise_core::Lifecycle;

        sqlx::query(
            r#"
            INSERT INTO sales_orders
                (tenant_id, id, customer_name, shipping_address, supplier_id, items,
                 status, total_amount, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*order.tenant_id.as_uuid())
        .bind(*order.id.0.as_uuid())
        .bind(&order.customer_name)
        .bind(&order.shipping_address)
        .bind(order.supplier_id.map(|id| *id.as_uuid()))
        .bind(Json(&order.items))
        .bind(order.status.label())
        .bind(order.total_amount)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_sales_order", e))?;
        Ok(())
    }

    async fn lock_sales_order(
        &mut self,
        tenant_id: TenantId,
        id: SalesOrderId,
    ) -> Result<Option<SalesOrder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SALES_ORDER_COLUMNS} FROM sales_orders \
             WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_sales_order", e))?;

        row.as_ref().map(sales_order_from_row).transpose()
    }

    async fn save_sales_order(&mut self, order: &SalesOrder) -> Result<(), StoreError> {
        use stockwise_core::Lifecycle;

        sqlx::query(
            r#"
            UPDATE sales_orders
            SET customer_name = $3, shipping_address = $4, supplier_id = $5, items = $6,
                status = $7, total_amount = $8, updated_at = $9
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*order.tenant_id.as_uuid())
        .bind(*order.id.0.as_uuid())
        .bind(&order.customer_name)
        .bind(&order.shipping_address)
        .bind(order.supplier_id.map(|id| *id.as_uuid()))
        .bind(Json(&order.items))
        .bind(order.status.label())
        .bind(order.total_amount)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_sales_order", e))?;
        Ok(())
    }

    async fn insert_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        use stockwise_core::Lifecycle;

        sqlx::query(
            r#"
            INSERT INTO purchase_orders
                (tenant_id, id, vendor_id, items, status, total_amount, expected_date,
                 received_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(*order.tenant_id.as_uuid())
        .bind(*order.id.0.as_uuid())
        .bind(*order.vendor_id.0.as_uuid())
        .bind(Json(&order.items))
        .bind(order.status.label())
        .bind(order.total_amount)
        .bind(order.expected_date)
        .bind(order.received_date)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_purchase_order", e))?;
        Ok(())
    }

    async fn lock_purchase_order(
        &mut self,
        tenant_id: TenantId,
        id: PurchaseOrderId,
    ) -> Result<Option<PurchaseOrder>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PURCHASE_ORDER_COLUMNS} FROM purchase_orders \
             WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        ))
        .bind(*tenant_id.as_uuid())
        .bind(*id.0.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("lock_purchase_order", e))?;

        row.as_ref().map(purchase_order_from_row).transpose()
    }

    async fn save_purchase_order(&mut self, order: &PurchaseOrder) -> Result<(), StoreError> {
        use stockwise_core::Lifecycle;

        sqlx::query(
            r#"
            UPDATE purchase_orders
            SET items = $3, status = $4, total_amount = $5, expected_date = $6,
                received_date = $7, updated_at = $8
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(*order.tenant_id.as_uuid())
        .bind(*order.id.0.as_uuid())
        .bind(Json(&order.items))
        .bind(order.status.label())
        .bind(order.total_amount)
        .bind(order.expected_date)
        .bind(order.received_date)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("save_purchase_order", e))?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

fn decode(err: sqlx::Error) -> StoreError {
    StoreError::backend("decode_row", err)
}

fn corrupt(column: &'static str, err: impl core::fmt::Display) -> StoreError {
    StoreError::backend("decode_row", format!("column {column}: {err}"))
}

fn product_from_row(row: &PgRow) -> Result<Product, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode)?;
    Ok(Product {
        id: ProductId::new(AggregateId::from_uuid(id)),
        tenant_id: TenantId::from_uuid(tenant_id),
        name: row.try_get("name").map_err(decode)?,
        description: row.try_get("description").map_err(decode)?,
        category: row.try_get("category").map_err(decode)?,
        brand: row.try_get("brand").map_err(decode)?,
        variants: Vec::new(),
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn variant_from_row(row: &PgRow) -> Result<ProductVariant, StoreError> {
    let sku: String = row.try_get("sku").map_err(decode)?;
    let attributes: Json<BTreeMap<String, String>> =
        row.try_get("attributes").map_err(decode)?;
    Ok(ProductVariant {
        sku: Sku::parse(&sku).map_err(|e| corrupt("sku", e))?,
        name: row.try_get("name").map_err(decode)?,
        attributes: attributes.0,
        buying_price: row.try_get::<Decimal, _>("buying_price").map_err(decode)?,
        selling_price: row.try_get::<Decimal, _>("selling_price").map_err(decode)?,
        stock: row.try_get("stock").map_err(decode)?,
        reorder_level: row.try_get("reorder_level").map_err(decode)?,
    })
}

fn variant_record_from_row(row: &PgRow) -> Result<VariantRecord, StoreError> {
    let product_id: Uuid = row.try_get("product_id").map_err(decode)?;
    Ok(VariantRecord {
        product_id: ProductId::new(AggregateId::from_uuid(product_id)),
        product_name: row.try_get("product_name").map_err(decode)?,
        category: row.try_get("category").map_err(decode)?,
        variant: variant_from_row(row)?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode)?;
    let product_id: Uuid = row.try_get("product_id").map_err(decode)?;
    let sku: String = row.try_get("sku").map_err(decode)?;
    let direction: String = row.try_get("direction").map_err(decode)?;
    let reason: String = row.try_get("reason").map_err(decode)?;
    let reference_kind: Option<String> = row.try_get("reference_kind").map_err(decode)?;
    let reference_id: Option<Uuid> = row.try_get("reference_id").map_err(decode)?;
    let actor: Uuid = row.try_get("actor").map_err(decode)?;

    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(id)) => Some(
            MovementReference::from_parts(&kind, AggregateId::from_uuid(id))
                .map_err(|e| corrupt("reference_kind", e))?,
        ),
        _ => None,
    };

    Ok(StockMovement {
        id: MovementId::new(AggregateId::from_uuid(id)),
        tenant_id: TenantId::from_uuid(tenant_id),
        product_id: ProductId::new(AggregateId::from_uuid(product_id)),
        sku: Sku::parse(&sku).map_err(|e| corrupt("sku", e))?,
        direction: direction.parse().map_err(|e| corrupt("direction", e))?,
        quantity: row.try_get("quantity").map_err(decode)?,
        reason: reason.parse().map_err(|e| corrupt("reason", e))?,
        reference,
        actor: UserId::from_uuid(actor),
        recorded_at: row.try_get("recorded_at").map_err(decode)?,
    })
}

fn sales_order_from_row(row: &PgRow) -> Result<SalesOrder, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode)?;
    let supplier_id: Option<Uuid> = row.try_get("supplier_id").map_err(decode)?;
    let items: Json<Vec<OrderLine>> = row.try_get("items").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(SalesOrder {
        id: SalesOrderId::new(AggregateId::from_uuid(id)),
        tenant_id: TenantId::from_uuid(tenant_id),
        customer_name: row.try_get("customer_name").map_err(decode)?,
        shipping_address: row.try_get("shipping_address").map_err(decode)?,
        supplier_id: supplier_id.map(AggregateId::from_uuid),
        items: items.0,
        status: status.parse().map_err(|e| corrupt("status", e))?,
        total_amount: row.try_get::<Decimal, _>("total_amount").map_err(decode)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at").map_err(decode)?,
    })
}

fn purchase_order_from_row(row: &PgRow) -> Result<PurchaseOrder, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode)?;
    let tenant_id: Uuid = row.try_get("tenant_id").map_err(decode)?;
    let vendor_id: Uuid = row.try_get("vendor_id").map_err(decode)?;
    let items: Json<Vec<PoLine>> = row.try_get("items").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    Ok(PurchaseOrder {
        id: PurchaseOrderId::new(AggregateId::from_uuid(id)),
        tenant_id: TenantId::from_uuid(tenant_id),
        vendor_id: VendorId(AggregateId::from_uuid(vendor_id)),
        items: items.0,
        status: status.parse().map_err(|e| corrupt("status", e))?,
        total_amount: row.try_get::<Decimal, _>("total_amount").map_err(decode)?,
        expected_date: row.try_get("expected_date").map_err(decode)?,
        received_date: row.try_get("received_date").map_err(decode)?,
        created_at: row.try_get("created_at").map_err(decode)?,
        updated_at: row.try_get("updated_at").map_err(decode)?,
    })
}

fn is_out_of_range(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("22003"))
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Duplicate(msg),
                Some("55P03") => StoreError::LockTimeout(msg),
                _ => StoreError::Backend {
                    operation,
                    message: msg,
                },
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(operation, "connection pool closed"),
        other => StoreError::backend(operation, other),
    }
}
