//! Catalog operations: product lifecycle, manual stock adjustments and the
//! movement history audit.

use chrono::Utc;
use tracing::{info, instrument};

use stockwise_catalog::{NewProduct, Product, ProductFilter, ProductId, ProductUpdate, Sku};
use stockwise_core::{AggregateId, DomainError, TenantId, UserId};
use stockwise_inventory::{
    MovementDirection, MovementFilter, MovementReason, Reconciliation, StockAdjustment,
    StockMovement, reconcile,
};

use crate::ledger::{LedgerError, LedgerResult, StockChange, StockMutationEngine};
use crate::store::{LedgerStore, LedgerTransaction, StoreError};

pub struct CatalogService<S> {
    store: S,
    engine: StockMutationEngine,
}

impl<S> CatalogService<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            engine: StockMutationEngine::new(),
        }
    }

    #[instrument(skip(self, input), fields(tenant_id = %tenant_id), err)]
    pub async fn create_product(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        input: NewProduct,
    ) -> LedgerResult<Product> {
        let product =
            input.into_product(tenant_id, ProductId::new(AggregateId::new()), Utc::now())?;

        let mut tx = self.store.begin().await?;
        insert_with_opening_stock(tx.as_mut(), actor, &product).await?;
        tx.commit().await?;

        info!(product_id = %product.id, variants = product.variants.len(), "product created");
        Ok(product)
    }

    /// All-or-nothing: one invalid or conflicting product rejects the batch.
    #[instrument(skip(self, inputs), fields(tenant_id = %tenant_id, count = inputs.len()), err)]
    pub async fn bulk_create_products(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        inputs: Vec<NewProduct>,
    ) -> LedgerResult<Vec<Product>> {
        if inputs.is_empty() {
            return Err(DomainError::validation("no products given").into());
        }

        let now = Utc::now();
        let products = inputs
            .into_iter()
            .map(|input| input.into_product(tenant_id, ProductId::new(AggregateId::new()), now))
            .collect::<Result<Vec<_>, _>>()?;

        // Lock the whole batch in one sorted pass; per-product locking would
        // let two batches with crossing SKUs wait on each other.
        let skus: Vec<Sku> = products
            .iter()
            .flat_map(|p| p.variants.iter().map(|v| v.sku.clone()))
            .collect();

        let mut tx = self.store.begin().await?;
        tx.lock_skus(tenant_id, &skus).await?;
        for product in &products {
            insert_with_opening_stock(tx.as_mut(), actor, product).await?;
        }
        tx.commit().await?;

        Ok(products)
    }

    /// Metadata edit. Stock of existing variants is never touched here.
    #[instrument(skip(self, update), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    pub async fn update_product(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        product_id: ProductId,
        update: ProductUpdate,
    ) -> LedgerResult<Product> {
        let mut tx = self.store.begin().await?;
        let mut product = tx
            .lock_product(tenant_id, product_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {product_id}")))?;

        let added = product.apply_update(update, Utc::now())?;
        if !added.is_empty() {
            tx.insert_variants(tenant_id, product_id, &added)
                .await
                .map_err(sku_conflict)?;
            for variant in &added {
                record_opening_stock(tx.as_mut(), &product, actor, &variant.sku, variant.stock)
                    .await?;
            }
        }
        tx.update_product(&product).await?;
        tx.commit().await?;

        Ok(product)
    }

    pub async fn get_product(&self, tenant_id: TenantId, id: ProductId) -> LedgerResult<Product> {
        self.store
            .get_product(tenant_id, id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("product {id}")).into())
    }

    pub async fn list_products(
        &self,
        tenant_id: TenantId,
        filter: &ProductFilter,
    ) -> LedgerResult<Vec<Product>> {
        Ok(self.store.list_products(tenant_id, filter).await?)
    }

    /// Signed manual adjustment; negative quantities book stock out.
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, sku = %request.sku), err)]
    pub async fn adjust_stock(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        request: StockAdjustment,
    ) -> LedgerResult<StockMovement> {
        let adjustment = request.validate()?;
        let change = StockChange {
            tenant_id,
            sku: adjustment.sku,
            quantity: adjustment.quantity,
            reason: adjustment.reason,
            reference: None,
            actor,
        };

        let mut tx = self.store.begin().await?;
        let movement = match adjustment.direction {
            MovementDirection::Out => self.engine.deduct(tx.as_mut(), change).await?,
            MovementDirection::In => self.engine.restore(tx.as_mut(), change).await?,
        };
        tx.commit().await?;

        Ok(movement)
    }

    /// Movement history, newest first.
    pub async fn movements(
        &self,
        tenant_id: TenantId,
        filter: &MovementFilter,
    ) -> LedgerResult<Vec<StockMovement>> {
        Ok(self.store.list_movements(tenant_id, filter).await?)
    }

    /// Compare a variant's stock with the net of its movement log.
    pub async fn reconcile(&self, tenant_id: TenantId, sku: &Sku) -> LedgerResult<Reconciliation> {
        let record = self
            .store
            .find_variant(tenant_id, sku)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("SKU {sku}")))?;
        let movements = self
            .store
            .list_movements(tenant_id, &MovementFilter::for_sku(sku.clone()))
            .await?;

        let result = reconcile(sku.clone(), record.variant.stock, &movements);
        if !result.consistent {
            tracing::error!(
                tenant_id = %tenant_id,
                sku = %sku,
                stock = result.stock,
                ledger_net = result.ledger_net,
                "stock does not match the movement ledger"
            );
        }
        Ok(result)
    }
}

fn sku_conflict(err: StoreError) -> LedgerError {
    match err {
        StoreError::Duplicate(what) => {
            DomainError::conflict(format!("{what} already exists for this tenant")).into()
        }
        other => other.into(),
    }
}

async fn insert_with_opening_stock(
    tx: &mut dyn LedgerTransaction,
    actor: UserId,
    product: &Product,
) -> LedgerResult<()> {
    tx.insert_product(product).await.map_err(sku_conflict)?;
    for variant in &product.variants {
        record_opening_stock(tx, product, actor, &variant.sku, variant.stock).await?;
    }
    Ok(())
}

/// Opening balances enter the ledger as purchases so reconciliation holds from day one.
async fn record_opening_stock(
    tx: &mut dyn LedgerTransaction,
    product: &Product,
    actor: UserId,
    sku: &Sku,
    quantity: i64,
) -> LedgerResult<()> {
    if quantity <= 0 {
        return Ok(());
    }
    let movement = StockMovement::record(
        product.tenant_id,
        product.id,
        sku.clone(),
        MovementDirection::In,
        quantity,
        MovementReason::Purchase,
        None,
        actor,
        Utc::now(),
    )?;
    tx.append_movement(&movement).await?;
    Ok(())
}
