//! Order coordinator: sales order placement and cancellation, purchase order
//! receipt, and status changes for both.
//!
//! Every operation runs in one ledger transaction. Stock rows are locked in
//! SKU order so two orders touching the same SKUs cannot deadlock. Events are
//! published only after the commit succeeded.

use chrono::Utc;
use tracing::{info, instrument, warn};

use stockwise_catalog::Sku;
use stockwise_core::{AggregateId, DomainError, Lifecycle, TenantId, TransitionPolicy, UserId};
use stockwise_events::EventBus;
use stockwise_inventory::{MovementReason, MovementReference};
use stockwise_purchasing::{
    CreatePurchaseOrder, PurchaseOrder, PurchaseOrderId, PurchaseOrderStatus, ReceiptLine,
};
use stockwise_sales::{OrderLine, OrderStatus, PlaceOrder, SalesOrder, SalesOrderId};

use crate::ledger::{LedgerResult, StockChange, StockMutationEngine};
use crate::notifications::{LedgerNotification, NotificationEnvelope, Notifier};
use crate::store::LedgerStore;

/// Result of a status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate<T> {
    pub record: T,
    /// The transition is off the table and went through under the permissive policy.
    pub flagged: bool,
}

pub struct OrderCoordinator<S, B> {
    store: S,
    engine: StockMutationEngine,
    notifier: Notifier<B>,
    policy: TransitionPolicy,
}

impl<S, B> OrderCoordinator<S, B>
where
    S: LedgerStore,
    B: EventBus<NotificationEnvelope>,
{
    pub fn new(store: S, bus: B, policy: TransitionPolicy) -> Self {
        Self {
            store,
            engine: StockMutationEngine::new(),
            notifier: Notifier::new(bus),
            policy,
        }
    }

    pub fn policy(&self) -> TransitionPolicy {
        self.policy
    }

    /// Deduct every line and record the order, all or nothing.
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, lines = request.items.len()), err)]
    pub async fn place_order(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        request: PlaceOrder,
    ) -> LedgerResult<SalesOrder> {
        let lines = request.validate()?;
        let order_id = SalesOrderId::new(AggregateId::new());
        let reference = MovementReference::SalesOrder(order_id.0);

        let mut tx = self.store.begin().await?;

        let mut product_ids = vec![None; lines.len()];
        for index in lock_order(&lines, |line| &line.sku) {
            let line = &lines[index];
            let movement = self
                .engine
                .deduct(
                    tx.as_mut(),
                    StockChange {
                        tenant_id,
                        sku: line.sku.clone(),
                        quantity: line.quantity,
                        reason: MovementReason::Sale,
                        reference: Some(reference),
                        actor,
                    },
                )
                .await?;
            product_ids[index] = Some(movement.product_id);
        }

        let items = lines
            .into_iter()
            .zip(product_ids)
            .map(|(line, product_id)| -> LedgerResult<OrderLine> {
                let product_id = product_id.ok_or_else(|| {
                    DomainError::not_found(format!("SKU {}", line.sku))
                })?;
                Ok(OrderLine {
                    product_id,
                    sku: line.sku,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        let order = SalesOrder::place(order_id, tenant_id, request, items, Utc::now())?;
        tx.insert_sales_order(&order).await?;
        tx.commit().await?;

        info!(order_id = %order.id, total = %order.total_amount, "sales order placed");
        self.notifier
            .publish(tenant_id, LedgerNotification::OrderCreated(order.clone()));
        Ok(order)
    }

    /// Cancel the order and put every line back into stock.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub async fn cancel_order(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        order_id: SalesOrderId,
    ) -> LedgerResult<SalesOrder> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_sales_order(tenant_id, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?;
        order.ensure_tenant(tenant_id)?;
        order.cancel(Utc::now())?;

        let reference = MovementReference::SalesOrder(order_id.0);
        for index in lock_order(&order.items, |line| &line.sku) {
            let line = &order.items[index];
            self.engine
                .restore(
                    tx.as_mut(),
                    StockChange {
                        tenant_id,
                        sku: line.sku.clone(),
                        quantity: line.quantity,
                        reason: MovementReason::ReturnFromCustomer,
                        reference: Some(reference),
                        actor,
                    },
                )
                .await?;
        }

        tx.save_sales_order(&order).await?;
        tx.commit().await?;

        info!("sales order cancelled, stock restored");
        Ok(order)
    }

    /// Status change without stock effect. Cancellation goes through [`Self::cancel_order`].
    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    pub async fn update_order_status(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
        status: OrderStatus,
    ) -> LedgerResult<StatusUpdate<SalesOrder>> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_sales_order(tenant_id, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?;
        order.ensure_tenant(tenant_id)?;

        let change = order.change_status(status, self.policy, Utc::now())?;
        tx.save_sales_order(&order).await?;
        tx.commit().await?;

        if change.flagged {
            warn!(
                from = change.from.label(),
                to = change.to.label(),
                "off-table sales order transition applied"
            );
        }
        Ok(StatusUpdate {
            record: order,
            flagged: change.flagged,
        })
    }

    pub async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: SalesOrderId,
    ) -> LedgerResult<SalesOrder> {
        let order = self
            .store
            .get_sales_order(tenant_id, order_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("sales order {order_id}")))?;
        order.ensure_tenant(tenant_id)?;
        Ok(order)
    }

    pub async fn list_orders(
        &self,
        tenant_id: TenantId,
        status: Option<OrderStatus>,
    ) -> LedgerResult<Vec<SalesOrder>> {
        Ok(self.store.list_sales_orders(tenant_id, status).await?)
    }

    /// Record a `DRAFT` purchase order. No stock moves until goods are received.
    #[instrument(skip(self, request), fields(tenant_id = %tenant_id, lines = request.items.len()), err)]
    pub async fn create_purchase_order(
        &self,
        tenant_id: TenantId,
        request: CreatePurchaseOrder,
    ) -> LedgerResult<PurchaseOrder> {
        let lines = request.validate()?;

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let record = self
                .store
                .find_variant(tenant_id, &line.sku)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("SKU {}", line.sku)))?;
            items.push(line.resolve(record.product_id));
        }

        let order = PurchaseOrder::create(
            PurchaseOrderId::new(AggregateId::new()),
            tenant_id,
            request,
            items,
            Utc::now(),
        )?;

        let mut tx = self.store.begin().await?;
        tx.insert_purchase_order(&order).await?;
        tx.commit().await?;

        info!(po_id = %order.id, "purchase order created");
        Ok(order)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, po_id = %po_id), err)]
    pub async fn update_purchase_order_status(
        &self,
        tenant_id: TenantId,
        po_id: PurchaseOrderId,
        status: PurchaseOrderStatus,
    ) -> LedgerResult<StatusUpdate<PurchaseOrder>> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_purchase_order(tenant_id, po_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("purchase order {po_id}")))?;
        order.ensure_tenant(tenant_id)?;

        let change = order.change_status(status, self.policy, Utc::now())?;
        tx.save_purchase_order(&order).await?;
        tx.commit().await?;

        if change.flagged {
            warn!(
                from = change.from.label(),
                to = change.to.label(),
                "off-table purchase order transition applied"
            );
        }
        self.notifier.publish(
            tenant_id,
            LedgerNotification::PurchaseOrderUpdated(order.clone()),
        );
        Ok(StatusUpdate {
            record: order,
            flagged: change.flagged,
        })
    }

    /// Book received goods into stock, capped at what is still outstanding per line.
    #[instrument(skip(self, lines), fields(tenant_id = %tenant_id, po_id = %po_id, lines = lines.len()), err)]
    pub async fn receive_purchase_order(
        &self,
        tenant_id: TenantId,
        actor: UserId,
        po_id: PurchaseOrderId,
        lines: Vec<ReceiptLine>,
    ) -> LedgerResult<PurchaseOrder> {
        let mut tx = self.store.begin().await?;
        let mut order = tx
            .lock_purchase_order(tenant_id, po_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("purchase order {po_id}")))?;
        order.ensure_tenant(tenant_id)?;

        let outcome = order.receive(&lines, Utc::now())?;
        for index in lock_order(&outcome.received, |goods| &goods.sku) {
            let goods = &outcome.received[index];
            self.engine
                .receive(
                    tx.as_mut(),
                    tenant_id,
                    actor,
                    goods.sku.clone(),
                    goods.quantity,
                    po_id.0,
                )
                .await?;
        }

        tx.save_purchase_order(&order).await?;
        tx.commit().await?;

        if !outcome.skipped.is_empty() {
            info!(skipped = ?outcome.skipped, "receipt lines skipped");
        }
        info!(
            status = order.status.label(),
            variance = %outcome.variance,
            "purchase order received"
        );
        self.notifier.publish(
            tenant_id,
            LedgerNotification::PurchaseOrderUpdated(order.clone()),
        );
        Ok(order)
    }

    pub async fn get_purchase_order(
        &self,
        tenant_id: TenantId,
        po_id: PurchaseOrderId,
    ) -> LedgerResult<PurchaseOrder> {
        let order = self
            .store
            .get_purchase_order(tenant_id, po_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("purchase order {po_id}")))?;
        order.ensure_tenant(tenant_id)?;
        Ok(order)
    }

    pub async fn list_purchase_orders(
        &self,
        tenant_id: TenantId,
        status: Option<PurchaseOrderStatus>,
    ) -> LedgerResult<Vec<PurchaseOrder>> {
        Ok(self.store.list_purchase_orders(tenant_id, status).await?)
    }
}

/// Indexes of `items` sorted by SKU; ties keep their request order.
fn lock_order<T>(items: &[T], sku: impl Fn(&T) -> &Sku) -> Vec<usize> {
    let mut indexes: Vec<usize> = (0..items.len()).collect();
    indexes.sort_by(|a, b| sku(&items[*a]).cmp(sku(&items[*b])));
    indexes
}
