//! End-to-end ledger flows against the in-memory store: catalog, coordinator
//! and low-stock projection sharing one store and one bus.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use rust_decimal::Decimal;

    use stockwise_catalog::{NewProduct, NewVariant, Sku};
    use stockwise_core::{AggregateId, DomainError, TenantId, TransitionPolicy, UserId};
    use stockwise_events::{EventBus, InMemoryEventBus, TenantScoped};
    use stockwise_inventory::{MovementFilter, MovementReason, MovementReference};
    use stockwise_purchasing::{
        CreatePurchaseOrder, PoLineRequest, PurchaseOrderStatus, ReceiptLine, VendorId,
    };
    use stockwise_sales::{OrderLineRequest, OrderStatus, PlaceOrder};

    use crate::catalog::CatalogService;
    use crate::coordinator::OrderCoordinator;
    use crate::ledger::LedgerError;
    use crate::notifications::{NotificationEnvelope, ORDER_CREATED, PO_UPDATED};
    use crate::projections::LowStockProjection;
    use crate::store::{InMemoryLedgerStore, LedgerStore, LedgerTransaction};

    type Bus = Arc<InMemoryEventBus<NotificationEnvelope>>;

    struct Harness {
        store: InMemoryLedgerStore,
        bus: Bus,
        catalog: CatalogService<InMemoryLedgerStore>,
        orders: Arc<OrderCoordinator<InMemoryLedgerStore, Bus>>,
        low_stock: LowStockProjection<InMemoryLedgerStore>,
        actor: UserId,
    }

    fn harness(policy: TransitionPolicy) -> Harness {
        let store = InMemoryLedgerStore::new();
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        Harness {
            catalog: CatalogService::new(store.clone()),
            orders: Arc::new(OrderCoordinator::new(store.clone(), bus.clone(), policy)),
            low_stock: LowStockProjection::new(store.clone()),
            store,
            bus,
            actor: UserId::new(),
        }
    }

    fn sku(s: &str) -> Sku {
        Sku::parse(s).unwrap()
    }

    fn product(variants: &[(&str, i64, i64)]) -> NewProduct {
        NewProduct {
            name: "Widget".to_string(),
            description: None,
            category: "Hardware".to_string(),
            brand: "Acme".to_string(),
            variants: variants
                .iter()
                .map(|(sku, stock, reorder)| NewVariant {
                    sku: sku.to_string(),
                    name: String::new(),
                    attributes: BTreeMap::new(),
                    buying_price: Decimal::from(4),
                    selling_price: Decimal::from(10),
                    stock: *stock,
                    reorder_level: Some(*reorder),
                })
                .collect(),
        }
    }

    fn order(items: &[(&str, i64)]) -> PlaceOrder {
        PlaceOrder {
            customer_name: "Ada".to_string(),
            shipping_address: "1 Analytical Way".to_string(),
            supplier_id: None,
            items: items
                .iter()
                .map(|(sku, quantity)| OrderLineRequest {
                    sku: sku.to_string(),
                    quantity: *quantity,
                    unit_price: Decimal::from(10),
                })
                .collect(),
            total_amount: None,
        }
    }

    fn purchase(items: &[(&str, i64)]) -> CreatePurchaseOrder {
        CreatePurchaseOrder {
            vendor_id: VendorId(AggregateId::new()),
            items: items
                .iter()
                .map(|(sku, quantity)| PoLineRequest {
                    sku: sku.to_string(),
                    quantity: *quantity,
                    unit_cost: Decimal::from(4),
                })
                .collect(),
            total_amount: None,
            expected_date: None,
        }
    }

    async fn stock(h: &Harness, tenant_id: TenantId, s: &str) -> i64 {
        h.store
            .find_variant(tenant_id, &sku(s))
            .await
            .unwrap()
            .unwrap()
            .variant
            .stock
    }

    async fn assert_reconciles(h: &Harness, tenant_id: TenantId, s: &str) {
        let result = h.catalog.reconcile(tenant_id, &sku(s)).await.unwrap();
        assert!(result.consistent, "{s} does not reconcile: {result:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_orders_cannot_oversell() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 10, 0)]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let orders = h.orders.clone();
            let actor = h.actor;
            handles.push(tokio::spawn(async move {
                orders.place_order(tenant_id, actor, order(&[("A-1", 6)])).await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(LedgerError::Domain(DomainError::InsufficientStock { available, .. })) => {
                    assert_eq!(available, 4)
                }
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(stock(&h, tenant_id, "A-1").await, 4);
        assert_reconciles(&h, tenant_id, "A-1").await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn crossing_multi_line_orders_do_not_deadlock() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 100, 0), ("B-2", 100, 0)]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let orders = h.orders.clone();
            let actor = h.actor;
            let items: &[(&str, i64)] = if i % 2 == 0 {
                &[("A-1", 1), ("B-2", 1)]
            } else {
                &[("B-2", 1), ("A-1", 1)]
            };
            let request = order(items);
            handles.push(tokio::spawn(async move {
                orders.place_order(tenant_id, actor, request).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(stock(&h, tenant_id, "A-1").await, 80);
        assert_eq!(stock(&h, tenant_id, "B-2").await, 80);
    }

    #[tokio::test]
    async fn failing_line_rolls_back_the_whole_order() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 5, 0), ("B-2", 1, 0)]))
            .await
            .unwrap();

        let err = h
            .orders
            .place_order(tenant_id, h.actor, order(&[("A-1", 2), ("B-2", 3)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Domain(DomainError::InsufficientStock { .. })
        ));

        assert_eq!(stock(&h, tenant_id, "A-1").await, 5);
        assert_eq!(stock(&h, tenant_id, "B-2").await, 1);
        assert!(h.orders.list_orders(tenant_id, None).await.unwrap().is_empty());

        let unknown = h
            .orders
            .place_order(tenant_id, h.actor, order(&[("A-1", 1), ("Z-9", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(unknown, LedgerError::Domain(DomainError::NotFound(_))));
        assert_eq!(stock(&h, tenant_id, "A-1").await, 5);
        assert_reconciles(&h, tenant_id, "A-1").await;
    }

    #[tokio::test]
    async fn selling_out_reports_zero_available() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        let sub = h.bus.subscribe();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 2, 0)]))
            .await
            .unwrap();

        let placed = h
            .orders
            .place_order(tenant_id, h.actor, order(&[("A-1", 2)]))
            .await
            .unwrap();
        assert_eq!(placed.status, OrderStatus::Pending);
        assert_eq!(placed.total_amount, Decimal::from(20));
        assert_eq!(stock(&h, tenant_id, "A-1").await, 0);

        let err = h
            .orders
            .place_order(tenant_id, h.actor, order(&[("A-1", 1)]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Insufficient stock for A-1. Available: 0");

        let envelope = sub.try_recv().unwrap();
        assert_eq!(envelope.event_type(), ORDER_CREATED);
        assert!(envelope.belongs_to(tenant_id));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_restores_stock_once() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();
        let placed = h
            .orders
            .place_order(tenant_id, h.actor, order(&[("A-1", 3)]))
            .await
            .unwrap();

        let cancelled = h
            .orders
            .cancel_order(tenant_id, h.actor, placed.id)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(stock(&h, tenant_id, "A-1").await, 5);

        let again = h
            .orders
            .cancel_order(tenant_id, h.actor, placed.id)
            .await
            .unwrap_err();
        assert!(matches!(again, LedgerError::Domain(DomainError::InvalidState(_))));
        assert_eq!(stock(&h, tenant_id, "A-1").await, 5);

        let history = h
            .catalog
            .movements(tenant_id, &MovementFilter::for_sku(sku("A-1")))
            .await
            .unwrap();
        assert_eq!(history[0].reason, MovementReason::ReturnFromCustomer);
        assert_eq!(
            history[0].reference,
            Some(MovementReference::SalesOrder(placed.id.0))
        );
        assert_reconciles(&h, tenant_id, "A-1").await;
    }

    #[tokio::test]
    async fn status_policy_flags_or_rejects_off_table_transitions() {
        let permissive = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        permissive
            .catalog
            .create_product(tenant_id, permissive.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();
        let placed = permissive
            .orders
            .place_order(tenant_id, permissive.actor, order(&[("A-1", 1)]))
            .await
            .unwrap();

        let update = permissive
            .orders
            .update_order_status(tenant_id, placed.id, OrderStatus::Delivered)
            .await
            .unwrap();
        assert!(update.flagged);
        assert_eq!(update.record.status, OrderStatus::Delivered);

        let cancel_via_status = permissive
            .orders
            .update_order_status(tenant_id, placed.id, OrderStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(
            cancel_via_status,
            LedgerError::Domain(DomainError::Validation(_))
        ));

        let strict = harness(TransitionPolicy::Strict);
        strict
            .catalog
            .create_product(tenant_id, strict.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();
        let placed = strict
            .orders
            .place_order(tenant_id, strict.actor, order(&[("A-1", 1)]))
            .await
            .unwrap();
        let rejected = strict
            .orders
            .update_order_status(tenant_id, placed.id, OrderStatus::Delivered)
            .await
            .unwrap_err();
        assert!(matches!(rejected, LedgerError::Domain(DomainError::InvalidState(_))));

        let ok = strict
            .orders
            .update_order_status(tenant_id, placed.id, OrderStatus::Processing)
            .await
            .unwrap();
        assert!(!ok.flagged);
        assert_eq!(stock(&strict, tenant_id, "A-1").await, 4);
    }

    #[tokio::test]
    async fn receipt_is_capped_at_the_outstanding_quantity() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        let sub = h.bus.subscribe();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 0, 0), ("B-2", 0, 0)]))
            .await
            .unwrap();
        let po = h
            .orders
            .create_purchase_order(tenant_id, purchase(&[("A-1", 10), ("B-2", 4)]))
            .await
            .unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Draft);
        assert_eq!(po.total_amount, Decimal::from(56));

        let po = h
            .orders
            .receive_purchase_order(
                tenant_id,
                h.actor,
                po.id,
                vec![ReceiptLine {
                    sku: "A-1".to_string(),
                    quantity: 15,
                    actual_unit_cost: Some(Decimal::from(5)),
                }],
            )
            .await
            .unwrap();
        assert_eq!(stock(&h, tenant_id, "A-1").await, 10);
        assert_eq!(po.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(po.total_amount, Decimal::from(66));

        let po = h
            .orders
            .receive_purchase_order(
                tenant_id,
                h.actor,
                po.id,
                vec![
                    ReceiptLine {
                        sku: "B-2".to_string(),
                        quantity: 4,
                        actual_unit_cost: None,
                    },
                    ReceiptLine {
                        sku: "A-1".to_string(),
                        quantity: 3,
                        actual_unit_cost: None,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(po.status, PurchaseOrderStatus::Received);
        assert!(po.received_date.is_some());
        assert_eq!(stock(&h, tenant_id, "A-1").await, 10);
        assert_eq!(stock(&h, tenant_id, "B-2").await, 4);

        let closed = h
            .orders
            .receive_purchase_order(
                tenant_id,
                h.actor,
                po.id,
                vec![ReceiptLine {
                    sku: "A-1".to_string(),
                    quantity: 1,
                    actual_unit_cost: None,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(closed, LedgerError::Domain(DomainError::InvalidState(_))));

        let topics: Vec<String> = std::iter::from_fn(|| sub.try_recv().ok())
            .map(|envelope| envelope.event_type().to_string())
            .collect();
        assert_eq!(topics, vec![PO_UPDATED, PO_UPDATED]);
        assert_reconciles(&h, tenant_id, "A-1").await;
        assert_reconciles(&h, tenant_id, "B-2").await;
    }

    #[tokio::test]
    async fn out_of_range_amounts_are_rejected_before_stock_moves() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();

        let mut huge = order(&[("A-1", 2)]);
        huge.items[0].unit_price = Decimal::MAX;
        let err = h
            .orders
            .place_order(tenant_id, h.actor, huge)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
        assert_eq!(stock(&h, tenant_id, "A-1").await, 5);
        assert!(h.orders.list_orders(tenant_id, None).await.unwrap().is_empty());

        let mut free = purchase(&[("A-1", 3)]);
        free.items[0].unit_cost = Decimal::ZERO;
        let po = h
            .orders
            .create_purchase_order(tenant_id, free)
            .await
            .unwrap();

        let err = h
            .orders
            .receive_purchase_order(
                tenant_id,
                h.actor,
                po.id,
                vec![ReceiptLine {
                    sku: "A-1".to_string(),
                    quantity: 3,
                    actual_unit_cost: Some(Decimal::MAX),
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));
        assert_eq!(h.orders.get_purchase_order(tenant_id, po.id).await.unwrap(), po);
        assert_eq!(stock(&h, tenant_id, "A-1").await, 5);
        assert_reconciles(&h, tenant_id, "A-1").await;
    }

    #[tokio::test]
    async fn receipt_status_cannot_be_set_directly() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 0, 0)]))
            .await
            .unwrap();
        let po = h
            .orders
            .create_purchase_order(tenant_id, purchase(&[("A-1", 10)]))
            .await
            .unwrap();

        let err = h
            .orders
            .update_purchase_order_status(tenant_id, po.id, PurchaseOrderStatus::Received)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Validation(_))));

        let sent = h
            .orders
            .update_purchase_order_status(tenant_id, po.id, PurchaseOrderStatus::Sent)
            .await
            .unwrap();
        assert!(!sent.flagged);
        assert_eq!(sent.record.status, PurchaseOrderStatus::Sent);
        assert_eq!(stock(&h, tenant_id, "A-1").await, 0);
    }

    #[tokio::test]
    async fn low_stock_alert_clears_once_replenishment_is_on_order() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 5, 10), ("B-2", 50, 10)]))
            .await
            .unwrap();

        let alerts = h.low_stock.alerts(tenant_id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].sku.as_str(), "A-1");
        assert_eq!(alerts[0].current_stock, 5);
        assert_eq!(alerts[0].pending_stock, 0);

        let po = h
            .orders
            .create_purchase_order(tenant_id, purchase(&[("A-1", 20)]))
            .await
            .unwrap();
        h.orders
            .update_purchase_order_status(tenant_id, po.id, PurchaseOrderStatus::Sent)
            .await
            .unwrap();

        assert!(h.low_stock.alerts(tenant_id).await.unwrap().is_empty());
        assert!(h.low_stock.alerts(TenantId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tenants_cannot_reach_each_others_records() {
        let h = harness(TransitionPolicy::Permissive);
        let owner = TenantId::new();
        let intruder = TenantId::new();
        h.catalog
            .create_product(owner, h.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();
        let placed = h
            .orders
            .place_order(owner, h.actor, order(&[("A-1", 1)]))
            .await
            .unwrap();

        let err = h
            .orders
            .place_order(intruder, h.actor, order(&[("A-1", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::NotFound(_))));

        let err = h
            .orders
            .cancel_order(intruder, h.actor, placed.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::NotFound(_))));
        assert!(h.orders.get_order(intruder, placed.id).await.is_err());
        assert!(h.orders.list_orders(intruder, None).await.unwrap().is_empty());

        // Same SKU under another tenant is an independent variant.
        h.catalog
            .create_product(intruder, h.actor, product(&[("A-1", 7, 0)]))
            .await
            .unwrap();
        assert_eq!(stock(&h, owner, "A-1").await, 4);
        assert_eq!(stock(&h, intruder, "A-1").await, 7);
    }

    #[tokio::test]
    async fn duplicate_sku_within_a_tenant_conflicts() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();

        let err = h
            .catalog
            .create_product(tenant_id, h.actor, product(&[("B-2", 1, 0), ("A-1", 1, 0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Domain(DomainError::Conflict(_))));
        assert!(h.store.find_variant(tenant_id, &sku("B-2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_transaction_releases_locks_and_discards_writes() {
        let h = harness(TransitionPolicy::Permissive);
        let tenant_id = TenantId::new();
        h.catalog
            .create_product(tenant_id, h.actor, product(&[("A-1", 5, 0)]))
            .await
            .unwrap();

        {
            let mut tx = h.store.begin().await.unwrap();
            tx.adjust_stock(tenant_id, &sku("A-1"), -5, 0).await.unwrap();
        }

        let placed = h
            .orders
            .place_order(tenant_id, h.actor, order(&[("A-1", 5)]))
            .await
            .unwrap();
        assert_eq!(placed.items[0].quantity, 5);
        assert_eq!(stock(&h, tenant_id, "A-1").await, 0);
        assert_reconciles(&h, tenant_id, "A-1").await;
    }
}
