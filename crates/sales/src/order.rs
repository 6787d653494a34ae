use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockwise_catalog::{ProductId, Sku};
use stockwise_core::{
    AggregateId, DomainError, DomainResult, Lifecycle, StatusChange, TenantId,
    TransitionPolicy, check_transition,
};

/// Sales order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Returned,
    ];
}

impl Lifecycle for OrderStatus {
    fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Returned => "RETURNED",
        }
    }

    fn successors(self) -> &'static [Self] {
        use OrderStatus::*;
        match self {
            Pending => &[Processing, Shipped, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered, Returned],
            Delivered => &[Returned],
            Cancelled | Returned => &[],
        }
    }
}

impl FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.label() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown order status '{s}'")))
    }
}

/// Order line as stored: the SKU resolved to its product at placement time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub sku: Sku,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Requested line, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineRequest {
    pub sku: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// A line that passed validation and is ready for stock deduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedLine {
    pub sku: Sku,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Place-order request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub customer_name: String,
    pub shipping_address: String,
    #[serde(default)]
    pub supplier_id: Option<AggregateId>,
    pub items: Vec<OrderLineRequest>,
    /// Defaults to the sum of `quantity * unit_price` over the items.
    #[serde(default)]
    pub total_amount: Option<Decimal>,
}

impl PlaceOrder {
    /// Validate everything that can be checked without touching stock.
    pub fn validate(&self) -> DomainResult<Vec<ValidatedLine>> {
        if self.customer_name.trim().is_empty() {
            return Err(DomainError::validation("customer_name cannot be empty"));
        }
        if self.shipping_address.trim().is_empty() {
            return Err(DomainError::validation("shipping_address cannot be empty"));
        }
        if self.items.is_empty() {
            return Err(DomainError::validation("an order needs at least one item"));
        }
        if self.total_amount.is_some_and(|t| t < Decimal::ZERO) {
            return Err(DomainError::validation("total_amount cannot be negative"));
        }

        let lines = self
            .items
            .iter()
            .map(|item| {
                let sku = Sku::parse(&item.sku)?;
                if item.quantity < 1 {
                    return Err(DomainError::validation(format!(
                        "quantity for {sku} must be at least 1"
                    )));
                }
                if item.unit_price < Decimal::ZERO {
                    return Err(DomainError::validation(format!(
                        "unit_price for {sku} cannot be negative"
                    )));
                }
                Ok(ValidatedLine {
                    sku,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;

        order_total(lines.iter().map(|line| (line.unit_price, line.quantity)))?;
        Ok(lines)
    }
}

/// `sum(unit_price * quantity)`; a validation error when it does not fit a `Decimal`.
pub fn order_total(lines: impl IntoIterator<Item = (Decimal, i64)>) -> DomainResult<Decimal> {
    lines
        .into_iter()
        .try_fold(Decimal::ZERO, |total, (unit_price, quantity)| {
            unit_price
                .checked_mul(Decimal::from(quantity))
                .and_then(|line_total| total.checked_add(line_total))
        })
        .ok_or_else(|| DomainError::validation("order total out of range"))
}

/// Sales order record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    pub id: SalesOrderId,
    pub tenant_id: TenantId,
    pub customer_name: String,
    pub shipping_address: String,
    pub supplier_id: Option<AggregateId>,
    pub items: Vec<OrderLine>,
    pub status: OrderStatus,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SalesOrder {
    /// Build a `PENDING` order from an already validated request whose lines
    /// have been deducted from stock.
    pub fn place(
        id: SalesOrderId,
        tenant_id: TenantId,
        request: PlaceOrder,
        items: Vec<OrderLine>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let computed = order_total(items.iter().map(|line| (line.unit_price, line.quantity)))?;

        Ok(Self {
            id,
            tenant_id,
            customer_name: request.customer_name.trim().to_string(),
            shipping_address: request.shipping_address.trim().to_string(),
            supplier_id: request.supplier_id,
            items,
            status: OrderStatus::Pending,
            total_amount: request.total_amount.unwrap_or(computed),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("sales order {}", self.id)));
        }
        Ok(())
    }

    /// Mark the order cancelled. The caller restores stock for every line.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::invalid_state("Order is already cancelled"));
        }
        self.status = OrderStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// Plain status change with no stock effect.
    ///
    /// Cancellation has its own path because it has to restore stock.
    pub fn change_status(
        &mut self,
        next: OrderStatus,
        policy: TransitionPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<StatusChange<OrderStatus>> {
        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::invalid_state(
                "a cancelled order cannot change status",
            ));
        }
        if next == OrderStatus::Cancelled {
            return Err(DomainError::validation(
                "use the cancel operation to cancel an order",
            ));
        }

        let change = check_transition(self.status, next, policy)?;
        self.status = next;
        self.updated_at = now;
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_order_id() -> SalesOrderId {
        SalesOrderId::new(AggregateId::new())
    }

    fn request(items: Vec<(&str, i64, i64)>) -> PlaceOrder {
        PlaceOrder {
            customer_name: "Ada".to_string(),
            shipping_address: "1 Analytical Way".to_string(),
            supplier_id: None,
            items: items
                .into_iter()
                .map(|(sku, quantity, price)| OrderLineRequest {
                    sku: sku.to_string(),
                    quantity,
                    unit_price: Decimal::from(price),
                })
                .collect(),
            total_amount: None,
        }
    }

    fn placed(tenant_id: TenantId) -> SalesOrder {
        let req = request(vec![("A-1", 2, 5), ("B-2", 1, 3)]);
        let lines = req
            .validate()
            .unwrap()
            .into_iter()
            .map(|l| OrderLine {
                product_id: ProductId::new(AggregateId::new()),
                sku: l.sku,
                quantity: l.quantity,
                unit_price: l.unit_price,
            })
            .collect();
        SalesOrder::place(test_order_id(), tenant_id, req, lines, Utc::now()).unwrap()
    }

    #[test]
    fn validate_rejects_empty_items() {
        match request(vec![]).validate().unwrap_err() {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for empty order"),
        }
    }

    #[test]
    fn validate_rejects_zero_quantity_and_negative_price() {
        assert!(request(vec![("A-1", 0, 5)]).validate().is_err());
        assert!(request(vec![("A-1", 1, -5)]).validate().is_err());
        assert!(request(vec![("  ", 1, 5)]).validate().is_err());
    }

    #[test]
    fn place_computes_total_when_not_given() {
        let order = placed(test_tenant_id());
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.total_amount, Decimal::from(13));
    }

    #[test]
    fn place_keeps_explicit_total() {
        let mut req = request(vec![("A-1", 1, 5)]);
        req.total_amount = Some(Decimal::from(4));
        let order =
            SalesOrder::place(test_order_id(), test_tenant_id(), req, vec![], Utc::now()).unwrap();
        assert_eq!(order.total_amount, Decimal::from(4));
    }

    #[test]
    fn total_out_of_range_is_a_validation_error() {
        let mut req = request(vec![("A-1", 2, 1)]);
        req.items[0].unit_price = Decimal::MAX;
        match req.validate().unwrap_err() {
            DomainError::Validation(msg) => assert_eq!(msg, "order total out of range"),
            other => panic!("Expected Validation error, got {other:?}"),
        }

        // Each line fits on its own; the sum does not.
        let mut req = request(vec![("A-1", 1, 1), ("B-2", 1, 1)]);
        for item in &mut req.items {
            item.unit_price = Decimal::MAX;
        }
        assert!(matches!(req.validate(), Err(DomainError::Validation(_))));

        let req = request(vec![("A-1", i64::MAX, 1)]);
        assert_eq!(
            order_total(req.validate().unwrap().iter().map(|l| (l.unit_price, l.quantity))).unwrap(),
            Decimal::from(i64::MAX)
        );
    }

    #[test]
    fn place_rejects_lines_whose_total_overflows() {
        let req = request(vec![("A-1", 1, 1)]);
        let lines = vec![OrderLine {
            product_id: ProductId::new(AggregateId::new()),
            sku: Sku::parse("A-1").unwrap(),
            quantity: 3,
            unit_price: Decimal::MAX,
        }];
        assert!(matches!(
            SalesOrder::place(test_order_id(), test_tenant_id(), req, lines, Utc::now()),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn cancel_twice_is_invalid_state() {
        let mut order = placed(test_tenant_id());
        order.cancel(Utc::now()).unwrap();

        match order.cancel(Utc::now()).unwrap_err() {
            DomainError::InvalidState(msg) => assert_eq!(msg, "Order is already cancelled"),
            _ => panic!("Expected InvalidState for second cancel"),
        }
    }

    #[test]
    fn listed_status_change_is_not_flagged() {
        let mut order = placed(test_tenant_id());
        let change = order
            .change_status(OrderStatus::Processing, TransitionPolicy::Strict, Utc::now())
            .unwrap();
        assert!(!change.flagged);
        assert_eq!(order.status, OrderStatus::Processing);
    }

    #[test]
    fn off_table_status_change_depends_on_policy() {
        let mut order = placed(test_tenant_id());
        let change = order
            .change_status(OrderStatus::Delivered, TransitionPolicy::Permissive, Utc::now())
            .unwrap();
        assert!(change.flagged);
        assert_eq!(order.status, OrderStatus::Delivered);

        let mut strict = placed(test_tenant_id());
        assert!(
            strict
                .change_status(OrderStatus::Delivered, TransitionPolicy::Strict, Utc::now())
                .is_err()
        );
        assert_eq!(strict.status, OrderStatus::Pending);
    }

    #[test]
    fn status_path_cannot_cancel_or_revive() {
        let mut order = placed(test_tenant_id());
        match order
            .change_status(OrderStatus::Cancelled, TransitionPolicy::Permissive, Utc::now())
            .unwrap_err()
        {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error when cancelling through status path"),
        }

        order.cancel(Utc::now()).unwrap();
        match order
            .change_status(OrderStatus::Pending, TransitionPolicy::Permissive, Utc::now())
            .unwrap_err()
        {
            DomainError::InvalidState(_) => {}
            _ => panic!("Expected InvalidState for cancelled order"),
        }
    }

    #[test]
    fn status_wire_names_parse() {
        for status in OrderStatus::ALL {
            assert_eq!(status.label().parse::<OrderStatus>().unwrap(), status);
        }
    }
}
