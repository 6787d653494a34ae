//! Sales orders: placement input validation, status lifecycle and cancellation rules.
//!
//! Pure domain logic; stock effects are driven by the order coordinator in `stockwise-infra`.

pub mod order;

pub use order::{
    OrderLine, OrderLineRequest, OrderStatus, PlaceOrder, SalesOrder, SalesOrderId, ValidatedLine,
    order_total,
};
