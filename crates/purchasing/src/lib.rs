//! Purchase orders: creation, status lifecycle and capped goods receipt.

pub mod order;
pub mod receipt;

pub use order::{
    CreatePurchaseOrder, PoLine, PoLineRequest, PurchaseOrder, PurchaseOrderId,
    PurchaseOrderStatus, ValidatedPoLine, VendorId, purchase_total,
};
pub use receipt::{ReceiptLine, ReceiptOutcome, ReceivedGoods};
