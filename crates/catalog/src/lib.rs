//! Product catalog: products, their variants and SKUs.

pub mod product;
pub mod sku;

pub use product::{
    DEFAULT_REORDER_LEVEL, NewProduct, NewVariant, Product, ProductFilter, ProductId,
    ProductUpdate, ProductVariant, VariantUpdate,
};
pub use sku::Sku;
