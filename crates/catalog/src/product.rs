use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockwise_core::{AggregateId, DomainError, DomainResult, TenantId};

use crate::Sku;

/// Reorder threshold applied when a variant is created without one.
pub const DEFAULT_REORDER_LEVEL: i64 = 10;

/// Product identifier (tenant-scoped through the records that carry it).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One sellable variant of a product. `stock` is only ever changed through the
/// stock mutation engine; every other field is plain metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub sku: Sku,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub buying_price: Decimal,
    pub selling_price: Decimal,
    pub stock: i64,
    pub reorder_level: i64,
}

impl ProductVariant {
    pub fn is_at_or_below_reorder_level(&self) -> bool {
        self.stock <= self.reorder_level
    }
}

/// Catalog entry owning one or more variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub brand: String,
    pub variants: Vec<ProductVariant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn variant(&self, sku: &Sku) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| &v.sku == sku)
    }

    /// Records from another tenant are reported as missing, never as forbidden.
    pub fn ensure_tenant(&self, tenant_id: TenantId) -> DomainResult<()> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::not_found(format!("product {}", self.id)));
        }
        Ok(())
    }

    /// Apply a metadata update.
    ///
    /// Returns the variants added by the update; their opening stock still has
    /// to be written to the movement ledger by the caller.
    pub fn apply_update(
        &mut self,
        update: ProductUpdate,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<ProductVariant>> {
        if let Some(name) = &update.name {
            self.name = required("name", name)?;
        }
        if let Some(category) = &update.category {
            self.category = required("category", category)?;
        }
        if let Some(brand) = &update.brand {
            self.brand = required("brand", brand)?;
        }
        if let Some(description) = update.description {
            self.description = optional(description);
        }

        for change in update.variants {
            let sku = Sku::parse(&change.sku)?;
            let product_id = self.id;
            let variant = self
                .variants
                .iter_mut()
                .find(|v| v.sku == sku)
                .ok_or_else(|| {
                    DomainError::not_found(format!("variant {sku} on product {product_id}"))
                })?;
            change.apply_to(variant)?;
        }

        let mut added = Vec::with_capacity(update.new_variants.len());
        for new_variant in update.new_variants {
            let variant = new_variant.validate()?;
            let taken = self.variant(&variant.sku).is_some()
                || added.iter().any(|v: &ProductVariant| v.sku == variant.sku);
            if taken {
                return Err(DomainError::conflict(format!(
                    "SKU {} already exists on this product",
                    variant.sku
                )));
            }
            added.push(variant);
        }
        self.variants.extend(added.iter().cloned());

        self.updated_at = now;
        Ok(added)
    }
}

/// Input for a new variant. `stock` is the opening balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVariant {
    pub sku: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    pub buying_price: Decimal,
    pub selling_price: Decimal,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub reorder_level: Option<i64>,
}

impl NewVariant {
    pub fn validate(self) -> DomainResult<ProductVariant> {
        let sku = Sku::parse(&self.sku)?;
        non_negative_price("buying_price", self.buying_price)?;
        non_negative_price("selling_price", self.selling_price)?;
        if self.stock < 0 {
            return Err(DomainError::validation(format!(
                "stock for {sku} cannot be negative"
            )));
        }
        let reorder_level = self.reorder_level.unwrap_or(DEFAULT_REORDER_LEVEL);
        if reorder_level < 0 {
            return Err(DomainError::validation(format!(
                "reorder_level for {sku} cannot be negative"
            )));
        }
        let name = match self.name.trim() {
            "" => sku.to_string(),
            name => name.to_string(),
        };

        Ok(ProductVariant {
            sku,
            name,
            attributes: self.attributes,
            buying_price: self.buying_price,
            selling_price: self.selling_price,
            stock: self.stock,
            reorder_level,
        })
    }
}

/// Input for product creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub brand: String,
    pub variants: Vec<NewVariant>,
}

impl NewProduct {
    pub fn into_product(
        self,
        tenant_id: TenantId,
        id: ProductId,
        now: DateTime<Utc>,
    ) -> DomainResult<Product> {
        let name = required("name", &self.name)?;
        let category = required("category", &self.category)?;
        let brand = required("brand", &self.brand)?;

        if self.variants.is_empty() {
            return Err(DomainError::validation(
                "a product needs at least one variant",
            ));
        }

        let mut seen = HashSet::new();
        let mut variants = Vec::with_capacity(self.variants.len());
        for input in self.variants {
            let variant = input.validate()?;
            if !seen.insert(variant.sku.clone()) {
                return Err(DomainError::validation(format!(
                    "SKU {} appears more than once",
                    variant.sku
                )));
            }
            variants.push(variant);
        }

        Ok(Product {
            id,
            tenant_id,
            name,
            description: self.description.and_then(optional),
            category,
            brand,
            variants,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Metadata edits for one existing variant. Stock is deliberately absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantUpdate {
    pub sku: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub buying_price: Option<Decimal>,
    #[serde(default)]
    pub selling_price: Option<Decimal>,
    #[serde(default)]
    pub reorder_level: Option<i64>,
}

impl VariantUpdate {
    fn apply_to(self, variant: &mut ProductVariant) -> DomainResult<()> {
        if let Some(name) = self.name {
            variant.name = required("variant name", &name)?;
        }
        if let Some(attributes) = self.attributes {
            variant.attributes = attributes;
        }
        if let Some(price) = self.buying_price {
            non_negative_price("buying_price", price)?;
            variant.buying_price = price;
        }
        if let Some(price) = self.selling_price {
            non_negative_price("selling_price", price)?;
            variant.selling_price = price;
        }
        if let Some(level) = self.reorder_level {
            if level < 0 {
                return Err(DomainError::validation("reorder_level cannot be negative"));
            }
            variant.reorder_level = level;
        }
        Ok(())
    }
}

/// Partial product update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub variants: Vec<VariantUpdate>,
    #[serde(default)]
    pub new_variants: Vec<NewVariant>,
}

/// Product listing filter. `search` matches name or category, case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
}

impl ProductFilter {
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(search) = non_blank(&self.search) {
            let needle = search.to_lowercase();
            let hit = product.name.to_lowercase().contains(&needle)
                || product.category.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        if let Some(category) = non_blank(&self.category) {
            if !product.category.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(brand) = non_blank(&self.brand) {
            if !product.brand.eq_ignore_ascii_case(brand) {
                return false;
            }
        }
        true
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn required(field: &str, value: &str) -> DomainResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn non_negative_price(field: &str, value: Decimal) -> DomainResult<()> {
    if value < Decimal::ZERO {
        return Err(DomainError::validation(format!("{field} cannot be negative")));
    }
    Ok(())
}
