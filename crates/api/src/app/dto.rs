use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockwise_catalog::{NewProduct, ProductId, Sku};
use stockwise_core::{AggregateId, DomainError};
use stockwise_infra::StatusUpdate;
use stockwise_inventory::MovementFilter;
use stockwise_purchasing::ReceiptLine;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct BulkCreateProductsRequest {
    pub products: Vec<NewProduct>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveRequest {
    pub items: Vec<ReceiptLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MovementsQuery {
    pub product_id: Option<String>,
    pub sku: Option<String>,
}

impl MovementsQuery {
    pub fn into_filter(self) -> Result<MovementFilter, DomainError> {
        let product_id = self
            .product_id
            .as_deref()
            .map(|raw| raw.parse::<AggregateId>().map(ProductId::new))
            .transpose()?;
        let sku = self.sku.as_deref().map(Sku::parse).transpose()?;
        Ok(MovementFilter { product_id, sku })
    }
}

// -------------------------
// Response DTOs
// -------------------------

/// Record plus whether the transition was off the table.
#[derive(Debug, Serialize)]
pub struct StatusUpdateResponse<T> {
    #[serde(flatten)]
    pub record: T,
    pub transition_flagged: bool,
}

impl<T> From<StatusUpdate<T>> for StatusUpdateResponse<T> {
    fn from(update: StatusUpdate<T>) -> Self {
        Self {
            record: update.record,
            transition_flagged: update.flagged,
        }
    }
}

// -------------------------
// Parsing helpers
// -------------------------

pub fn parse_id(raw: &str) -> Result<AggregateId, axum::response::Response> {
    raw.parse().map_err(errors::domain_error_to_response)
}

/// Status names use their wire form (`PENDING`, `PARTIALLY_RECEIVED`, ...).
pub fn parse_status<S>(raw: &str) -> Result<S, axum::response::Response>
where
    S: FromStr<Err = DomainError>,
{
    raw.trim().parse().map_err(errors::domain_error_to_response)
}

pub fn parse_optional_status<S>(raw: Option<&str>) -> Result<Option<S>, axum::response::Response>
where
    S: FromStr<Err = DomainError>,
{
    raw.filter(|s| !s.trim().is_empty())
        .map(parse_status::<S>)
        .transpose()
}
