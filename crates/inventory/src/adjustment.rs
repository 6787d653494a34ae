//! Manual stock adjustment requests (stock takes, damage write-offs, returns).

use serde::{Deserialize, Serialize};

use stockwise_catalog::Sku;
use stockwise_core::{DomainError, DomainResult};

use crate::{MovementDirection, MovementReason};

/// Signed adjustment: positive books stock in, negative books it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub sku: String,
    pub quantity: i64,
    #[serde(default)]
    pub reason: Option<MovementReason>,
}

/// A validated adjustment, split into direction and positive quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAdjustment {
    pub sku: Sku,
    pub direction: MovementDirection,
    pub quantity: i64,
    pub reason: MovementReason,
}

impl StockAdjustment {
    pub fn validate(&self) -> DomainResult<ValidatedAdjustment> {
        let sku = Sku::parse(&self.sku)?;
        let direction = match self.quantity {
            0 => {
                return Err(DomainError::validation(format!(
                    "adjustment quantity for {sku} cannot be zero"
                )));
            }
            q if q > 0 => MovementDirection::In,
            _ => MovementDirection::Out,
        };
        let quantity = self.quantity.checked_abs().ok_or_else(|| {
            DomainError::validation(format!("adjustment quantity for {sku} is out of range"))
        })?;

        Ok(ValidatedAdjustment {
            sku,
            direction,
            quantity,
            reason: self.reason.unwrap_or_default(),
        })
    }
}
