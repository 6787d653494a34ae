//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Business failures surfaced by ledger operations.
///
/// Infrastructure failures (database, lock poisoning) are not represented here;
/// they live next to the storage code that produces them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, rejected before anything is mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced record does not exist within the caller's tenant.
    #[error("{0} not found")]
    NotFound(String),

    /// A deduction would take stock below zero.
    #[error("Insufficient stock for {sku}. Available: {available}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// The operation is not allowed in the record's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identifier failed to parse.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A uniqueness rule was violated (e.g. SKU already in use).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn insufficient_stock(sku: impl Into<String>, available: i64, requested: i64) -> Self {
        Self::InsufficientStock {
            sku: sku.into(),
            available,
            requested,
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_sku_and_available() {
        let err = DomainError::insufficient_stock("A-1", 0, 1);
        assert_eq!(err.to_string(), "Insufficient stock for A-1. Available: 0");
    }

    #[test]
    fn not_found_message_names_the_record() {
        let err = DomainError::not_found("sales order 42");
        assert_eq!(err.to_string(), "sales order 42 not found");
    }
}
