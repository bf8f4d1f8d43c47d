//! # Error Types
//!
//! ```text
//! ValidationError ─► ValidationReport (validation.rs) ─► EngineError::Validation
//! CoreError::Snapshot ─► a stored invoice version that no longer decodes
//! ```
//!
//! Storage failures are `DbError` in ledger-db; this crate never touches I/O.

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

#[derive(Debug, Error)]
pub enum CoreError {
    /// A stored invoice snapshot could not be encoded or decoded.
    #[error("Invalid invoice snapshot: {0}")]
    Snapshot(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Every variant names the offending field so a [`ValidationReport`]
/// can be shown line by line.
///
/// [`ValidationReport`]: crate::validation::ValidationReport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: String,
        min: String,
        max: String,
    },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// More decimal places than money/quantity storage allows.
    #[error("{field} must have at most {max} decimal places")]
    TooPrecise { field: String, max: u32 },

    /// Invalid format (e.g. a non-numeric invoice number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Not enough stock for the requested base quantity.
    #[error("Insufficient stock for {product}: available {available}, requested {requested}")]
    InsufficientStock {
        product: String,
        available: String,
        requested: String,
    },

    /// Payment exceeds what is still owed on the invoice.
    #[error("Payment {amount} exceeds outstanding {outstanding} on invoice {invoice_no}")]
    ExceedsOutstanding {
        invoice_no: String,
        amount: String,
        outstanding: String,
    },

    /// Invoice does not belong to the stated customer.
    #[error("Invoice {invoice_no} does not belong to customer {customer_id}")]
    CustomerMismatch {
        invoice_no: String,
        customer_id: String,
    },

    /// The entity is in a state that does not allow the operation.
    #[error("{entity} {id}: {reason}")]
    InvalidState {
        entity: String,
        id: String,
        reason: String,
    },
}

impl ValidationError {
    pub fn required(field: &str) -> Self {
        ValidationError::Required {
            field: field.to_string(),
        }
    }

    pub fn not_allowed(field: &str, allowed: &[&str]) -> Self {
        ValidationError::NotAllowed {
            field: field.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn invalid_state(entity: &str, id: &str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidState {
            entity: entity.to_string(),
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ValidationError::InsufficientStock {
            product: "SKU-1".to_string(),
            available: "8.00".to_string(),
            requested: "10.00".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for SKU-1: available 8.00, requested 10.00"
        );

        let err = ValidationError::required("items");
        assert_eq!(err.to_string(), "items is required");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let core_err: CoreError = ValidationError::required("customer_id").into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
