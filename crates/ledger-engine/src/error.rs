//! # Engine Error Types
//!
//! What callers of the ledger engine see.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Engine Error Categories                           │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐  │
//! │  │   Validation     │  │    Conflict      │  │     NotFound         │  │
//! │  │                  │  │                  │  │                      │  │
//! │  │ bad bounds,      │  │ RowVersion       │  │ missing sale,        │  │
//! │  │ format, stock,   │  │ InvoiceNumber ↻  │  │ product, customer,   │  │
//! │  │ locked/deleted   │  │ ExternalReference│  │ payment, version     │  │
//! │  │                  │  │ EditInProgress   │  │                      │  │
//! │  │ never retried    │  │ VersionVerify    │  │ never retried        │  │
//! │  │                  │  │ Contention       │  │                      │  │
//! │  └──────────────────┘  └──────────────────┘  └──────────────────────┘  │
//! │                                                                         │
//! │  ↻ = retried inside Create with backoff; all other conflicts go back   │
//! │      to the caller for reload-and-retry                                │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐  │
//! │  │ Infrastructure   │  │     Config       │  │     Snapshot         │  │
//! │  │ DbError          │  │ bad TOML / env   │  │ stored JSON does not │  │
//! │  │                  │  │ / vat setting    │  │ encode or decode     │  │
//! │  └──────────────────┘  └──────────────────┘  └──────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every error raised inside an operation drops the open transaction, so
//! nothing it wrote survives.

use std::fmt;

use ledger_core::{CoreError, ValidationError, ValidationReport};
use ledger_db::DbError;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Which optimistic-concurrency guard tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Presented row version is not the stored one.
    RowVersion,
    /// Invoice number already used by a live invoice.
    InvoiceNumber,
    /// External reference already attached to a live invoice.
    ExternalReference,
    /// Another user touched the invoice within the collision window.
    EditInProgress,
    /// Post-write read-back did not show the expected version.
    VersionVerification,
    /// Another writer held the database lock.
    Contention,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictKind::RowVersion => "row version",
            ConflictKind::InvoiceNumber => "invoice number",
            ConflictKind::ExternalReference => "external reference",
            ConflictKind::EditInProgress => "edit in progress",
            ConflictKind::VersionVerification => "version verification",
            ConflictKind::Contention => "contention",
        };
        f.write_str(s)
    }
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input failed the validation guard.
    #[error("Validation failed: {0}")]
    Validation(ValidationReport),

    /// Optimistic-concurrency or uniqueness conflict.
    #[error("Conflict ({kind}): {message}")]
    Conflict { kind: ConflictKind, message: String },

    /// A referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Storage failure.
    #[error("Infrastructure error: {0}")]
    Infrastructure(DbError),

    /// Invalid configuration or settings value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An invoice version or payment replay snapshot failed to encode or decode.
    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

impl EngineError {
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        EngineError::Conflict {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True for the duplicate-invoice-number conflict that Create retries.
    pub fn is_retryable_invoice_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict {
                kind: ConflictKind::InvoiceNumber,
                ..
            }
        )
    }

    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        match self {
            EngineError::Conflict { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationReport> for EngineError {
    fn from(report: ValidationReport) -> Self {
        EngineError::Validation(report)
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Validation(ValidationReport::from_error(err))
    }
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => e.into(),
            CoreError::Snapshot(msg) => EngineError::Snapshot(msg),
        }
    }
}

/// ## Error Mapping
/// ```text
/// DbError::NotFound                        → EngineError::NotFound
/// DbError::UniqueViolation (invoice_no)    → Conflict(InvoiceNumber)
/// DbError::UniqueViolation (external_ref)  → Conflict(ExternalReference)
/// DbError::Busy                            → Conflict(Contention)
/// Other                                    → Infrastructure
/// ```
impl From<DbError> for EngineError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            ref e if e.is_unique_violation_on("invoice_no") => {
                EngineError::conflict(ConflictKind::InvoiceNumber, e.to_string())
            }
            ref e if e.is_unique_violation_on("external_ref") => {
                EngineError::conflict(ConflictKind::ExternalReference, e.to_string())
            }
            DbError::Busy(msg) => EngineError::conflict(ConflictKind::Contention, msg),
            other => EngineError::Infrastructure(other),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from(err).into()
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Snapshot(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_error_mapping() {
        let err: EngineError = DbError::duplicate("sales.invoice_no", "2001").into();
        assert!(err.is_retryable_invoice_conflict());

        let err: EngineError = DbError::duplicate("sales.external_ref", "ext-1").into();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::ExternalReference));
        assert!(!err.is_retryable_invoice_conflict());

        let err: EngineError = DbError::not_found("Sale", "s1").into();
        assert!(matches!(err, EngineError::NotFound { .. }));

        let err: EngineError = DbError::Busy("database is locked".into()).into();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::Contention));

        let err: EngineError = DbError::QueryFailed("syntax".into()).into();
        assert!(matches!(err, EngineError::Infrastructure(_)));
    }

    #[test]
    fn test_only_invoice_conflicts_are_retryable() {
        assert!(EngineError::conflict(ConflictKind::InvoiceNumber, "dup").is_retryable_invoice_conflict());
        assert!(!EngineError::conflict(ConflictKind::RowVersion, "stale").is_retryable_invoice_conflict());
        assert!(!EngineError::from(ValidationError::required("items")).is_retryable_invoice_conflict());
    }

    #[test]
    fn test_snapshot_failures_are_not_config_errors() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(EngineError::from(json_err), EngineError::Snapshot(_)));

        let err: EngineError = CoreError::Snapshot("missing field `sale`".into()).into();
        assert_eq!(err.to_string(), "Snapshot error: missing field `sale`");
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::conflict(ConflictKind::EditInProgress, "invoice 2001 is being edited by u2");
        assert_eq!(
            err.to_string(),
            "Conflict (edit in progress): invoice 2001 is being edited by u2"
        );
    }
}
