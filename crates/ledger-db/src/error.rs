//! # Database Errors
//!
//! ```text
//! sqlx::Error ──► DbError ──► EngineError (ledger-engine)
//!                   │
//!                   ├── UniqueViolation{sales.invoice_no}      → retried by create
//!                   ├── UniqueViolation{sales.external_ref}    → replay / conflict
//!                   ├── UniqueViolation{payment_idempotency.key} → replay
//!                   ├── Busy                                   → Conflict(Contention)
//!                   └── everything else                        → Infrastructure
//! ```

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// `field` is SQLite's `table.column` from the failed constraint.
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// A writer held the lock past `busy_timeout`.
    #[error("Database is busy: {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// CHECK constraints land here (negative stock, bad enum text).
    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(field: impl Into<String>, value: impl Into<String>) -> Self {
        DbError::UniqueViolation {
            field: field.into(),
            value: value.into(),
        }
    }

    /// True for a unique violation whose `table.column` contains `column`.
    pub fn is_unique_violation_on(&self, column: &str) -> bool {
        matches!(self, DbError::UniqueViolation { field, .. } if field.contains(column))
    }

    /// Sorts a SQLite driver message into a variant.
    fn from_sqlite_message(msg: &str) -> Self {
        const UNIQUE: &str = "UNIQUE constraint failed: ";

        if let Some(rest) = msg.split(UNIQUE).nth(1) {
            // Composite constraints list several columns; the first names the table
            let field = rest.split(',').next().unwrap_or(rest).trim();
            DbError::duplicate(field, "unknown")
        } else if msg.contains("FOREIGN KEY constraint failed") {
            DbError::ForeignKeyViolation(msg.to_string())
        } else if msg.contains("database is locked") || msg.contains("database is busy") {
            DbError::Busy(msg.to_string())
        } else {
            DbError::QueryFailed(msg.to_string())
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),
            sqlx::Error::Database(db_err) => DbError::from_sqlite_message(db_err.message()),
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::PoolClosed => DbError::ConnectionFailed("pool closed".to_string()),
            other => DbError::Internal(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_messages_are_classified() {
        let err = DbError::from_sqlite_message("UNIQUE constraint failed: sales.invoice_no");
        assert!(err.is_unique_violation_on("invoice_no"));

        let err = DbError::from_sqlite_message("UNIQUE constraint failed: payment_idempotency.key");
        assert!(err.is_unique_violation_on("payment_idempotency.key"));

        assert!(matches!(
            DbError::from_sqlite_message("database is locked"),
            DbError::Busy(_)
        ));
        assert!(matches!(
            DbError::from_sqlite_message("FOREIGN KEY constraint failed"),
            DbError::ForeignKeyViolation(_)
        ));
        assert!(matches!(
            DbError::from_sqlite_message("CHECK constraint failed: stock_qty >= 0"),
            DbError::QueryFailed(_)
        ));
    }

    #[test]
    fn test_unique_violation_column_match() {
        let err = DbError::duplicate("sales.invoice_no", "2001");
        assert!(err.is_unique_violation_on("invoice_no"));
        assert!(!err.is_unique_violation_on("external_ref"));
        assert!(!DbError::Busy("locked".into()).is_unique_violation_on("invoice_no"));
    }
}
