//! # Catalog Errors
//!
//! Catalog failures keep their database-level distinction (duplicate key
//! vs. foreign key vs. transport) so the orchestrator can translate them
//! into the caller-facing conflict kinds without string matching.

use shared_types::ManagerError;
use thiserror::Error;

/// Errors from catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The addressed record does not exist.
    #[error("record not found")]
    NotFound,

    /// A uniqueness constraint was violated.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// A referential constraint was violated.
    #[error("foreign key violation: {0}")]
    ForeignKey(String),

    /// The record is still referenced and cannot be deleted.
    #[error("record still referenced: {0}")]
    InUse(String),

    /// The catalog database is unreachable or misbehaving.
    #[error("catalog transport: {0}")]
    Transport(String),
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => CatalogError::NotFound,
            sqlx::Error::Database(db) => {
                // SQLSTATE class 23: integrity constraint violations.
                match db.code().as_deref() {
                    Some("23505") => CatalogError::Duplicate(db.message().to_string()),
                    Some("23503") => CatalogError::ForeignKey(db.message().to_string()),
                    _ => CatalogError::Transport(db.message().to_string()),
                }
            }
            _ => CatalogError::Transport(err.to_string()),
        }
    }
}

impl From<CatalogError> for ManagerError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound => ManagerError::RecordNotFound,
            CatalogError::InUse(_) => ManagerError::DatabaseInUse,
            CatalogError::Duplicate(msg) | CatalogError::ForeignKey(msg) => {
                ManagerError::Internal(msg)
            }
            CatalogError::Transport(msg) => ManagerError::Internal(msg),
        }
    }
}
