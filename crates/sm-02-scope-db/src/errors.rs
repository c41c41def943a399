//! # Broker Errors
//!
//! Failures talking to database servers and scope databases.

use shared_types::ManagerError;
use thiserror::Error;

/// Errors from admin and scope database operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A database with this name already exists on the server.
    #[error("database already existing: {0}")]
    DatabaseExists(String),

    /// The addressed database does not exist.
    #[error("database missing: {0}")]
    DatabaseMissing(String),

    /// The addressed role does not exist.
    #[error("role missing: {0}")]
    RoleMissing(String),

    /// The addressed target input does not exist.
    #[error("target missing: {0}")]
    TargetMissing(String),

    /// The server is unreachable or rejected the statement.
    #[error("scope db transport: {0}")]
    Transport(String),
}

impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // SQLSTATE: 42P04 duplicate_database, 3D000 invalid_catalog_name,
            // 42704 undefined_object (roles).
            match db.code().as_deref() {
                Some("42P04") => return BrokerError::DatabaseExists(db.message().to_string()),
                Some("3D000") => return BrokerError::DatabaseMissing(db.message().to_string()),
                Some("42704") => return BrokerError::RoleMissing(db.message().to_string()),
                _ => {}
            }
        }
        BrokerError::Transport(err.to_string())
    }
}

impl From<BrokerError> for ManagerError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::DatabaseExists(_) => ManagerError::DatabaseDuplicate,
            BrokerError::TargetMissing(_) => ManagerError::RecordNotFound,
            BrokerError::DatabaseMissing(msg)
            | BrokerError::RoleMissing(msg)
            | BrokerError::Transport(msg) => ManagerError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_database_maps_to_conflict() {
        let err: ManagerError = BrokerError::DatabaseExists("abcdefghij".into()).into();
        assert_eq!(err, ManagerError::DatabaseDuplicate);
    }

    #[test]
    fn test_target_missing_maps_to_not_found() {
        let err: ManagerError = BrokerError::TargetMissing("10.0.0.1".into()).into();
        assert_eq!(err, ManagerError::RecordNotFound);
    }
}
