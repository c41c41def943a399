//! # Error Taxonomy
//!
//! The semantic error kinds shared by every subsystem and the manager-level
//! error enum that crosses the RPC boundary.
//!
//! ## Design Principles
//!
//! - Errors are semantic, not syntactic: callers dispatch on kind.
//! - Secret-based lookups that miss return empty results, not errors, so
//!   brute-force probing does not produce critical log noise.
//! - Transient kinds (`RpcConnectivity`, `NotifierShuttingDown`) tell the
//!   caller to retry or re-subscribe.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Semantic classification carried across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Unauthorized,
    Transient,
    Internal,
}

/// Manager-level errors as observed by RPC callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ManagerError {
    /// The addressed record does not exist.
    #[error("record not found")]
    RecordNotFound,

    /// A view with this name already exists within the scope.
    #[error("view name already existing")]
    ViewNameExisting,

    /// A target synchronization is already running for this scope.
    #[error("scope update already ongoing")]
    ScopeUpdateOngoing,

    /// The database server is still referenced by at least one scope.
    #[error("database server still in use")]
    DatabaseInUse,

    /// A database with the generated name already exists on the server.
    #[error("database already existing")]
    DatabaseDuplicate,

    /// The caller supplied an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The presented privilege secret is not configured.
    #[error("invalid privilege secret")]
    InvalidPrivilege,

    /// The RPC transport failed; the caller should retry.
    #[error("rpc connectivity: {0}")]
    RpcConnectivity(String),

    /// The notifier is shutting down; the caller should re-subscribe later.
    #[error("notifier shutting down")]
    NotifierShuttingDown,

    /// Any other unexpected failure. Details are logged server-side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ManagerError {
    /// Classify this error for wire transport and caller dispatch.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::RecordNotFound => ErrorKind::NotFound,
            ManagerError::ViewNameExisting
            | ManagerError::ScopeUpdateOngoing
            | ManagerError::DatabaseInUse
            | ManagerError::DatabaseDuplicate => ErrorKind::Conflict,
            ManagerError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ManagerError::InvalidPrivilege => ErrorKind::Unauthorized,
            ManagerError::RpcConnectivity(_) | ManagerError::NotifierShuttingDown => {
                ErrorKind::Transient
            }
            ManagerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Shorthand for an invalid-argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        ManagerError::InvalidArgument(msg.into())
    }

    /// Shorthand for an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        ManagerError::Internal(msg.into())
    }
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
