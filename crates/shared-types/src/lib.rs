//! # Shared Types - Domain Entities for the Scope Manager
//!
//! Defines the catalog entities, the semantic error taxonomy, secret
//! generation, and the RPC message types shared across subsystems.
//!
//! ## Clusters
//!
//! - **Catalog**: `DbServer`, `ScanScope`, `ScopeView`, `Grant`, `ScanAgent`, `SqlLog`
//! - **Scope DB**: `Target`, `ProgressCounts`, `CycleRatios`
//! - **Settings**: `ScanSettings` (per-scope scan preset)
//! - **Wire**: `Request`, `Response`, `WireError`
//!
//! ## Sensitive-Data Partitioning
//!
//! A `ScanScope` travels in two shapes: the redacted form produced by
//! [`ScanScope::redacted`] (the default for every caller) and the full form
//! released only through the privilege-gated sensitive read-out. The
//! projection lives here so every egress path shares one implementation.

pub mod entities;
pub mod errors;
pub mod ipc;
pub mod secrets;
pub mod settings;

pub use entities::{
    AgentReport, CycleRatios, DbServer, Grant, ProgressCounts, ScanAgent, ScanScope, ScanStatus,
    ScopeType, ScopeView, SqlLog, SyncCounts, Target, UserCredential,
};
pub use errors::{ErrorKind, ManagerError, ManagerResult};
pub use ipc::{Request, Response, WireError};
pub use settings::ScanSettings;

/// Length of the opaque scope secret handed to scan agents.
pub const SCOPE_SECRET_LEN: usize = 64;

/// Length of generated scope database names (lowercase, globally unique).
pub const SCOPE_DB_NAME_LEN: usize = 10;

/// Length of generated access-token passwords.
pub const TOKEN_PASSWORD_LEN: usize = 64;

/// Reserved notification id meaning "live set changed, no specific scope".
pub const NOTIFY_LIVE_SET_CHANGED: u64 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_notification_id() {
        assert_eq!(NOTIFY_LIVE_SET_CHANGED, 0);
    }

    #[test]
    fn test_secret_lengths() {
        assert_eq!(SCOPE_SECRET_LEN, 64);
        assert_eq!(SCOPE_DB_NAME_LEN, 10);
    }
}
