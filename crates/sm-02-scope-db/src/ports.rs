//! # Broker Ports
//!
//! The handle interfaces the orchestrator drives.
//!
//! Production: sqlx adapters (adapters/postgres.rs)
//! Testing: `MemoryCluster` (adapters/memory.rs)

use crate::errors::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{ProgressCounts, ScopeView, SyncCounts, Target};
use std::sync::Arc;

/// Credential material for a database role.
///
/// User grants arrive pre-hashed (SCRAM-SHA-256 verifier); token grants use
/// a manager-generated cleartext password that is disclosed exactly once.
#[derive(Debug, Clone)]
pub enum RoleCredential {
    /// Manager-generated cleartext (access tokens).
    Password(String),
    /// Pre-hashed SCRAM-SHA-256 verifier (user grants).
    ScramHash(String),
}

impl RoleCredential {
    /// The literal handed to CREATE/ALTER ROLE. Postgres stores a supplied
    /// SCRAM verifier verbatim, so both variants travel the same path.
    #[must_use]
    pub fn as_password_literal(&self) -> &str {
        match self {
            RoleCredential::Password(p) | RoleCredential::ScramHash(p) => p,
        }
    }
}

/// Administrative handle to one database server.
#[async_trait]
pub trait AdminConn: Send + Sync {
    /// Create a database. A name collision surfaces as
    /// [`BrokerError::DatabaseExists`].
    async fn create_database(&self, name: &str) -> Result<(), BrokerError>;

    async fn drop_database(&self, name: &str) -> Result<(), BrokerError>;

    async fn set_database_comment(&self, name: &str, comment: &str) -> Result<(), BrokerError>;

    /// Create a LOGIN role with optional `VALID UNTIL` and a connection
    /// limit (-1 means unlimited).
    async fn create_login_role(
        &self,
        username: &str,
        credential: &RoleCredential,
        valid_until: Option<DateTime<Utc>>,
        connection_limit: i32,
    ) -> Result<(), BrokerError>;

    /// Toggle the role's LOGIN attribute.
    async fn set_role_login(&self, username: &str, enabled: bool) -> Result<(), BrokerError>;

    /// Replace the role's credential and expiry.
    async fn set_role_password(
        &self,
        username: &str,
        credential: &RoleCredential,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<(), BrokerError>;

    /// Whether a role of this name exists on the server.
    async fn role_exists(&self, username: &str) -> Result<bool, BrokerError>;

    /// Drop a role if it exists; absent roles are not an error.
    async fn drop_role(&self, username: &str) -> Result<(), BrokerError>;

    /// Close the underlying pool.
    async fn close(&self);
}

/// Handle to one scope's result database.
#[async_trait]
pub trait ScopeConn: Send + Sync {
    /// Revoke `ALL ON SCHEMA public FROM PUBLIC`. Runs immediately after
    /// database creation, before any data lands.
    async fn revoke_public(&self) -> Result<(), BrokerError>;

    /// Create the result tables if absent.
    async fn migrate(&self) -> Result<(), BrokerError>;

    /// Install trigram indexes over the filterable text columns.
    async fn install_trigram_indexes(&self) -> Result<(), BrokerError>;

    /// All current target rows.
    async fn targets(&self) -> Result<Vec<Target>, BrokerError>;

    /// Reconcile the stored rows with `desired`, keyed by input.
    /// New inputs are inserted pending; vanished inputs are deleted;
    /// metadata changes are updated in place without touching scan state.
    async fn sync_targets(&self, desired: &[Target]) -> Result<SyncCounts, BrokerError>;

    /// Reset the scan state of a single input back to pending.
    async fn reset_input(&self, input: &str) -> Result<(), BrokerError>;

    /// Start a new cycle: reset per-target scan state, bump the cycle
    /// counter, and trim result data older than `retention` cycles
    /// (retention -1 keeps everything).
    async fn new_cycle(&self, retention: i32) -> Result<(), BrokerError>;

    /// Progress totals for ratio computation.
    async fn progress_counts(&self) -> Result<ProgressCounts, BrokerError>;

    /// Create or replace the SQL view materializing a scope view's filters.
    async fn ensure_view(&self, view: &ScopeView) -> Result<(), BrokerError>;

    /// Drop the SQL view backing a scope view.
    async fn drop_view(&self, view_name: &str) -> Result<(), BrokerError>;

    /// Grant a role SELECT on a view's backing relation.
    async fn grant_view_select(&self, username: &str, view_name: &str)
        -> Result<(), BrokerError>;

    /// Revoke a role's SELECT on one view, leaving its other grants alone.
    async fn revoke_view_select(
        &self,
        username: &str,
        view_name: &str,
    ) -> Result<(), BrokerError>;

    /// Strip every privilege the role holds inside this database.
    async fn revoke_role(&self, username: &str) -> Result<(), BrokerError>;

    /// Close the underlying pool.
    async fn close(&self);
}

/// Opens handles on demand; the broker caches what this produces.
#[async_trait]
pub trait ConnFactory: Send + Sync {
    async fn admin(
        &self,
        server: &shared_types::DbServer,
    ) -> Result<Arc<dyn AdminConn>, BrokerError>;

    async fn scope(
        &self,
        server: &shared_types::DbServer,
        db_name: &str,
    ) -> Result<Arc<dyn ScopeConn>, BrokerError>;
}

/// Deterministic name of the SQL view backing a scope view.
///
/// Lowercased, non-alphanumerics folded to underscores, prefixed so
/// generated relations never collide with result tables.
#[must_use]
pub fn sql_view_name(view_name: &str) -> String {
    let slug: String = view_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("v_{slug}")
}
