//! # Catalog Port
//!
//! The interface the orchestrator and the RPC surface program against.
//!
//! Production: `PgCatalog` (adapters/postgres.rs)
//! Testing: `MemoryCatalog` (adapters/memory.rs)

use crate::errors::CatalogError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{
    AgentReport, CycleRatios, DbServer, Grant, ScanAgent, ScanScope, ScanSettings, ScopeView,
    SqlLog,
};
use std::collections::HashMap;

/// Named-column update for a scope row.
///
/// Only the populated fields are written, so concurrent mutators of other
/// columns (progress ratios vs. settings vs. size) never race each other.
#[derive(Debug, Clone, Default)]
pub struct ScopeChanges {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub cycles: Option<bool>,
    pub cycles_retention: Option<i32>,
    pub attributes: Option<HashMap<String, String>>,
    pub size: Option<u64>,
    pub last_sync: Option<DateTime<Utc>>,
    pub ratios: Option<CycleRatios>,
    pub secret: Option<String>,
}

impl ScopeChanges {
    /// True when no column is named.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.enabled.is_none()
            && self.cycles.is_none()
            && self.cycles_retention.is_none()
            && self.attributes.is_none()
            && self.size.is_none()
            && self.last_sync.is_none()
            && self.ratios.is_none()
            && self.secret.is_none()
    }
}

/// Typed lookup and save operations over the catalog database.
///
/// All listings come back ordered by id so callers see stable output.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Database servers
    // -------------------------------------------------------------------------

    /// Insert (id 0) or update a server record. Returns the record id.
    async fn save_db_server(&self, server: &DbServer) -> Result<u64, CatalogError>;

    async fn db_server(&self, id: u64) -> Result<Option<DbServer>, CatalogError>;

    async fn db_servers(&self) -> Result<Vec<DbServer>, CatalogError>;

    /// Refuses with [`CatalogError::InUse`] while any scope references the
    /// server.
    async fn delete_db_server(&self, id: u64) -> Result<(), CatalogError>;

    // -------------------------------------------------------------------------
    // Scopes
    // -------------------------------------------------------------------------

    /// Insert a new scope row. Returns the assigned id.
    async fn insert_scope(&self, scope: &ScanScope) -> Result<u64, CatalogError>;

    /// Fetch a scope with its server record embedded.
    async fn scope(&self, id: u64) -> Result<Option<ScanScope>, CatalogError>;

    /// Secret-based lookup; a miss is `Ok(None)`, never an error.
    async fn scope_by_secret(&self, secret: &str) -> Result<Option<ScanScope>, CatalogError>;

    async fn scopes(&self) -> Result<Vec<ScanScope>, CatalogError>;

    async fn scopes_of(&self, group_ids: &[u64]) -> Result<Vec<ScanScope>, CatalogError>;

    /// The complete live scope-id set, paired with every notification batch.
    async fn scope_entry_ids(&self) -> Result<Vec<u64>, CatalogError>;

    /// Write only the columns named in `changes`.
    async fn update_scope(&self, id: u64, changes: &ScopeChanges) -> Result<(), CatalogError>;

    async fn delete_scope(&self, id: u64) -> Result<(), CatalogError>;

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    /// Insert a view; duplicate (scope, name) surfaces as
    /// [`CatalogError::Duplicate`].
    async fn insert_view(&self, view: &ScopeView) -> Result<u64, CatalogError>;

    async fn view(&self, id: u64) -> Result<Option<ScopeView>, CatalogError>;

    async fn views(&self) -> Result<Vec<ScopeView>, CatalogError>;

    async fn views_of(&self, scope_id: u64) -> Result<Vec<ScopeView>, CatalogError>;

    /// Views carrying a grant for `username`.
    async fn views_granted(&self, username: &str) -> Result<Vec<ScopeView>, CatalogError>;

    async fn rename_view(&self, id: u64, name: &str) -> Result<(), CatalogError>;

    async fn delete_view(&self, id: u64) -> Result<(), CatalogError>;

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    async fn insert_grant(&self, grant: &Grant) -> Result<u64, CatalogError>;

    async fn grants_of_view(&self, view_id: u64) -> Result<Vec<Grant>, CatalogError>;

    async fn grant_by_username(&self, username: &str) -> Result<Option<Grant>, CatalogError>;

    async fn delete_grant(&self, id: u64) -> Result<(), CatalogError>;

    // -------------------------------------------------------------------------
    // Agents
    // -------------------------------------------------------------------------

    /// Create on first report, update last-seen fields afterwards.
    async fn upsert_agent(
        &self,
        scope_id: u64,
        report: &AgentReport,
        seen: DateTime<Utc>,
    ) -> Result<(), CatalogError>;

    async fn agents(&self) -> Result<Vec<ScanAgent>, CatalogError>;

    async fn delete_agent(&self, id: u64) -> Result<(), CatalogError>;

    async fn delete_agents_of_scope(&self, scope_id: u64) -> Result<(), CatalogError>;

    // -------------------------------------------------------------------------
    // SQL audit logs
    // -------------------------------------------------------------------------

    async fn insert_sql_log(&self, log: &SqlLog) -> Result<u64, CatalogError>;

    async fn sql_logs_since(
        &self,
        db_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SqlLog>, CatalogError>;

    // -------------------------------------------------------------------------
    // Scan settings
    // -------------------------------------------------------------------------

    async fn save_settings(
        &self,
        scope_id: u64,
        settings: &ScanSettings,
    ) -> Result<(), CatalogError>;

    async fn settings(&self, scope_id: u64) -> Result<Option<ScanSettings>, CatalogError>;

    async fn delete_settings(&self, scope_id: u64) -> Result<(), CatalogError>;
}
