//! # In-Memory Catalog Adapter
//!
//! Testing implementation of the [`CatalogStore`] port. Mirrors the
//! declarative constraints of the Postgres schema (uniqueness, foreign
//! keys) so ordering bugs in the orchestrator surface in unit tests.

use crate::errors::CatalogError;
use crate::ports::{CatalogStore, ScopeChanges};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use shared_types::{
    AgentReport, DbServer, Grant, ScanAgent, ScanScope, ScanSettings, ScopeView, SqlLog,
};
use std::collections::HashMap;

#[derive(Default)]
struct State {
    next_id: u64,
    db_servers: HashMap<u64, DbServer>,
    scopes: HashMap<u64, ScanScope>,
    views: HashMap<u64, ScopeView>,
    grants: HashMap<u64, Grant>,
    agents: HashMap<u64, ScanAgent>,
    sql_logs: Vec<SqlLog>,
    settings: HashMap<u64, ScanSettings>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory catalog store. Cheap to construct per test case.
#[derive(Default)]
pub struct MemoryCatalog {
    state: RwLock<State>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted<T: Clone>(map: &HashMap<u64, T>) -> Vec<T> {
        let mut ids: Vec<&u64> = map.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| map[id].clone()).collect()
    }

    /// Reads join the current server record, like the SQL adapter does.
    fn stitch(state: &State, scope: &ScanScope) -> ScanScope {
        let mut scope = scope.clone();
        if let Some(server) = state.db_servers.get(&scope.db_server_id) {
            scope.db_server = server.clone();
        }
        scope
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    // -------------------------------------------------------------------------
    // Database servers
    // -------------------------------------------------------------------------

    async fn save_db_server(&self, server: &DbServer) -> Result<u64, CatalogError> {
        let mut state = self.state.write();
        let clash = state.db_servers.values().any(|s| {
            s.id != server.id
                && s.host == server.host
                && s.port == server.port
                && s.admin_user == server.admin_user
        });
        if clash {
            return Err(CatalogError::Duplicate(format!(
                "db server {}:{} ({})",
                server.host, server.port, server.admin_user
            )));
        }
        let mut record = server.clone();
        if record.id == 0 {
            record.id = state.allocate();
        } else if !state.db_servers.contains_key(&record.id) {
            return Err(CatalogError::NotFound);
        }
        let id = record.id;
        state.db_servers.insert(id, record);
        Ok(id)
    }

    async fn db_server(&self, id: u64) -> Result<Option<DbServer>, CatalogError> {
        Ok(self.state.read().db_servers.get(&id).cloned())
    }

    async fn db_servers(&self) -> Result<Vec<DbServer>, CatalogError> {
        Ok(Self::sorted(&self.state.read().db_servers))
    }

    async fn delete_db_server(&self, id: u64) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        let referencing = state
            .scopes
            .values()
            .filter(|s| s.db_server_id == id)
            .count();
        if referencing > 0 {
            return Err(CatalogError::InUse(format!(
                "db server {id} referenced by {referencing} scope(s)"
            )));
        }
        state
            .db_servers
            .remove(&id)
            .map(|_| ())
            .ok_or(CatalogError::NotFound)
    }

    // -------------------------------------------------------------------------
    // Scopes
    // -------------------------------------------------------------------------

    async fn insert_scope(&self, scope: &ScanScope) -> Result<u64, CatalogError> {
        let mut state = self.state.write();
        let server = state
            .db_servers
            .get(&scope.db_server_id)
            .cloned()
            .ok_or_else(|| {
                CatalogError::ForeignKey(format!("db server {} missing", scope.db_server_id))
            })?;
        if state.scopes.values().any(|s| s.db_name == scope.db_name) {
            return Err(CatalogError::Duplicate(format!(
                "db name {}",
                scope.db_name
            )));
        }
        let id = state.allocate();
        let mut record = scope.clone();
        record.id = id;
        record.db_server = server;
        state.scopes.insert(id, record);
        Ok(id)
    }

    async fn scope(&self, id: u64) -> Result<Option<ScanScope>, CatalogError> {
        let state = self.state.read();
        Ok(state.scopes.get(&id).map(|s| Self::stitch(&state, s)))
    }

    async fn scope_by_secret(&self, secret: &str) -> Result<Option<ScanScope>, CatalogError> {
        let state = self.state.read();
        Ok(state
            .scopes
            .values()
            .find(|s| s.secret == secret)
            .map(|s| Self::stitch(&state, s)))
    }

    async fn scopes(&self) -> Result<Vec<ScanScope>, CatalogError> {
        let state = self.state.read();
        Ok(Self::sorted(&state.scopes)
            .iter()
            .map(|s| Self::stitch(&state, s))
            .collect())
    }

    async fn scopes_of(&self, group_ids: &[u64]) -> Result<Vec<ScanScope>, CatalogError> {
        let state = self.state.read();
        Ok(Self::sorted(&state.scopes)
            .iter()
            .filter(|s| group_ids.contains(&s.group_id))
            .map(|s| Self::stitch(&state, s))
            .collect())
    }

    async fn scope_entry_ids(&self) -> Result<Vec<u64>, CatalogError> {
        let mut ids: Vec<u64> = self.state.read().scopes.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn update_scope(&self, id: u64, changes: &ScopeChanges) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        let scope = state.scopes.get_mut(&id).ok_or(CatalogError::NotFound)?;
        if let Some(name) = &changes.name {
            scope.name = name.clone();
        }
        if let Some(enabled) = changes.enabled {
            scope.enabled = enabled;
        }
        if let Some(cycles) = changes.cycles {
            scope.cycles = cycles;
        }
        if let Some(retention) = changes.cycles_retention {
            scope.cycles_retention = retention;
        }
        if let Some(attributes) = &changes.attributes {
            scope.attributes = attributes.clone();
        }
        if let Some(size) = changes.size {
            scope.size = size;
        }
        if let Some(last_sync) = changes.last_sync {
            scope.last_sync = Some(last_sync);
        }
        if let Some(ratios) = changes.ratios {
            scope.cycle_done = ratios.done;
            scope.cycle_active = ratios.active;
            scope.cycle_failed = ratios.failed;
        }
        if let Some(secret) = &changes.secret {
            scope.secret = secret.clone();
        }
        Ok(())
    }

    async fn delete_scope(&self, id: u64) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        if state.views.values().any(|v| v.scope_id == id) {
            return Err(CatalogError::ForeignKey(format!(
                "scope {id} still has views"
            )));
        }
        if state.agents.values().any(|a| a.scope_id == id) {
            return Err(CatalogError::ForeignKey(format!(
                "scope {id} still has agents"
            )));
        }
        state
            .scopes
            .remove(&id)
            .map(|_| ())
            .ok_or(CatalogError::NotFound)
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    async fn insert_view(&self, view: &ScopeView) -> Result<u64, CatalogError> {
        let mut state = self.state.write();
        if !state.scopes.contains_key(&view.scope_id) {
            return Err(CatalogError::ForeignKey(format!(
                "scope {} missing",
                view.scope_id
            )));
        }
        if state
            .views
            .values()
            .any(|v| v.scope_id == view.scope_id && v.name == view.name)
        {
            return Err(CatalogError::Duplicate(format!("view {}", view.name)));
        }
        let id = state.allocate();
        let mut record = view.clone();
        record.id = id;
        state.views.insert(id, record);
        Ok(id)
    }

    async fn view(&self, id: u64) -> Result<Option<ScopeView>, CatalogError> {
        Ok(self.state.read().views.get(&id).cloned())
    }

    async fn views(&self) -> Result<Vec<ScopeView>, CatalogError> {
        Ok(Self::sorted(&self.state.read().views))
    }

    async fn views_of(&self, scope_id: u64) -> Result<Vec<ScopeView>, CatalogError> {
        Ok(Self::sorted(&self.state.read().views)
            .into_iter()
            .filter(|v| v.scope_id == scope_id)
            .collect())
    }

    async fn views_granted(&self, username: &str) -> Result<Vec<ScopeView>, CatalogError> {
        let state = self.state.read();
        let view_ids: Vec<u64> = state
            .grants
            .values()
            .filter(|g| g.username == username)
            .map(|g| g.view_id)
            .collect();
        Ok(Self::sorted(&state.views)
            .into_iter()
            .filter(|v| view_ids.contains(&v.id))
            .collect())
    }

    async fn rename_view(&self, id: u64, name: &str) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        let scope_id = state
            .views
            .get(&id)
            .map(|v| v.scope_id)
            .ok_or(CatalogError::NotFound)?;
        if state
            .views
            .values()
            .any(|v| v.id != id && v.scope_id == scope_id && v.name == name)
        {
            return Err(CatalogError::Duplicate(format!("view {name}")));
        }
        if let Some(view) = state.views.get_mut(&id) {
            view.name = name.to_string();
        }
        Ok(())
    }

    async fn delete_view(&self, id: u64) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        if state.grants.values().any(|g| g.view_id == id) {
            return Err(CatalogError::ForeignKey(format!(
                "view {id} still has grants"
            )));
        }
        state
            .views
            .remove(&id)
            .map(|_| ())
            .ok_or(CatalogError::NotFound)
    }

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    async fn insert_grant(&self, grant: &Grant) -> Result<u64, CatalogError> {
        let mut state = self.state.write();
        if !state.views.contains_key(&grant.view_id) {
            return Err(CatalogError::ForeignKey(format!(
                "view {} missing",
                grant.view_id
            )));
        }
        if state.grants.values().any(|g| g.username == grant.username) {
            return Err(CatalogError::Duplicate(format!(
                "grant for {}",
                grant.username
            )));
        }
        let id = state.allocate();
        let mut record = grant.clone();
        record.id = id;
        state.grants.insert(id, record);
        Ok(id)
    }

    async fn grants_of_view(&self, view_id: u64) -> Result<Vec<Grant>, CatalogError> {
        Ok(Self::sorted(&self.state.read().grants)
            .into_iter()
            .filter(|g| g.view_id == view_id)
            .collect())
    }

    async fn grant_by_username(&self, username: &str) -> Result<Option<Grant>, CatalogError> {
        Ok(self
            .state
            .read()
            .grants
            .values()
            .find(|g| g.username == username)
            .cloned())
    }

    async fn delete_grant(&self, id: u64) -> Result<(), CatalogError> {
        self.state
            .write()
            .grants
            .remove(&id)
            .map(|_| ())
            .ok_or(CatalogError::NotFound)
    }

    // -------------------------------------------------------------------------
    // Agents
    // -------------------------------------------------------------------------

    async fn upsert_agent(
        &self,
        scope_id: u64,
        report: &AgentReport,
        seen: DateTime<Utc>,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        if !state.scopes.contains_key(&scope_id) {
            return Err(CatalogError::ForeignKey(format!("scope {scope_id} missing")));
        }
        let existing = state
            .agents
            .values_mut()
            .find(|a| a.scope_id == scope_id && a.name == report.name);
        if let Some(agent) = existing {
            agent.host = report.host.clone();
            agent.version = report.version.clone();
            agent.active_tasks = report.active_tasks;
            agent.last_seen = seen;
            return Ok(());
        }
        let id = state.allocate();
        state.agents.insert(
            id,
            ScanAgent {
                id,
                scope_id,
                name: report.name.clone(),
                host: report.host.clone(),
                version: report.version.clone(),
                active_tasks: report.active_tasks,
                first_seen: seen,
                last_seen: seen,
            },
        );
        Ok(())
    }

    async fn agents(&self) -> Result<Vec<ScanAgent>, CatalogError> {
        Ok(Self::sorted(&self.state.read().agents))
    }

    async fn delete_agent(&self, id: u64) -> Result<(), CatalogError> {
        self.state
            .write()
            .agents
            .remove(&id)
            .map(|_| ())
            .ok_or(CatalogError::NotFound)
    }

    async fn delete_agents_of_scope(&self, scope_id: u64) -> Result<(), CatalogError> {
        self.state
            .write()
            .agents
            .retain(|_, a| a.scope_id != scope_id);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // SQL audit logs
    // -------------------------------------------------------------------------

    async fn insert_sql_log(&self, log: &SqlLog) -> Result<u64, CatalogError> {
        let mut state = self.state.write();
        let id = state.allocate();
        let mut record = log.clone();
        record.id = id;
        state.sql_logs.push(record);
        Ok(id)
    }

    async fn sql_logs_since(
        &self,
        db_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SqlLog>, CatalogError> {
        Ok(self
            .state
            .read()
            .sql_logs
            .iter()
            .filter(|l| l.db_name == db_name && l.logged_at >= since)
            .cloned()
            .collect())
    }

    // -------------------------------------------------------------------------
    // Scan settings
    // -------------------------------------------------------------------------

    async fn save_settings(
        &self,
        scope_id: u64,
        settings: &ScanSettings,
    ) -> Result<(), CatalogError> {
        self.state.write().settings.insert(scope_id, settings.clone());
        Ok(())
    }

    async fn settings(&self, scope_id: u64) -> Result<Option<ScanSettings>, CatalogError> {
        Ok(self.state.read().settings.get(&scope_id).cloned())
    }

    async fn delete_settings(&self, scope_id: u64) -> Result<(), CatalogError> {
        self.state.write().settings.remove(&scope_id);
        Ok(())
    }
}
