//! # In-Memory Cluster Fake
//!
//! Simulates database servers, their databases, roles, views, and grants so
//! the orchestrator's cross-database transactions can be exercised without
//! a Postgres instance. Inspection helpers expose the simulated state to
//! tests; `fail_migrate_for` injects a mid-transaction failure to exercise
//! compensation paths.

use crate::errors::BrokerError;
use crate::ports::{sql_view_name, AdminConn, ConnFactory, RoleCredential, ScopeConn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared_types::{DbServer, ProgressCounts, ScanStatus, ScopeView, SyncCounts, Target};
use std::collections::HashMap;
use std::sync::Arc;

/// Simulated role attributes, inspectable from tests.
#[derive(Debug, Clone)]
pub struct RoleState {
    pub credential: String,
    pub valid_until: Option<DateTime<Utc>>,
    pub login_enabled: bool,
    pub connection_limit: i32,
}

#[derive(Default)]
struct DatabaseState {
    comment: String,
    public_revoked: bool,
    migrated: bool,
    trigram_installed: bool,
    current_cycle: i32,
    targets: Vec<Target>,
    /// Result rows reduced to their cycle marker, enough for retention.
    result_cycles: Vec<i32>,
    /// SQL view name to its defining scope view.
    views: HashMap<String, ScopeView>,
    /// Role name to granted SQL view names.
    grants: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct ServerState {
    databases: HashMap<String, DatabaseState>,
    roles: HashMap<String, RoleState>,
}

#[derive(Default)]
struct ClusterState {
    servers: HashMap<u64, ServerState>,
    /// When set, the next migrate call fails (compensation tests).
    fail_next_migrate: bool,
}

/// The in-memory cluster, shared by every handle it produces.
#[derive(Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `migrate` call fail.
    pub fn fail_next_migrate(&self) {
        self.state.lock().fail_next_migrate = true;
    }

    // -------------------------------------------------------------------------
    // Inspection helpers for tests
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn database_exists(&self, server_id: u64, db_name: &str) -> bool {
        self.state
            .lock()
            .servers
            .get(&server_id)
            .is_some_and(|s| s.databases.contains_key(db_name))
    }

    #[must_use]
    pub fn database_names(&self, server_id: u64) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .servers
            .get(&server_id)
            .map(|s| s.databases.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[must_use]
    pub fn database_prepared(&self, server_id: u64, db_name: &str) -> bool {
        self.state
            .lock()
            .servers
            .get(&server_id)
            .and_then(|s| s.databases.get(db_name))
            .is_some_and(|db| db.public_revoked && db.migrated && db.trigram_installed)
    }

    #[must_use]
    pub fn role(&self, server_id: u64, username: &str) -> Option<RoleState> {
        self.state
            .lock()
            .servers
            .get(&server_id)
            .and_then(|s| s.roles.get(username))
            .cloned()
    }

    #[must_use]
    pub fn view_names(&self, server_id: u64, db_name: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .lock()
            .servers
            .get(&server_id)
            .and_then(|s| s.databases.get(db_name))
            .map(|db| db.views.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    #[must_use]
    pub fn grants_of_role(&self, server_id: u64, db_name: &str, username: &str) -> Vec<String> {
        self.state
            .lock()
            .servers
            .get(&server_id)
            .and_then(|s| s.databases.get(db_name))
            .and_then(|db| db.grants.get(username))
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate agent progress for ratio tests.
    pub fn set_target_status(
        &self,
        server_id: u64,
        db_name: &str,
        input: &str,
        status: ScanStatus,
    ) {
        let mut state = self.state.lock();
        if let Some(target) = state
            .servers
            .get_mut(&server_id)
            .and_then(|s| s.databases.get_mut(db_name))
            .and_then(|db| db.targets.iter_mut().find(|t| t.input == input))
        {
            target.scan_status = status;
        }
    }

    /// Seed a result row in the given cycle for retention tests.
    pub fn push_result(&self, server_id: u64, db_name: &str, cycle: i32) {
        let mut state = self.state.lock();
        if let Some(db) = state
            .servers
            .get_mut(&server_id)
            .and_then(|s| s.databases.get_mut(db_name))
        {
            db.result_cycles.push(cycle);
        }
    }

    #[must_use]
    pub fn result_cycles(&self, server_id: u64, db_name: &str) -> Vec<i32> {
        self.state
            .lock()
            .servers
            .get(&server_id)
            .and_then(|s| s.databases.get(db_name))
            .map(|db| db.result_cycles.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn current_cycle(&self, server_id: u64, db_name: &str) -> i32 {
        self.state
            .lock()
            .servers
            .get(&server_id)
            .and_then(|s| s.databases.get(db_name))
            .map(|db| db.current_cycle)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConnFactory for MemoryCluster {
    async fn admin(&self, server: &DbServer) -> Result<Arc<dyn AdminConn>, BrokerError> {
        self.state.lock().servers.entry(server.id).or_default();
        Ok(Arc::new(MemoryAdminConn {
            state: Arc::clone(&self.state),
            server_id: server.id,
        }))
    }

    async fn scope(
        &self,
        server: &DbServer,
        db_name: &str,
    ) -> Result<Arc<dyn ScopeConn>, BrokerError> {
        let state = self.state.lock();
        let exists = state
            .servers
            .get(&server.id)
            .is_some_and(|s| s.databases.contains_key(db_name));
        if !exists {
            return Err(BrokerError::DatabaseMissing(db_name.to_string()));
        }
        drop(state);
        Ok(Arc::new(MemoryScopeConn {
            state: Arc::clone(&self.state),
            server_id: server.id,
            db_name: db_name.to_string(),
        }))
    }
}

struct MemoryAdminConn {
    state: Arc<Mutex<ClusterState>>,
    server_id: u64,
}

impl MemoryAdminConn {
    fn with_server<R>(
        &self,
        f: impl FnOnce(&mut ServerState) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let mut state = self.state.lock();
        let server = state.servers.entry(self.server_id).or_default();
        f(server)
    }
}

#[async_trait]
impl AdminConn for MemoryAdminConn {
    async fn create_database(&self, name: &str) -> Result<(), BrokerError> {
        self.with_server(|server| {
            if server.databases.contains_key(name) {
                return Err(BrokerError::DatabaseExists(name.to_string()));
            }
            server.databases.insert(
                name.to_string(),
                DatabaseState {
                    current_cycle: 1,
                    ..DatabaseState::default()
                },
            );
            Ok(())
        })
    }

    async fn drop_database(&self, name: &str) -> Result<(), BrokerError> {
        self.with_server(|server| {
            server.databases.remove(name);
            Ok(())
        })
    }

    async fn set_database_comment(&self, name: &str, comment: &str) -> Result<(), BrokerError> {
        self.with_server(|server| {
            let db = server
                .databases
                .get_mut(name)
                .ok_or_else(|| BrokerError::DatabaseMissing(name.to_string()))?;
            db.comment = comment.to_string();
            Ok(())
        })
    }

    async fn create_login_role(
        &self,
        username: &str,
        credential: &RoleCredential,
        valid_until: Option<DateTime<Utc>>,
        connection_limit: i32,
    ) -> Result<(), BrokerError> {
        self.with_server(|server| {
            if server.roles.contains_key(username) {
                return Err(BrokerError::Transport(format!("role {username} exists")));
            }
            server.roles.insert(
                username.to_string(),
                RoleState {
                    credential: credential.as_password_literal().to_string(),
                    valid_until,
                    login_enabled: true,
                    connection_limit,
                },
            );
            Ok(())
        })
    }

    async fn set_role_login(&self, username: &str, enabled: bool) -> Result<(), BrokerError> {
        self.with_server(|server| {
            let role = server
                .roles
                .get_mut(username)
                .ok_or_else(|| BrokerError::RoleMissing(username.to_string()))?;
            role.login_enabled = enabled;
            Ok(())
        })
    }

    async fn set_role_password(
        &self,
        username: &str,
        credential: &RoleCredential,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<(), BrokerError> {
        self.with_server(|server| {
            let role = server
                .roles
                .get_mut(username)
                .ok_or_else(|| BrokerError::RoleMissing(username.to_string()))?;
            role.credential = credential.as_password_literal().to_string();
            role.valid_until = valid_until;
            Ok(())
        })
    }

    async fn role_exists(&self, username: &str) -> Result<bool, BrokerError> {
        self.with_server(|server| Ok(server.roles.contains_key(username)))
    }

    async fn drop_role(&self, username: &str) -> Result<(), BrokerError> {
        self.with_server(|server| {
            server.roles.remove(username);
            Ok(())
        })
    }

    async fn close(&self) {}
}

struct MemoryScopeConn {
    state: Arc<Mutex<ClusterState>>,
    server_id: u64,
    db_name: String,
}

impl MemoryScopeConn {
    fn with_db<R>(
        &self,
        f: impl FnOnce(&mut DatabaseState) -> Result<R, BrokerError>,
    ) -> Result<R, BrokerError> {
        let mut state = self.state.lock();
        let db = state
            .servers
            .get_mut(&self.server_id)
            .and_then(|s| s.databases.get_mut(&self.db_name))
            .ok_or_else(|| BrokerError::DatabaseMissing(self.db_name.clone()))?;
        f(db)
    }
}

fn metadata_differs(a: &Target, b: &Target) -> bool {
    a.input_size != b.input_size
        || a.country != b.country
        || a.location != b.location
        || a.routing_domain != b.routing_domain
        || a.zone != b.zone
        || a.purpose != b.purpose
        || a.company != b.company
        || a.department != b.department
        || a.manager != b.manager
        || a.contact != b.contact
        || a.comment != b.comment
}

#[async_trait]
impl ScopeConn for MemoryScopeConn {
    async fn revoke_public(&self) -> Result<(), BrokerError> {
        self.with_db(|db| {
            db.public_revoked = true;
            Ok(())
        })
    }

    async fn migrate(&self) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        if state.fail_next_migrate {
            state.fail_next_migrate = false;
            return Err(BrokerError::Transport("injected migrate failure".into()));
        }
        let db = state
            .servers
            .get_mut(&self.server_id)
            .and_then(|s| s.databases.get_mut(&self.db_name))
            .ok_or_else(|| BrokerError::DatabaseMissing(self.db_name.clone()))?;
        db.migrated = true;
        Ok(())
    }

    async fn install_trigram_indexes(&self) -> Result<(), BrokerError> {
        self.with_db(|db| {
            db.trigram_installed = true;
            Ok(())
        })
    }

    async fn targets(&self) -> Result<Vec<Target>, BrokerError> {
        self.with_db(|db| Ok(db.targets.clone()))
    }

    async fn sync_targets(&self, desired: &[Target]) -> Result<SyncCounts, BrokerError> {
        self.with_db(|db| {
            let mut counts = SyncCounts::default();
            for target in desired {
                match db.targets.iter_mut().find(|t| t.input == target.input) {
                    None => {
                        let mut row = target.clone();
                        row.scan_status = ScanStatus::Pending;
                        row.scan_started = None;
                        row.scan_finished = None;
                        db.targets.push(row);
                        counts.created += 1;
                    }
                    Some(current) if metadata_differs(current, target) => {
                        current.input_size = target.input_size;
                        current.country = target.country.clone();
                        current.location = target.location.clone();
                        current.routing_domain = target.routing_domain.clone();
                        current.zone = target.zone.clone();
                        current.purpose = target.purpose.clone();
                        current.company = target.company.clone();
                        current.department = target.department.clone();
                        current.manager = target.manager.clone();
                        current.contact = target.contact.clone();
                        current.comment = target.comment.clone();
                        counts.updated += 1;
                    }
                    Some(_) => {}
                }
            }
            let before = db.targets.len();
            db.targets
                .retain(|t| desired.iter().any(|d| d.input == t.input));
            counts.removed = (before - db.targets.len()) as u64;
            Ok(counts)
        })
    }

    async fn reset_input(&self, input: &str) -> Result<(), BrokerError> {
        self.with_db(|db| {
            let target = db
                .targets
                .iter_mut()
                .find(|t| t.input == input)
                .ok_or_else(|| BrokerError::TargetMissing(input.to_string()))?;
            target.scan_status = ScanStatus::Pending;
            target.scan_started = None;
            target.scan_finished = None;
            Ok(())
        })
    }

    async fn new_cycle(&self, retention: i32) -> Result<(), BrokerError> {
        self.with_db(|db| {
            for target in &mut db.targets {
                target.scan_status = ScanStatus::Pending;
                target.scan_started = None;
                target.scan_finished = None;
            }
            db.current_cycle += 1;
            if retention >= 1 {
                let cutoff = db.current_cycle - retention;
                db.result_cycles.retain(|cycle| *cycle > cutoff);
            }
            Ok(())
        })
    }

    async fn progress_counts(&self) -> Result<ProgressCounts, BrokerError> {
        self.with_db(|db| {
            let mut counts = ProgressCounts {
                total: db.targets.len() as u64,
                ..ProgressCounts::default()
            };
            for target in &db.targets {
                match target.scan_status {
                    ScanStatus::Done => counts.done += 1,
                    ScanStatus::Running => counts.active += 1,
                    ScanStatus::Failed => counts.failed += 1,
                    ScanStatus::Pending => {}
                }
            }
            Ok(counts)
        })
    }

    async fn ensure_view(&self, view: &ScopeView) -> Result<(), BrokerError> {
        self.with_db(|db| {
            db.views.insert(sql_view_name(&view.name), view.clone());
            Ok(())
        })
    }

    async fn drop_view(&self, view_name: &str) -> Result<(), BrokerError> {
        self.with_db(|db| {
            db.views.remove(&sql_view_name(view_name));
            Ok(())
        })
    }

    async fn grant_view_select(
        &self,
        username: &str,
        view_name: &str,
    ) -> Result<(), BrokerError> {
        self.with_db(|db| {
            let grants = db.grants.entry(username.to_string()).or_default();
            let sql_name = sql_view_name(view_name);
            if !grants.contains(&sql_name) {
                grants.push(sql_name);
            }
            Ok(())
        })
    }

    async fn revoke_view_select(
        &self,
        username: &str,
        view_name: &str,
    ) -> Result<(), BrokerError> {
        self.with_db(|db| {
            if let Some(grants) = db.grants.get_mut(username) {
                let sql_name = sql_view_name(view_name);
                grants.retain(|v| *v != sql_name);
                if grants.is_empty() {
                    db.grants.remove(username);
                }
            }
            Ok(())
        })
    }

    async fn revoke_role(&self, username: &str) -> Result<(), BrokerError> {
        self.with_db(|db| {
            db.grants.remove(username);
            Ok(())
        })
    }

    async fn close(&self) {}
}
