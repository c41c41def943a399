//! # Orchestrator Application Service
//!
//! One service struct, one module per operation family:
//!
//! - `scopes` - create/delete/toggle/update, cycles, secrets, settings
//! - `targets` - target synchronization under the per-scope lock
//! - `grants` - views, token/user grants, revocation, role credentials
//! - `agents` - telemetry ingestion and progress ratios

pub mod agents;
pub mod grants;
pub mod scopes;
pub mod targets;

use crate::config::LifecycleConfig;
use crate::locks::ScopeLocks;
use shared_types::{ManagerError, ManagerResult, ScanScope, ScopeView};
use sm_01_catalog::CatalogStore;
use sm_02_scope_db::DbBroker;
use sm_04_notifier::ScopeNotifier;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

/// The lifecycle orchestrator.
///
/// Cloning is cheap; clones share the catalog handle, the broker pools,
/// the notifier, and the lock table. Background target syncs hold a clone.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) catalog: Arc<dyn CatalogStore>,
    pub(crate) broker: Arc<DbBroker>,
    pub(crate) notifier: ScopeNotifier,
    pub(crate) locks: ScopeLocks,
    /// Single-holder gate over scope-DB preparation; shutdown waits on it.
    pub(crate) prep_gate: Arc<Mutex<()>>,
    /// Root cancellation; background syncs exit at their next suspension
    /// point once this flips.
    pub(crate) shutdown: watch::Receiver<bool>,
    pub(crate) config: LifecycleConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        broker: Arc<DbBroker>,
        notifier: ScopeNotifier,
        shutdown: watch::Receiver<bool>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            catalog,
            broker,
            notifier,
            locks: ScopeLocks::new(),
            prep_gate: Arc::new(Mutex::new(())),
            shutdown,
            config,
        }
    }

    /// The preparation gate, acquired once by the shutdown sequence so
    /// in-flight scope-DB preparation completes before handles close.
    #[must_use]
    pub fn prep_gate(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.prep_gate)
    }

    /// The named-lock table (exposed for the target read-out).
    #[must_use]
    pub fn locks(&self) -> &ScopeLocks {
        &self.locks
    }

    pub(crate) async fn resolve_scope(&self, id: u64) -> ManagerResult<ScanScope> {
        self.catalog
            .scope(id)
            .await
            .map_err(ManagerError::from)?
            .ok_or(ManagerError::RecordNotFound)
    }

    pub(crate) async fn resolve_view(&self, id: u64) -> ManagerResult<ScopeView> {
        self.catalog
            .view(id)
            .await
            .map_err(ManagerError::from)?
            .ok_or(ManagerError::RecordNotFound)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use shared_types::DbServer;
    use sm_01_catalog::MemoryCatalog;
    use sm_02_scope_db::MemoryCluster;

    /// Everything a service test needs, one per case.
    pub struct Fixture {
        pub orchestrator: Orchestrator,
        pub catalog: Arc<MemoryCatalog>,
        pub cluster: Arc<MemoryCluster>,
        pub notifier: ScopeNotifier,
        pub server_id: u64,
        /// Held so the root cancellation channel stays open.
        pub _shutdown_tx: watch::Sender<bool>,
    }

    pub async fn fixture() -> Fixture {
        let catalog = Arc::new(MemoryCatalog::new());
        let cluster = Arc::new(MemoryCluster::new());
        let broker = Arc::new(DbBroker::new(
            Arc::clone(&cluster) as Arc<dyn sm_02_scope_db::ConnFactory>
        ));
        let notifier = ScopeNotifier::with_flush_interval(std::time::Duration::from_millis(20));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_id = catalog
            .save_db_server(&DbServer {
                name: "primary".into(),
                dialect: "postgres".into(),
                host: "127.0.0.1".into(),
                host_public: "db.example.com".into(),
                port: 5432,
                admin_user: "postgres".into(),
                admin_password: "secret".into(),
                ..DbServer::default()
            })
            .await
            .expect("seed server");
        let orchestrator = Orchestrator::new(
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            broker,
            notifier.clone(),
            shutdown_rx,
            LifecycleConfig::default(),
        );
        Fixture {
            orchestrator,
            catalog,
            cluster,
            notifier,
            server_id,
            _shutdown_tx: shutdown_tx,
        }
    }
}
