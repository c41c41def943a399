//! Shared test harness: a complete manager over in-memory adapters.

use shared_types::{DbServer, Request, Response};
use sm_01_catalog::{CatalogStore, MemoryCatalog};
use sm_02_scope_db::{ConnFactory, DbBroker, MemoryCluster};
use sm_03_lifecycle::{LifecycleConfig, Orchestrator};
use sm_04_notifier::ScopeNotifier;
use sm_05_rpc::Dispatcher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const PRIVILEGE: &str = "integration-privilege-secret";

/// A manager wired out of memory adapters, one per test.
pub struct Manager {
    pub dispatcher: Arc<Dispatcher>,
    pub catalog: Arc<MemoryCatalog>,
    pub cluster: Arc<MemoryCluster>,
    pub notifier: ScopeNotifier,
    pub server_id: u64,
    /// Held so the root cancellation channel stays open.
    pub _root_tx: watch::Sender<bool>,
}

pub async fn manager() -> Manager {
    let catalog = Arc::new(MemoryCatalog::new());
    let cluster = Arc::new(MemoryCluster::new());
    let broker = Arc::new(DbBroker::new(Arc::clone(&cluster) as Arc<dyn ConnFactory>));
    let notifier = ScopeNotifier::with_flush_interval(Duration::from_millis(20));
    let (root_tx, root_rx) = watch::channel(false);

    let server_id = catalog
        .save_db_server(&DbServer {
            name: "primary".into(),
            dialect: "postgres".into(),
            host: "127.0.0.1".into(),
            host_public: "db.example.com".into(),
            port: 5432,
            admin_user: "postgres".into(),
            admin_password: "hunter2".into(),
            ..DbServer::default()
        })
        .await
        .expect("seed server");

    let orchestrator = Orchestrator::new(
        Arc::clone(&catalog) as Arc<dyn CatalogStore>,
        broker,
        notifier.clone(),
        root_rx,
        LifecycleConfig::default(),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        orchestrator,
        Arc::clone(&catalog) as Arc<dyn CatalogStore>,
        notifier.clone(),
        vec![PRIVILEGE.to_string()],
    ));

    Manager {
        dispatcher,
        catalog,
        cluster,
        notifier,
        server_id,
        _root_tx: root_tx,
    }
}

impl Manager {
    /// Create a scope through the dispatcher and return its id.
    pub async fn create_scope(&self, name: &str) -> u64 {
        let response = self
            .dispatcher
            .handle(Request::CreateScope {
                db_server_id: self.server_id,
                name: name.into(),
                group_id: 7,
                created_by: "alice".into(),
                scope_type: "custom".into(),
                cycles: false,
                cycles_retention: -1,
                attributes: HashMap::new(),
            })
            .await;
        match response {
            Response::Id(id) => id,
            other => panic!("scope creation failed: {other:?}"),
        }
    }

    /// The id of a scope's default "All" view.
    pub async fn default_view(&self, scope_id: u64) -> u64 {
        self.catalog
            .views_of(scope_id)
            .await
            .expect("views")
            .first()
            .expect("default view")
            .id
    }
}
