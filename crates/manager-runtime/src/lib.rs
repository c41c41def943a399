//! # Scope Manager Runtime
//!
//! The main entry point for the Scope Manager control plane.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration
//! 2. Connect the catalog store (schema auto-migration)
//! 3. Build the scope-DB broker, the notifier, the orchestrator
//! 4. Serve the RPC endpoint
//!
//! ## Shutdown Sequence
//!
//! 1. Stop accepting new RPCs (accept signal)
//! 2. Wait for in-flight scope-DB preparation (the preparation gate)
//! 3. Shut down the notifier, releasing every parked subscriber
//! 4. Cancel the root signal so background target syncs exit at their
//!    next suspension point
//! 5. Close all scope-DB and admin-DB handles, then the catalog pool

pub mod config;

pub use config::{ConfigError, ManagerConfig};

use anyhow::{Context, Result};
use sm_01_catalog::{CatalogStore, PgCatalog};
use sm_02_scope_db::{DbBroker, PgConnFactory};
use sm_03_lifecycle::{LifecycleConfig, Orchestrator};
use sm_04_notifier::ScopeNotifier;
use sm_05_rpc::{server_tls_config, Dispatcher, RpcServer};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// The running manager and its shutdown controls.
pub struct ManagerRuntime {
    catalog: Arc<PgCatalog>,
    broker: Arc<DbBroker>,
    notifier: ScopeNotifier,
    orchestrator: Orchestrator,
    /// Stops the accept loop and drops live connections.
    accept_tx: watch::Sender<bool>,
    /// Root cancellation for background work.
    root_tx: watch::Sender<bool>,
    server: JoinHandle<()>,
}

impl ManagerRuntime {
    /// Bring every subsystem up and start serving.
    pub async fn start(config: ManagerConfig) -> Result<Self> {
        config.validate().context("configuration invalid")?;
        info!("===========================================");
        info!("  Scope Manager v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        let catalog = Arc::new(
            PgCatalog::connect(&config.catalog.url, config.catalog.max_connections)
                .await
                .context("catalog store connection failed")?,
        );
        let broker = Arc::new(DbBroker::new(Arc::new(PgConnFactory::new(
            config.scope_db_connections,
        ))));
        let notifier = ScopeNotifier::new();
        let (accept_tx, accept_rx) = watch::channel(false);
        let (root_tx, root_rx) = watch::channel(false);

        let orchestrator = Orchestrator::new(
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            Arc::clone(&broker),
            notifier.clone(),
            root_rx,
            LifecycleConfig {
                token_expiry_max: chrono::Duration::days(config.token_expiry_days),
                password_expiry: chrono::Duration::days(config.password_expiry_days),
                connections_client: config.connections_client,
                default_settings: config.scope_defaults.clone(),
            },
        );

        let dispatcher = Arc::new(Dispatcher::new(
            orchestrator.clone(),
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            notifier.clone(),
            config.privilege_secrets.clone(),
        ));

        let tls = if config.tls.enabled {
            Some(server_tls_config(&config.tls.files()).context("TLS configuration failed")?)
        } else {
            None
        };
        let rpc = RpcServer::new(
            config.listen_addr.clone(),
            tls,
            dispatcher,
            accept_rx,
        );
        let server = tokio::spawn(async move {
            if let Err(err) = rpc.run().await {
                error!(error = %err, "RPC endpoint failed");
            }
        });

        info!(addr = %config.listen_addr, "Scope Manager started");
        Ok(Self {
            catalog,
            broker,
            notifier,
            orchestrator,
            accept_tx,
            root_tx,
            server,
        })
    }

    /// Graceful shutdown in the documented order.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");

        // 1. Stop accepting new RPCs.
        let _ = self.accept_tx.send(true);

        // 2. Wait for in-flight scope-DB preparation to finish.
        let gate = self.orchestrator.prep_gate();
        let _prep = gate.lock().await;

        // 3. Release every parked subscriber.
        self.notifier.shutdown();

        // 4. Cancel background work.
        let _ = self.root_tx.send(true);

        // 5. Close database handles.
        self.broker.close_all().await;
        self.catalog.close().await;

        let _ = self.server.await;
        info!("Shutdown complete");
    }
}
