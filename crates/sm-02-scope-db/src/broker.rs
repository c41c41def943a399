//! # Keyed Handle Pool
//!
//! Caches one admin handle per database server and one scope handle per
//! live scope. Handles are reference-counted (`Arc`) and safe to share
//! across tasks; the broker only controls their lifetime.

use crate::errors::BrokerError;
use crate::ports::{AdminConn, ConnFactory, ScopeConn};
use dashmap::DashMap;
use shared_types::{DbServer, ScanScope};
use std::sync::Arc;
use tracing::{debug, info};

/// Broker of admin and scope database handles.
pub struct DbBroker {
    factory: Arc<dyn ConnFactory>,
    admins: DashMap<u64, Arc<dyn AdminConn>>,
    scopes: DashMap<u64, Arc<dyn ScopeConn>>,
}

impl DbBroker {
    #[must_use]
    pub fn new(factory: Arc<dyn ConnFactory>) -> Self {
        Self {
            factory,
            admins: DashMap::new(),
            scopes: DashMap::new(),
        }
    }

    /// Admin handle for a server, opened lazily on first request.
    ///
    /// Two racing first requests may both open a pool; the loser's pool is
    /// dropped and the cached handle wins.
    pub async fn admin(&self, server: &DbServer) -> Result<Arc<dyn AdminConn>, BrokerError> {
        if let Some(handle) = self.admins.get(&server.id) {
            return Ok(Arc::clone(&handle));
        }
        let handle = self.factory.admin(server).await?;
        debug!(server = server.id, "Admin handle opened");
        let entry = self
            .admins
            .entry(server.id)
            .or_insert_with(|| Arc::clone(&handle));
        Ok(Arc::clone(&entry))
    }

    /// Scope handle for a scope's result database, opened lazily.
    pub async fn scope(&self, scope: &ScanScope) -> Result<Arc<dyn ScopeConn>, BrokerError> {
        if let Some(handle) = self.scopes.get(&scope.id) {
            return Ok(Arc::clone(&handle));
        }
        let handle = self.factory.scope(&scope.db_server, &scope.db_name).await?;
        debug!(scope = scope.id, db = %scope.db_name, "Scope handle opened");
        let entry = self
            .scopes
            .entry(scope.id)
            .or_insert_with(|| Arc::clone(&handle));
        Ok(Arc::clone(&entry))
    }

    /// Open a scope handle without caching it. Used while preparing a
    /// database for a scope that has no catalog identity yet.
    pub async fn scope_uncached(
        &self,
        server: &DbServer,
        db_name: &str,
    ) -> Result<Arc<dyn ScopeConn>, BrokerError> {
        self.factory.scope(server, db_name).await
    }

    /// Evict and close the handle of a deleted scope.
    pub async fn evict_scope(&self, scope_id: u64) {
        if let Some((_, handle)) = self.scopes.remove(&scope_id) {
            handle.close().await;
            debug!(scope = scope_id, "Scope handle evicted");
        }
    }

    /// Close every cached handle. Part of the shutdown sequence.
    pub async fn close_all(&self) {
        let scope_count = self.scopes.len();
        let admin_count = self.admins.len();
        let scope_ids: Vec<u64> = self.scopes.iter().map(|e| *e.key()).collect();
        for id in scope_ids {
            if let Some((_, handle)) = self.scopes.remove(&id) {
                handle.close().await;
            }
        }
        let admin_ids: Vec<u64> = self.admins.iter().map(|e| *e.key()).collect();
        for id in admin_ids {
            if let Some((_, handle)) = self.admins.remove(&id) {
                handle.close().await;
            }
        }
        info!(scope_count, admin_count, "All database handles closed");
    }

    /// Number of cached scope handles.
    #[must_use]
    pub fn scope_handle_count(&self) -> usize {
        self.scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryCluster;

    fn server() -> DbServer {
        DbServer {
            id: 1,
            name: "primary".into(),
            host: "127.0.0.1".into(),
            port: 5432,
            admin_user: "postgres".into(),
            ..DbServer::default()
        }
    }

    fn scope(db_name: &str) -> ScanScope {
        ScanScope {
            id: 11,
            db_name: db_name.into(),
            db_server_id: 1,
            db_server: server(),
            ..ScanScope::default()
        }
    }

    #[tokio::test]
    async fn test_handles_are_cached() {
        let cluster = Arc::new(MemoryCluster::new());
        let broker = DbBroker::new(cluster.clone());
        let admin = broker.admin(&server()).await.unwrap();
        admin.create_database("abcdefghij").await.unwrap();

        let s = scope("abcdefghij");
        let first = broker.scope(&s).await.unwrap();
        let second = broker.scope(&s).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(broker.scope_handle_count(), 1);
    }

    #[tokio::test]
    async fn test_evict_scope_drops_handle() {
        let cluster = Arc::new(MemoryCluster::new());
        let broker = DbBroker::new(cluster.clone());
        let admin = broker.admin(&server()).await.unwrap();
        admin.create_database("abcdefghij").await.unwrap();

        broker.scope(&scope("abcdefghij")).await.unwrap();
        assert_eq!(broker.scope_handle_count(), 1);
        broker.evict_scope(11).await;
        assert_eq!(broker.scope_handle_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_empties_pools() {
        let cluster = Arc::new(MemoryCluster::new());
        let broker = DbBroker::new(cluster.clone());
        let admin = broker.admin(&server()).await.unwrap();
        admin.create_database("abcdefghij").await.unwrap();
        broker.scope(&scope("abcdefghij")).await.unwrap();

        broker.close_all().await;
        assert_eq!(broker.scope_handle_count(), 0);
    }
}
