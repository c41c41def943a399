//! # Method Dispatcher
//!
//! Maps each request onto the catalog, the orchestrator, or the notifier,
//! applies the redaction projection on every safe-family egress, and gates
//! the single sensitive method behind the privilege-secret check.
//!
//! Every method is tagged with a short request id and logged with its
//! duration at exit. Misses triggered by client input log at debug/info so
//! probing cannot flood the error log.

use chrono::Utc;
use shared_types::entities::ScopeType;
use shared_types::secrets::privilege_secret_matches;
use shared_types::{
    DbServer, ManagerError, ManagerResult, Request, Response, ScanScope, SqlLog, WireError,
};
use sm_01_catalog::CatalogStore;
use sm_03_lifecycle::{CreateScopeParams, Orchestrator};
use sm_04_notifier::{NotifyError, ScopeNotifier};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The request dispatcher shared by every connection task.
pub struct Dispatcher {
    orchestrator: Orchestrator,
    catalog: Arc<dyn CatalogStore>,
    notifier: ScopeNotifier,
    privilege_secrets: Vec<String>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        orchestrator: Orchestrator,
        catalog: Arc<dyn CatalogStore>,
        notifier: ScopeNotifier,
        privilege_secrets: Vec<String>,
    ) -> Self {
        Self {
            orchestrator,
            catalog,
            notifier,
            privilege_secrets,
        }
    }

    /// Handle one request, producing exactly one response.
    pub async fn handle(&self, request: Request) -> Response {
        let rpc = short_tag();
        let method = request.method();
        let started = Instant::now();
        debug!(rpc = %rpc, method, "Request received");

        let response = match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                match &err {
                    ManagerError::Internal(detail) => {
                        error!(rpc = %rpc, method, error = %detail, "Request failed");
                    }
                    other => {
                        debug!(rpc = %rpc, method, error = %other, "Request rejected");
                    }
                }
                Response::Error(WireError::from(err))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(rpc = %rpc, method, elapsed_ms, "Request finished");
        response
    }

    async fn dispatch(&self, request: Request) -> ManagerResult<Response> {
        match request {
            // -----------------------------------------------------------------
            // Notifications
            // -----------------------------------------------------------------
            Request::SubscribeNotification => {
                let batch = match self.notifier.recv().await {
                    Ok(batch) => batch,
                    Err(NotifyError::ShuttingDown) => {
                        return Err(ManagerError::NotifierShuttingDown)
                    }
                };
                let remaining = self.catalog.scope_entry_ids().await?;
                Ok(Response::Notification {
                    update_scope_ids: batch,
                    remaining_scope_ids: remaining,
                })
            }

            // -----------------------------------------------------------------
            // Scope read-out (safe family: always redacted)
            // -----------------------------------------------------------------
            Request::GetScope { id } => {
                let scope = self
                    .catalog
                    .scope(id)
                    .await?
                    .ok_or(ManagerError::RecordNotFound)?;
                Ok(Response::Scope(Box::new(scope.redacted())))
            }
            Request::GetScopes => {
                let scopes = self.catalog.scopes().await?;
                Ok(Response::Scopes(redact_all(scopes)))
            }
            Request::GetScopesOf { group_ids } => {
                let scopes = self.catalog.scopes_of(&group_ids).await?;
                Ok(Response::Scopes(redact_all(scopes)))
            }
            Request::GetScopeFull {
                privilege_secret,
                scope_secret,
            } => self.get_scope_full(&privilege_secret, &scope_secret).await,

            // -----------------------------------------------------------------
            // Scope lifecycle
            // -----------------------------------------------------------------
            Request::CreateScope {
                db_server_id,
                name,
                group_id,
                created_by,
                scope_type,
                cycles,
                cycles_retention,
                attributes,
            } => {
                let id = self
                    .orchestrator
                    .create_scope(CreateScopeParams {
                        db_server_id,
                        name,
                        group_id,
                        created_by,
                        scope_type: ScopeType::parse(&scope_type),
                        cycles,
                        cycles_retention,
                        attributes,
                    })
                    .await?;
                Ok(Response::Id(id))
            }
            Request::DeleteScope { id } => {
                self.orchestrator.delete_scope(id).await?;
                Ok(Response::Ack)
            }
            Request::ToggleScope { id } => {
                self.orchestrator.toggle_scope(id).await?;
                Ok(Response::Ack)
            }
            Request::UpdateScope {
                id,
                name,
                cycles,
                cycles_retention,
                attributes,
            } => {
                self.orchestrator
                    .update_scope(id, name, cycles, cycles_retention, attributes)
                    .await?;
                Ok(Response::Ack)
            }
            Request::NewCycle { id } => {
                self.orchestrator.new_cycle(id).await?;
                Ok(Response::Ack)
            }
            Request::ResetSecret { id } => {
                let secret = self.orchestrator.reset_secret(id).await?;
                Ok(Response::Secret(secret))
            }
            Request::UpdateSettings { id, settings } => {
                self.orchestrator.update_settings(id, settings).await?;
                Ok(Response::Ack)
            }

            // -----------------------------------------------------------------
            // Targets
            // -----------------------------------------------------------------
            Request::GetScopeTargets { id } => {
                let (synchronizing, targets) = self.orchestrator.get_targets(id).await?;
                Ok(Response::Targets {
                    synchronizing,
                    targets,
                })
            }
            Request::UpdateScopeTargets {
                id,
                targets,
                blocking,
            } => {
                let counts = self
                    .orchestrator
                    .update_targets(id, targets, blocking)
                    .await?;
                Ok(Response::SyncCounts(counts))
            }
            Request::ResetInput { scope_id, input } => {
                self.orchestrator.reset_input(scope_id, &input).await?;
                Ok(Response::Ack)
            }

            // -----------------------------------------------------------------
            // Views
            // -----------------------------------------------------------------
            Request::GetViews => Ok(Response::Views(self.catalog.views().await?)),
            Request::GetViewsOf { scope_id } => {
                Ok(Response::Views(self.catalog.views_of(scope_id).await?))
            }
            Request::GetViewsGranted { username } => {
                Ok(Response::Views(self.catalog.views_granted(&username).await?))
            }
            Request::GetView { id } => {
                let view = self
                    .catalog
                    .view(id)
                    .await?
                    .ok_or(ManagerError::RecordNotFound)?;
                Ok(Response::View(view))
            }
            Request::CreateView {
                scope_id,
                name,
                created_by,
                filters,
            } => {
                let id = self
                    .orchestrator
                    .create_view(scope_id, name, created_by, filters)
                    .await?;
                Ok(Response::Id(id))
            }
            Request::UpdateView { id, name } => {
                self.orchestrator.rename_view(id, name).await?;
                Ok(Response::Ack)
            }
            Request::DeleteView { id } => {
                self.orchestrator.delete_view(id).await?;
                Ok(Response::Ack)
            }

            // -----------------------------------------------------------------
            // Grants
            // -----------------------------------------------------------------
            Request::GetGrantsOf { view_id } => Ok(Response::Grants(
                self.catalog.grants_of_view(view_id).await?,
            )),
            Request::GrantToken {
                view_id,
                description,
                created_by,
                expires_at,
            } => {
                let (username, password) = self
                    .orchestrator
                    .grant_token(view_id, description, created_by, expires_at)
                    .await?;
                Ok(Response::Credentials { username, password })
            }
            Request::GrantUsers {
                view_id,
                credentials,
                granted_by,
            } => {
                self.orchestrator
                    .grant_users(view_id, credentials, granted_by)
                    .await?;
                Ok(Response::Ack)
            }
            Request::RevokeGrants { view_id, usernames } => {
                self.orchestrator.revoke_grants(view_id, usernames).await?;
                Ok(Response::Ack)
            }
            Request::UpdateServerCredentials {
                username,
                password_hash,
            } => {
                self.orchestrator
                    .update_server_credentials(&username, &password_hash)
                    .await?;
                Ok(Response::Ack)
            }
            Request::DisableDbCredentials { username } => {
                self.orchestrator.disable_db_credentials(&username).await?;
                Ok(Response::Ack)
            }
            Request::EnableDbCredentials { username } => {
                self.orchestrator.enable_db_credentials(&username).await?;
                Ok(Response::Ack)
            }

            // -----------------------------------------------------------------
            // Database servers
            // -----------------------------------------------------------------
            Request::GetDbServers => {
                let servers = self
                    .catalog
                    .db_servers()
                    .await?
                    .into_iter()
                    .map(strip_admin_password)
                    .collect();
                Ok(Response::DbServers(servers))
            }
            Request::SaveDbServer { server } => {
                let id = self.catalog.save_db_server(&server).await?;
                Ok(Response::Id(id))
            }
            Request::DeleteDbServer { id } => {
                self.catalog.delete_db_server(id).await?;
                Ok(Response::Ack)
            }

            // -----------------------------------------------------------------
            // Agents & audit
            // -----------------------------------------------------------------
            Request::UpdateAgents { stats } => {
                self.orchestrator.update_agents(stats).await?;
                Ok(Response::Ack)
            }
            Request::GetAgents => Ok(Response::Agents(self.catalog.agents().await?)),
            Request::DeleteAgent { id } => {
                self.catalog.delete_agent(id).await?;
                Ok(Response::Ack)
            }
            Request::CreateSqlLog {
                db_name,
                db_user,
                client_addr,
                query,
            } => {
                let id = self
                    .catalog
                    .insert_sql_log(&SqlLog {
                        db_name,
                        db_user,
                        client_addr,
                        query,
                        logged_at: Utc::now(),
                        ..SqlLog::default()
                    })
                    .await?;
                Ok(Response::Id(id))
            }
            Request::GetSqlLogs { db_name, since } => Ok(Response::SqlLogs(
                self.catalog.sql_logs_since(&db_name, since).await?,
            )),
        }
    }

    /// The sensitive read-out. Unknown privilege secrets are a warning;
    /// unknown scope secrets return an empty scope at info level so
    /// brute-force probing never floods the log.
    async fn get_scope_full(
        &self,
        privilege_secret: &str,
        scope_secret: &str,
    ) -> ManagerResult<Response> {
        if !privilege_secret_matches(privilege_secret, &self.privilege_secrets) {
            warn!("Sensitive scope read-out with invalid privilege secret");
            return Err(ManagerError::InvalidPrivilege);
        }
        match self.catalog.scope_by_secret(scope_secret).await? {
            Some(scope) => Ok(Response::Scope(Box::new(scope))),
            None => {
                info!("Sensitive scope read-out for unknown scope secret");
                Ok(Response::Scope(Box::new(ScanScope::default())))
            }
        }
    }
}

fn redact_all(scopes: Vec<ScanScope>) -> Vec<ScanScope> {
    scopes.iter().map(ScanScope::redacted).collect()
}

/// Server records keep their connection coordinates for the admin surface,
/// but the credential never leaves the process.
fn strip_admin_password(mut server: DbServer) -> DbServer {
    server.admin_password = String::new();
    server
}

fn short_tag() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Target;
    use sm_01_catalog::MemoryCatalog;
    use sm_02_scope_db::{ConnFactory, DbBroker, MemoryCluster};
    use sm_03_lifecycle::LifecycleConfig;
    use std::collections::HashMap;
    use tokio::sync::watch;

    const PRIVILEGE: &str = "high-entropy-privilege-secret";

    async fn dispatcher() -> (Dispatcher, Arc<MemoryCatalog>, u64, watch::Sender<bool>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let cluster = Arc::new(MemoryCluster::new());
        let broker = Arc::new(DbBroker::new(
            Arc::clone(&cluster) as Arc<dyn ConnFactory>
        ));
        let notifier = ScopeNotifier::with_flush_interval(std::time::Duration::from_millis(20));
        let (shutdown_tx, rx) = watch::channel(false);
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
            .unwrap();
        let orchestrator = Orchestrator::new(
            Arc::clone(&catalog) as Arc<dyn CatalogStore>,
            broker,
            notifier.clone(),
            rx,
            LifecycleConfig::default(),
        );
        (
            Dispatcher::new(
                orchestrator,
                Arc::clone(&catalog) as Arc<dyn CatalogStore>,
                notifier,
                vec![PRIVILEGE.to_string()],
            ),
            catalog,
            server_id,
            shutdown_tx,
        )
    }

    async fn create_scope(dispatcher: &Dispatcher, server_id: u64) -> u64 {
        match dispatcher
            .handle(Request::CreateScope {
                db_server_id: server_id,
                name: "S".into(),
                group_id: 7,
                created_by: "alice".into(),
                scope_type: "custom".into(),
                cycles: false,
                cycles_retention: -1,
                attributes: HashMap::new(),
            })
            .await
        {
            Response::Id(id) => id,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_scope_is_redacted() {
        let (dispatcher, _, server_id, _shutdown) = dispatcher().await;
        let id = create_scope(&dispatcher, server_id).await;
        match dispatcher.handle(Request::GetScope { id }).await {
            Response::Scope(scope) => {
                assert_eq!(scope.name, "S");
                assert!(scope.secret.is_empty());
                assert!(scope.db_server.admin_password.is_empty());
                assert!(scope.db_server.host.is_empty());
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sensitive_gate_rejects_bad_privilege() {
        let (dispatcher, _, _, _shutdown) = dispatcher().await;
        match dispatcher
            .handle(Request::GetScopeFull {
                privilege_secret: "wrong".into(),
                scope_secret: "whatever".into(),
            })
            .await
        {
            Response::Error(err) => {
                assert_eq!(err.into_error(), ManagerError::InvalidPrivilege);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sensitive_gate_unknown_scope_secret_is_empty_scope() {
        let (dispatcher, _, _, _shutdown) = dispatcher().await;
        match dispatcher
            .handle(Request::GetScopeFull {
                privilege_secret: PRIVILEGE.into(),
                scope_secret: "unknown".into(),
            })
            .await
        {
            Response::Scope(scope) => assert_eq!(scope.id, 0),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sensitive_read_out_returns_full_scope() {
        let (dispatcher, catalog, server_id, _shutdown) = dispatcher().await;
        let id = create_scope(&dispatcher, server_id).await;
        let secret = catalog.scope(id).await.unwrap().unwrap().secret;
        match dispatcher
            .handle(Request::GetScopeFull {
                privilege_secret: PRIVILEGE.into(),
                scope_secret: secret.clone(),
            })
            .await
        {
            Response::Scope(scope) => {
                assert_eq!(scope.id, id);
                assert_eq!(scope.secret, secret);
                assert_eq!(scope.db_server.admin_password, "hunter2");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_targets_round_trip() {
        let (dispatcher, _, server_id, _shutdown) = dispatcher().await;
        let id = create_scope(&dispatcher, server_id).await;
        let response = dispatcher
            .handle(Request::UpdateScopeTargets {
                id,
                targets: vec![Target {
                    input: "10.0.0.0/30".into(),
                    ..Target::default()
                }],
                blocking: true,
            })
            .await;
        match response {
            Response::SyncCounts(counts) => assert_eq!(counts.created, 1),
            other => panic!("unexpected response: {other:?}"),
        }
        match dispatcher.handle(Request::GetScopeTargets { id }).await {
            Response::Targets {
                synchronizing,
                targets,
            } => {
                assert!(!synchronizing);
                assert_eq!(targets.len(), 1);
                assert_eq!(targets[0].input_size, 4);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_db_servers_never_carry_password() {
        let (dispatcher, _, _, _shutdown) = dispatcher().await;
        match dispatcher.handle(Request::GetDbServers).await {
            Response::DbServers(servers) => {
                assert_eq!(servers.len(), 1);
                assert!(servers[0].admin_password.is_empty());
                assert_eq!(servers[0].host, "127.0.0.1");
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_db_server_in_use_is_conflict() {
        let (dispatcher, _, server_id, _shutdown) = dispatcher().await;
        create_scope(&dispatcher, server_id).await;
        match dispatcher.handle(Request::DeleteDbServer { id: server_id }).await {
            Response::Error(err) => {
                assert_eq!(err.into_error(), ManagerError::DatabaseInUse);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }
}
