//! Scope lifecycle: creation, deletion, pause/resume, cycles, secrets,
//! settings.

use super::Orchestrator;
use crate::DEFAULT_VIEW_NAME;
use chrono::Utc;
use shared_types::entities::ScopeType;
use shared_types::{
    secrets, ManagerError, ManagerResult, ScanScope, ScanSettings, NOTIFY_LIVE_SET_CHANGED,
};
use sm_01_catalog::ScopeChanges;
use shared_types::ScopeView;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Inputs of a scope creation.
#[derive(Debug, Clone)]
pub struct CreateScopeParams {
    pub db_server_id: u64,
    pub name: String,
    pub group_id: u64,
    pub created_by: String,
    pub scope_type: ScopeType,
    pub cycles: bool,
    pub cycles_retention: i32,
    pub attributes: HashMap<String, String>,
}

fn validate_retention(retention: i32) -> ManagerResult<()> {
    if retention == 0 || retention < -1 {
        return Err(ManagerError::invalid(
            "cycles retention must be at least 1, or -1 to keep all",
        ));
    }
    Ok(())
}

impl Orchestrator {
    /// Create a scope: a fresh database on the chosen server, the catalog
    /// row, the prepared result schema, and the default "All" view.
    ///
    /// Failures after database creation compensate in reverse order; the
    /// subscriber notification at the end is best-effort.
    pub async fn create_scope(&self, params: CreateScopeParams) -> ManagerResult<u64> {
        if params.name.trim().is_empty() {
            return Err(ManagerError::invalid("scope name must not be empty"));
        }
        validate_retention(params.cycles_retention)?;
        let server = self
            .catalog
            .db_server(params.db_server_id)
            .await
            .map_err(ManagerError::from)?
            .ok_or(ManagerError::RecordNotFound)?;

        let db_name = secrets::scope_db_name();
        let secret = secrets::scope_secret();
        let admin = self.broker.admin(&server).await.map_err(ManagerError::from)?;
        admin
            .create_database(&db_name)
            .await
            .map_err(ManagerError::from)?;

        let mut scope = ScanScope {
            name: params.name.trim().to_string(),
            db_name: db_name.clone(),
            group_id: params.group_id,
            created_by: params.created_by.clone(),
            created_at: Utc::now(),
            enabled: true,
            scope_type: params.scope_type,
            cycles: params.cycles,
            cycles_retention: params.cycles_retention,
            attributes: params.attributes.clone(),
            secret,
            db_server_id: server.id,
            db_server: server.clone(),
            ..ScanScope::default()
        };
        let scope_id = match self.catalog.insert_scope(&scope).await {
            Ok(id) => id,
            Err(err) => {
                if let Err(drop_err) = admin.drop_database(&db_name).await {
                    error!(db = %db_name, error = %drop_err, "Compensating drop failed");
                }
                return Err(err.into());
            }
        };
        scope.id = scope_id;

        // Prepare the result database under the single-holder gate so
        // shutdown waits for us instead of closing handles underneath.
        let prepared: ManagerResult<()> = {
            let _prep = self.prep_gate.lock().await;
            let conn = self.broker.scope(&scope).await.map_err(ManagerError::from);
            match conn {
                Ok(conn) => {
                    let steps = async {
                        conn.revoke_public().await?;
                        conn.migrate().await?;
                        conn.install_trigram_indexes().await?;
                        conn.ensure_view(&ScopeView {
                            scope_id,
                            name: DEFAULT_VIEW_NAME.to_string(),
                            ..ScopeView::default()
                        })
                        .await
                    };
                    steps.await.map_err(ManagerError::from)
                }
                Err(err) => Err(err),
            }
        };
        if let Err(err) = prepared {
            self.unwind_created_scope(scope_id, &db_name, &admin).await;
            return Err(err);
        }

        let default_view = ScopeView {
            scope_id,
            name: DEFAULT_VIEW_NAME.to_string(),
            created_by: params.created_by,
            created_at: Utc::now(),
            filters: HashMap::new(),
            ..ScopeView::default()
        };
        if let Err(err) = self.catalog.insert_view(&default_view).await {
            self.unwind_created_scope(scope_id, &db_name, &admin).await;
            return Err(err.into());
        }

        if let Err(err) = self
            .catalog
            .save_settings(scope_id, &self.config.default_settings)
            .await
        {
            warn!(scope = scope_id, error = %err, "Default settings not persisted");
        }
        if let Err(err) = admin
            .set_database_comment(&db_name, &format!("scope {}", scope.name))
            .await
        {
            warn!(scope = scope_id, error = %err, "Database comment not set");
        }

        info!(scope = scope_id, db = %db_name, "Scope created");
        self.notifier.send(scope_id);
        Ok(scope_id)
    }

    /// Reverse-order compensation for a half-created scope.
    async fn unwind_created_scope(
        &self,
        scope_id: u64,
        db_name: &str,
        admin: &std::sync::Arc<dyn sm_02_scope_db::AdminConn>,
    ) {
        self.broker.evict_scope(scope_id).await;
        if let Err(err) = self.catalog.delete_settings(scope_id).await {
            error!(scope = scope_id, error = %err, "Compensating settings delete failed");
        }
        if let Err(err) = self.catalog.delete_scope(scope_id).await {
            error!(scope = scope_id, error = %err, "Compensating catalog delete failed");
        }
        if let Err(err) = admin.drop_database(db_name).await {
            error!(db = %db_name, error = %err, "Compensating drop failed");
        }
    }

    /// Tear down a scope: roles and grants on the scope database, the
    /// database itself, then the catalog rows in foreign-key order.
    pub async fn delete_scope(&self, id: u64) -> ManagerResult<()> {
        let scope = self.resolve_scope(id).await?;
        let admin = self
            .broker
            .admin(&scope.db_server)
            .await
            .map_err(ManagerError::from)?;
        let views = self.catalog.views_of(id).await.map_err(ManagerError::from)?;

        // Database-side teardown first. The handle may already be gone if a
        // previous deletion attempt got this far; that is not fatal.
        match self.broker.scope(&scope).await {
            Ok(conn) => {
                for view in &views {
                    for grant in self
                        .catalog
                        .grants_of_view(view.id)
                        .await
                        .map_err(ManagerError::from)?
                    {
                        if let Err(err) = conn.revoke_role(&grant.username).await {
                            warn!(scope = id, role = %grant.username, error = %err,
                                "Role revoke failed during deletion");
                        }
                        if !grant.is_user {
                            if let Err(err) = admin.drop_role(&grant.username).await {
                                warn!(scope = id, role = %grant.username, error = %err,
                                    "Role drop failed during deletion");
                            }
                        }
                    }
                }
            }
            Err(err) => {
                warn!(scope = id, error = %err, "Scope database unreachable during deletion");
            }
        }
        self.broker.evict_scope(id).await;
        admin
            .drop_database(&scope.db_name)
            .await
            .map_err(ManagerError::from)?;

        // Catalog rows in foreign-key order: grants, views, agents, scope.
        for view in &views {
            for grant in self
                .catalog
                .grants_of_view(view.id)
                .await
                .map_err(ManagerError::from)?
            {
                self.catalog
                    .delete_grant(grant.id)
                    .await
                    .map_err(ManagerError::from)?;
            }
            self.catalog
                .delete_view(view.id)
                .await
                .map_err(ManagerError::from)?;
        }
        self.catalog
            .delete_agents_of_scope(id)
            .await
            .map_err(ManagerError::from)?;
        self.catalog
            .delete_settings(id)
            .await
            .map_err(ManagerError::from)?;
        self.catalog
            .delete_scope(id)
            .await
            .map_err(ManagerError::from)?;

        info!(scope = id, db = %scope.db_name, "Scope deleted");
        self.notifier.send(NOTIFY_LIVE_SET_CHANGED);
        Ok(())
    }

    /// Pause or resume a scope. Returns the new enabled state.
    pub async fn toggle_scope(&self, id: u64) -> ManagerResult<bool> {
        let scope = self.resolve_scope(id).await?;
        let enabled = !scope.enabled;
        self.catalog
            .update_scope(
                id,
                &ScopeChanges {
                    enabled: Some(enabled),
                    ..ScopeChanges::default()
                },
            )
            .await
            .map_err(ManagerError::from)?;
        if enabled {
            info!(scope = id, "Scope resumed");
        } else {
            info!(scope = id, "Scope paused");
        }
        self.notifier.send(id);
        Ok(enabled)
    }

    /// Update the mutable scope attributes.
    pub async fn update_scope(
        &self,
        id: u64,
        name: String,
        cycles: bool,
        cycles_retention: i32,
        attributes: Option<HashMap<String, String>>,
    ) -> ManagerResult<()> {
        if name.trim().is_empty() {
            return Err(ManagerError::invalid("scope name must not be empty"));
        }
        validate_retention(cycles_retention)?;
        self.resolve_scope(id).await?;
        self.catalog
            .update_scope(
                id,
                &ScopeChanges {
                    name: Some(name.trim().to_string()),
                    cycles: Some(cycles),
                    cycles_retention: Some(cycles_retention),
                    attributes,
                    ..ScopeChanges::default()
                },
            )
            .await
            .map_err(ManagerError::from)?;
        self.notifier.send(id);
        Ok(())
    }

    /// Start a new scan cycle: per-target state reset, retention trimming,
    /// fresh progress ratios.
    pub async fn new_cycle(&self, id: u64) -> ManagerResult<()> {
        let scope = self.resolve_scope(id).await?;
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        conn.new_cycle(scope.cycles_retention)
            .await
            .map_err(ManagerError::from)?;
        let counts = conn.progress_counts().await.map_err(ManagerError::from)?;
        self.catalog
            .update_scope(
                id,
                &ScopeChanges {
                    ratios: Some(counts.ratios()),
                    ..ScopeChanges::default()
                },
            )
            .await
            .map_err(ManagerError::from)?;
        info!(scope = id, "New cycle started");
        self.notifier.send(id);
        Ok(())
    }

    /// Rotate the scope secret. The new value is disclosed exactly once.
    pub async fn reset_secret(&self, id: u64) -> ManagerResult<String> {
        self.resolve_scope(id).await?;
        let secret = secrets::scope_secret();
        self.catalog
            .update_scope(
                id,
                &ScopeChanges {
                    secret: Some(secret.clone()),
                    ..ScopeChanges::default()
                },
            )
            .await
            .map_err(ManagerError::from)?;
        info!(scope = id, "Scope secret rotated");
        self.notifier.send(id);
        Ok(secret)
    }

    /// Replace the scope's scan settings.
    pub async fn update_settings(&self, id: u64, settings: ScanSettings) -> ManagerResult<()> {
        settings.validate().map_err(ManagerError::invalid)?;
        self.resolve_scope(id).await?;
        self.catalog
            .save_settings(id, &settings)
            .await
            .map_err(ManagerError::from)?;
        self.notifier.send(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::fixture;
    use super::*;
    use sm_01_catalog::CatalogStore;
    use shared_types::ScanStatus;
    use std::time::Duration;
    use tokio::time::timeout;

    fn params(server_id: u64) -> CreateScopeParams {
        CreateScopeParams {
            db_server_id: server_id,
            name: "S".into(),
            group_id: 7,
            created_by: "alice".into(),
            scope_type: ScopeType::Custom,
            cycles: false,
            cycles_retention: -1,
            attributes: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_scope_full_shape() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();

        let scope = fx.catalog.scope(id).await.unwrap().unwrap();
        assert_eq!(scope.name, "S");
        assert!(scope.enabled);
        assert_eq!(scope.size, 0);
        assert_eq!(scope.secret.len(), 64);
        assert_eq!(scope.db_name.len(), 10);
        assert!(fx.cluster.database_prepared(fx.server_id, &scope.db_name));

        let views = fx.catalog.views_of(id).await.unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].name, "All");
        assert!(views[0].filters.is_empty());

        assert!(fx.catalog.settings(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_scope_notifies() {
        let fx = fixture().await;
        let notifier = fx.notifier.clone();
        let waiter = tokio::spawn(async move { notifier.recv().await });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();

        let batch = timeout(Duration::from_millis(500), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(batch.contains(&id));
    }

    #[tokio::test]
    async fn test_create_scope_zero_retention_rejected() {
        let fx = fixture().await;
        let mut bad = params(fx.server_id);
        bad.cycles_retention = 0;
        let err = fx.orchestrator.create_scope(bad).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_create_scope_compensates_on_prepare_failure() {
        let fx = fixture().await;
        fx.cluster.fail_next_migrate();

        let err = fx
            .orchestrator
            .create_scope(params(fx.server_id))
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::Internal(_)));
        assert!(fx.catalog.scope_entry_ids().await.unwrap().is_empty());
        assert!(fx.cluster.database_names(fx.server_id).is_empty());
    }

    #[tokio::test]
    async fn test_delete_scope_ripple() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();
        let db_name = fx.catalog.scope(id).await.unwrap().unwrap().db_name;

        fx.orchestrator.delete_scope(id).await.unwrap();
        assert!(fx.catalog.scope(id).await.unwrap().is_none());
        assert!(fx.catalog.views_of(id).await.unwrap().is_empty());
        assert!(!fx.cluster.database_exists(fx.server_id, &db_name));
        assert!(fx
            .catalog
            .scope_entry_ids()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_toggle_scope_flips_state() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();

        assert!(!fx.orchestrator.toggle_scope(id).await.unwrap());
        assert!(!fx.catalog.scope(id).await.unwrap().unwrap().enabled);
        assert!(fx.orchestrator.toggle_scope(id).await.unwrap());
        assert!(fx.catalog.scope(id).await.unwrap().unwrap().enabled);
    }

    #[tokio::test]
    async fn test_new_cycle_empty_scope_ratios() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();

        fx.orchestrator.new_cycle(id).await.unwrap();
        let scope = fx.catalog.scope(id).await.unwrap().unwrap();
        assert_eq!(scope.cycle_done, 100.0);
        assert_eq!(scope.cycle_active, 0.0);
        assert_eq!(scope.cycle_failed, 0.0);
    }

    #[tokio::test]
    async fn test_new_cycle_resets_progress() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();
        let db_name = fx.catalog.scope(id).await.unwrap().unwrap().db_name;
        fx.orchestrator
            .update_targets(id, vec![shared_types::Target {
                input: "10.0.0.1".into(),
                ..shared_types::Target::default()
            }], true)
            .await
            .unwrap();
        fx.cluster
            .set_target_status(fx.server_id, &db_name, "10.0.0.1", ScanStatus::Done);

        fx.orchestrator.new_cycle(id).await.unwrap();
        let scope = fx.catalog.scope(id).await.unwrap().unwrap();
        assert_eq!(scope.cycle_done, 0.0);
        assert_eq!(scope.cycle_active, 0.0);
        assert_eq!(scope.cycle_failed, 0.0);
    }

    #[tokio::test]
    async fn test_reset_secret_rotates() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();
        let before = fx.catalog.scope(id).await.unwrap().unwrap().secret;

        let secret = fx.orchestrator.reset_secret(id).await.unwrap();
        assert_eq!(secret.len(), 64);
        assert_ne!(secret, before);
        assert_eq!(fx.catalog.scope(id).await.unwrap().unwrap().secret, secret);
    }

    #[tokio::test]
    async fn test_update_settings_validates() {
        let fx = fixture().await;
        let id = fx.orchestrator.create_scope(params(fx.server_id)).await.unwrap();
        let bad = ScanSettings {
            batch_size: 0,
            ..ScanSettings::default()
        };
        let err = fx.orchestrator.update_settings(id, bad).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidArgument(_)));
    }
}
