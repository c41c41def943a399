//! Views, grants, and database credential management.

use super::Orchestrator;
use chrono::{DateTime, Utc};
use shared_types::entities::filter_value_legal;
use shared_types::{secrets, Grant, ManagerError, ManagerResult, ScanScope, ScopeView, UserCredential};
use sm_01_catalog::CatalogError;
use sm_02_scope_db::adapters::postgres::FILTER_COLUMNS;
use sm_02_scope_db::{AdminConn, RoleCredential, ScopeConn};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Strip wildcards and empty strings, reject illegal characters, drop
/// unknown columns. `*` and `-` mean "match anything" upstream and must
/// not persist.
fn sanitize_filters(
    raw: HashMap<String, Vec<String>>,
) -> ManagerResult<HashMap<String, Vec<String>>> {
    let mut sanitized = HashMap::new();
    for (column, values) in raw {
        if !FILTER_COLUMNS.contains(&column.as_str()) {
            warn!(column = %column, "Dropping filter on unknown column");
            continue;
        }
        let mut kept: Vec<String> = Vec::new();
        for value in values {
            if value.is_empty() || value == "*" || value == "-" {
                continue;
            }
            if !filter_value_legal(&value) {
                return Err(ManagerError::invalid(format!(
                    "filter value {value:?} contains illegal characters"
                )));
            }
            if !kept.contains(&value) {
                kept.push(value);
            }
        }
        if !kept.is_empty() {
            sanitized.insert(column, kept);
        }
    }
    Ok(sanitized)
}

impl Orchestrator {
    async fn view_with_scope(&self, view_id: u64) -> ManagerResult<(ScopeView, ScanScope)> {
        let view = self.resolve_view(view_id).await?;
        let scope = self.resolve_scope(view.scope_id).await?;
        Ok((view, scope))
    }

    /// Create a named, filter-qualified view over a scope's results.
    pub async fn create_view(
        &self,
        scope_id: u64,
        name: String,
        created_by: String,
        filters: HashMap<String, Vec<String>>,
    ) -> ManagerResult<u64> {
        if name.trim().is_empty() {
            return Err(ManagerError::invalid("view name must not be empty"));
        }
        let scope = self.resolve_scope(scope_id).await?;
        let view = ScopeView {
            scope_id,
            name: name.trim().to_string(),
            created_by,
            created_at: Utc::now(),
            filters: sanitize_filters(filters)?,
            ..ScopeView::default()
        };
        let view_id = match self.catalog.insert_view(&view).await {
            Ok(id) => id,
            Err(CatalogError::Duplicate(_)) => return Err(ManagerError::ViewNameExisting),
            Err(err) => return Err(err.into()),
        };
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        if let Err(err) = conn.ensure_view(&view).await {
            if let Err(del_err) = self.catalog.delete_view(view_id).await {
                warn!(view = view_id, error = %del_err, "Compensating view delete failed");
            }
            return Err(err.into());
        }
        info!(scope = scope_id, view = view_id, name = %view.name, "View created");
        self.notifier.send(scope_id);
        Ok(view_id)
    }

    /// Rename a view, recreating its backing relation and re-granting
    /// every holder.
    pub async fn rename_view(&self, view_id: u64, name: String) -> ManagerResult<()> {
        if name.trim().is_empty() {
            return Err(ManagerError::invalid("view name must not be empty"));
        }
        let (view, scope) = self.view_with_scope(view_id).await?;
        let name = name.trim().to_string();
        match self.catalog.rename_view(view_id, &name).await {
            Ok(()) => {}
            Err(CatalogError::Duplicate(_)) => return Err(ManagerError::ViewNameExisting),
            Err(err) => return Err(err.into()),
        }
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        conn.drop_view(&view.name).await.map_err(ManagerError::from)?;
        let renamed = ScopeView {
            name: name.clone(),
            ..view.clone()
        };
        conn.ensure_view(&renamed).await.map_err(ManagerError::from)?;
        for grant in self
            .catalog
            .grants_of_view(view_id)
            .await
            .map_err(ManagerError::from)?
        {
            if let Err(err) = conn.grant_view_select(&grant.username, &name).await {
                warn!(view = view_id, role = %grant.username, error = %err,
                    "Re-grant after rename failed");
            }
        }
        self.notifier.send(scope.id);
        Ok(())
    }

    /// Delete a view together with its grants.
    pub async fn delete_view(&self, view_id: u64) -> ManagerResult<()> {
        let (view, scope) = self.view_with_scope(view_id).await?;
        let admin = self
            .broker
            .admin(&scope.db_server)
            .await
            .map_err(ManagerError::from)?;
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        for grant in self
            .catalog
            .grants_of_view(view_id)
            .await
            .map_err(ManagerError::from)?
        {
            self.remove_grant(&grant, &view, &conn, &admin).await?;
        }
        conn.drop_view(&view.name).await.map_err(ManagerError::from)?;
        self.catalog
            .delete_view(view_id)
            .await
            .map_err(ManagerError::from)?;
        info!(scope = scope.id, view = view_id, "View deleted");
        self.notifier.send(scope.id);
        Ok(())
    }

    /// Revoke one grant: the view privilege, the catalog row, and the role
    /// itself once nothing references it anymore.
    async fn remove_grant(
        &self,
        grant: &Grant,
        view: &ScopeView,
        conn: &Arc<dyn ScopeConn>,
        admin: &Arc<dyn AdminConn>,
    ) -> ManagerResult<()> {
        if let Err(err) = conn.revoke_view_select(&grant.username, &view.name).await {
            warn!(role = %grant.username, error = %err, "View revoke failed");
        }
        self.catalog
            .delete_grant(grant.id)
            .await
            .map_err(ManagerError::from)?;
        let remaining = self
            .catalog
            .grant_by_username(&grant.username)
            .await
            .map_err(ManagerError::from)?;
        if remaining.is_none() {
            if let Err(err) = conn.revoke_role(&grant.username).await {
                warn!(role = %grant.username, error = %err, "Role revoke failed");
            }
            if !grant.is_user {
                if let Err(err) = admin.drop_role(&grant.username).await {
                    warn!(role = %grant.username, error = %err, "Role drop failed");
                }
            }
        }
        Ok(())
    }

    /// Issue a non-user access token for a view.
    ///
    /// The returned credentials are disclosed exactly once; only the role
    /// name is persisted.
    pub async fn grant_token(
        &self,
        view_id: u64,
        description: String,
        created_by: String,
        expires_at: DateTime<Utc>,
    ) -> ManagerResult<(String, String)> {
        let now = Utc::now();
        if expires_at <= now {
            return Err(ManagerError::invalid("access token expiry lies in the past"));
        }
        if expires_at > now + self.config.token_expiry_max {
            return Err(ManagerError::invalid(format!(
                "access token expiry time may not exceed {} days",
                self.config.token_expiry_max.num_days()
            )));
        }
        let (view, scope) = self.view_with_scope(view_id).await?;
        let admin = self
            .broker
            .admin(&scope.db_server)
            .await
            .map_err(ManagerError::from)?;
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;

        let username = secrets::token_username();
        let password = secrets::token_password();
        admin
            .create_login_role(
                &username,
                &RoleCredential::Password(password.clone()),
                Some(expires_at),
                self.config.connections_client,
            )
            .await
            .map_err(ManagerError::from)?;

        let granted: ManagerResult<()> = async {
            conn.grant_view_select(&username, &view.name)
                .await
                .map_err(ManagerError::from)?;
            self.catalog
                .insert_grant(&Grant {
                    view_id,
                    username: username.clone(),
                    is_user: false,
                    description,
                    created_by,
                    expires_at: Some(expires_at),
                    created_at: now,
                    ..Grant::default()
                })
                .await
                .map_err(ManagerError::from)?;
            Ok(())
        }
        .await;
        if let Err(err) = granted {
            if let Err(drop_err) = admin.drop_role(&username).await {
                warn!(role = %username, error = %drop_err, "Compensating role drop failed");
            }
            return Err(err);
        }

        info!(view = view_id, role = %username, "Access token granted");
        self.notifier.send(scope.id);
        Ok((username, password))
    }

    /// Grant a set of users access to a view.
    ///
    /// Credentials arrive pre-hashed (SCRAM-SHA-256); cleartext passwords
    /// never reach the manager. Users already granted are skipped.
    pub async fn grant_users(
        &self,
        view_id: u64,
        credentials: Vec<UserCredential>,
        granted_by: String,
    ) -> ManagerResult<()> {
        let (view, scope) = self.view_with_scope(view_id).await?;
        let admin = self
            .broker
            .admin(&scope.db_server)
            .await
            .map_err(ManagerError::from)?;
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        let existing = self
            .catalog
            .grants_of_view(view_id)
            .await
            .map_err(ManagerError::from)?;

        for credential in credentials {
            if existing.iter().any(|g| g.username == credential.username) {
                continue;
            }
            let valid_until = Utc::now() + self.config.password_expiry;
            let role_credential = RoleCredential::ScramHash(credential.password_hash.clone());
            if admin
                .role_exists(&credential.username)
                .await
                .map_err(ManagerError::from)?
            {
                admin
                    .set_role_password(&credential.username, &role_credential, Some(valid_until))
                    .await
                    .map_err(ManagerError::from)?;
            } else {
                admin
                    .create_login_role(
                        &credential.username,
                        &role_credential,
                        Some(valid_until),
                        self.config.connections_client,
                    )
                    .await
                    .map_err(ManagerError::from)?;
            }
            conn.grant_view_select(&credential.username, &view.name)
                .await
                .map_err(ManagerError::from)?;
            self.catalog
                .insert_grant(&Grant {
                    view_id,
                    username: credential.username.clone(),
                    is_user: true,
                    created_by: granted_by.clone(),
                    created_at: Utc::now(),
                    ..Grant::default()
                })
                .await
                .map_err(ManagerError::from)?;
            info!(view = view_id, user = %credential.username, "User granted");
        }
        self.notifier.send(scope.id);
        Ok(())
    }

    /// Revoke a set of usernames from a view. Unknown usernames are
    /// skipped; revocation is a cleanup path and stays best-effort.
    pub async fn revoke_grants(
        &self,
        view_id: u64,
        usernames: Vec<String>,
    ) -> ManagerResult<()> {
        let (view, scope) = self.view_with_scope(view_id).await?;
        let admin = self
            .broker
            .admin(&scope.db_server)
            .await
            .map_err(ManagerError::from)?;
        let conn = self.broker.scope(&scope).await.map_err(ManagerError::from)?;
        let grants = self
            .catalog
            .grants_of_view(view_id)
            .await
            .map_err(ManagerError::from)?;
        for username in usernames {
            let Some(grant) = grants.iter().find(|g| g.username == username) else {
                warn!(view = view_id, user = %username, "Revoke for unknown grant skipped");
                continue;
            };
            self.remove_grant(grant, &view, &conn, &admin).await?;
            info!(view = view_id, user = %username, "Grant revoked");
        }
        self.notifier.send(scope.id);
        Ok(())
    }

    async fn grant_admin(
        &self,
        username: &str,
    ) -> ManagerResult<(Grant, Arc<dyn AdminConn>)> {
        let grant = self
            .catalog
            .grant_by_username(username)
            .await
            .map_err(ManagerError::from)?
            .ok_or(ManagerError::RecordNotFound)?;
        let (_, scope) = self.view_with_scope(grant.view_id).await?;
        let admin = self
            .broker
            .admin(&scope.db_server)
            .await
            .map_err(ManagerError::from)?;
        Ok((grant, admin))
    }

    /// Replace a granted role's password hash; validity restarts from now.
    pub async fn update_server_credentials(
        &self,
        username: &str,
        password_hash: &str,
    ) -> ManagerResult<()> {
        if password_hash.is_empty() {
            return Err(ManagerError::invalid("password hash must not be empty"));
        }
        let (_, admin) = self.grant_admin(username).await?;
        admin
            .set_role_password(
                username,
                &RoleCredential::ScramHash(password_hash.to_string()),
                Some(Utc::now() + self.config.password_expiry),
            )
            .await
            .map_err(ManagerError::from)?;
        info!(user = %username, "Database credentials updated");
        Ok(())
    }

    /// Disable a granted role's LOGIN attribute.
    pub async fn disable_db_credentials(&self, username: &str) -> ManagerResult<()> {
        let (_, admin) = self.grant_admin(username).await?;
        admin
            .set_role_login(username, false)
            .await
            .map_err(ManagerError::from)?;
        info!(user = %username, "Database credentials disabled");
        Ok(())
    }

    /// Re-enable a granted role's LOGIN attribute.
    pub async fn enable_db_credentials(&self, username: &str) -> ManagerResult<()> {
        let (_, admin) = self.grant_admin(username).await?;
        admin
            .set_role_login(username, true)
            .await
            .map_err(ManagerError::from)?;
        info!(user = %username, "Database credentials enabled");
        Ok(())
    }
}
