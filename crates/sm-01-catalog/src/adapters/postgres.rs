//! # Postgres Catalog Adapter
//!
//! Production implementation of the [`CatalogStore`] port over a sqlx pool.
//!
//! Schema management is auto-migration: idempotent `CREATE TABLE IF NOT
//! EXISTS` statements executed at startup. Uniqueness and referential
//! integrity are declared in the DDL; the adapter re-checks only the
//! "server not in use" rule, which has no declarative spelling.

use crate::errors::CatalogError;
use crate::ports::{CatalogStore, ScopeChanges};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{
    AgentReport, DbServer, Grant, ScanAgent, ScanScope, ScanSettings, ScopeType, ScopeView, SqlLog,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, QueryBuilder, Row};
use std::collections::HashMap;
use tracing::{debug, info};

/// Idempotent catalog schema.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS db_servers (
        id             BIGSERIAL PRIMARY KEY,
        name           TEXT NOT NULL,
        dialect        TEXT NOT NULL DEFAULT 'postgres',
        host           TEXT NOT NULL,
        host_public    TEXT NOT NULL DEFAULT '',
        port           INT NOT NULL,
        admin_user     TEXT NOT NULL,
        admin_password TEXT NOT NULL,
        args           TEXT NOT NULL DEFAULT '',
        UNIQUE (host, port, admin_user)
    )",
    "CREATE TABLE IF NOT EXISTS scopes (
        id               BIGSERIAL PRIMARY KEY,
        name             TEXT NOT NULL,
        db_name          TEXT NOT NULL UNIQUE,
        group_id         BIGINT NOT NULL,
        created_by       TEXT NOT NULL,
        created_at       TIMESTAMPTZ NOT NULL,
        enabled          BOOLEAN NOT NULL,
        scope_type       TEXT NOT NULL,
        cycles           BOOLEAN NOT NULL,
        cycles_retention INT NOT NULL,
        attributes       JSONB NOT NULL DEFAULT '{}',
        size             BIGINT NOT NULL DEFAULT 0,
        last_sync        TIMESTAMPTZ,
        cycle_done       DOUBLE PRECISION NOT NULL DEFAULT 0,
        cycle_active     DOUBLE PRECISION NOT NULL DEFAULT 0,
        cycle_failed     DOUBLE PRECISION NOT NULL DEFAULT 0,
        secret           TEXT NOT NULL,
        db_server_id     BIGINT NOT NULL REFERENCES db_servers(id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_scopes_secret ON scopes (secret)",
    "CREATE INDEX IF NOT EXISTS idx_scopes_group ON scopes (group_id)",
    "CREATE TABLE IF NOT EXISTS scope_views (
        id         BIGSERIAL PRIMARY KEY,
        scope_id   BIGINT NOT NULL REFERENCES scopes(id),
        name       TEXT NOT NULL,
        created_by TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        filters    JSONB NOT NULL DEFAULT '{}',
        UNIQUE (scope_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS view_grants (
        id         BIGSERIAL PRIMARY KEY,
        view_id    BIGINT NOT NULL REFERENCES scope_views(id),
        username   TEXT NOT NULL UNIQUE,
        is_user    BOOLEAN NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        created_by TEXT NOT NULL,
        expires_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS scan_agents (
        id           BIGSERIAL PRIMARY KEY,
        scope_id     BIGINT NOT NULL REFERENCES scopes(id),
        name         TEXT NOT NULL,
        host         TEXT NOT NULL DEFAULT '',
        version      TEXT NOT NULL DEFAULT '',
        active_tasks INT NOT NULL DEFAULT 0,
        first_seen   TIMESTAMPTZ NOT NULL,
        last_seen    TIMESTAMPTZ NOT NULL,
        UNIQUE (scope_id, name)
    )",
    "CREATE TABLE IF NOT EXISTS sql_logs (
        id          BIGSERIAL PRIMARY KEY,
        db_name     TEXT NOT NULL,
        db_user     TEXT NOT NULL DEFAULT '',
        client_addr TEXT NOT NULL DEFAULT '',
        query       TEXT NOT NULL,
        logged_at   TIMESTAMPTZ NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_sql_logs_db_time ON sql_logs (db_name, logged_at)",
    "CREATE TABLE IF NOT EXISTS scope_settings (
        scope_id BIGINT PRIMARY KEY REFERENCES scopes(id),
        settings JSONB NOT NULL
    )",
];

/// Columns of a scope row joined with its server record.
const SCOPE_COLUMNS: &str = "s.id, s.name, s.db_name, s.group_id, s.created_by, s.created_at, \
     s.enabled, s.scope_type, s.cycles, s.cycles_retention, s.attributes, s.size, s.last_sync, \
     s.cycle_done, s.cycle_active, s.cycle_failed, s.secret, s.db_server_id, \
     d.name AS srv_name, d.dialect AS srv_dialect, d.host AS srv_host, \
     d.host_public AS srv_host_public, d.port AS srv_port, d.admin_user AS srv_admin_user, \
     d.admin_password AS srv_admin_password, d.args AS srv_args";

#[derive(FromRow)]
struct DbServerRow {
    id: i64,
    name: String,
    dialect: String,
    host: String,
    host_public: String,
    port: i32,
    admin_user: String,
    admin_password: String,
    args: String,
}

impl From<DbServerRow> for DbServer {
    fn from(r: DbServerRow) -> Self {
        DbServer {
            id: r.id as u64,
            name: r.name,
            dialect: r.dialect,
            host: r.host,
            host_public: r.host_public,
            port: r.port as u16,
            admin_user: r.admin_user,
            admin_password: r.admin_password,
            args: r.args,
        }
    }
}

#[derive(FromRow)]
struct ScopeRow {
    id: i64,
    name: String,
    db_name: String,
    group_id: i64,
    created_by: String,
    created_at: DateTime<Utc>,
    enabled: bool,
    scope_type: String,
    cycles: bool,
    cycles_retention: i32,
    attributes: serde_json::Value,
    size: i64,
    last_sync: Option<DateTime<Utc>>,
    cycle_done: f64,
    cycle_active: f64,
    cycle_failed: f64,
    secret: String,
    db_server_id: i64,
    srv_name: String,
    srv_dialect: String,
    srv_host: String,
    srv_host_public: String,
    srv_port: i32,
    srv_admin_user: String,
    srv_admin_password: String,
    srv_args: String,
}

impl From<ScopeRow> for ScanScope {
    fn from(r: ScopeRow) -> Self {
        let attributes: HashMap<String, String> =
            serde_json::from_value(r.attributes).unwrap_or_default();
        ScanScope {
            id: r.id as u64,
            name: r.name,
            db_name: r.db_name,
            group_id: r.group_id as u64,
            created_by: r.created_by,
            created_at: r.created_at,
            enabled: r.enabled,
            scope_type: ScopeType::parse(&r.scope_type),
            cycles: r.cycles,
            cycles_retention: r.cycles_retention,
            attributes,
            size: r.size as u64,
            last_sync: r.last_sync,
            cycle_done: r.cycle_done,
            cycle_active: r.cycle_active,
            cycle_failed: r.cycle_failed,
            secret: r.secret,
            db_server_id: r.db_server_id as u64,
            db_server: DbServer {
                id: r.db_server_id as u64,
                name: r.srv_name,
                dialect: r.srv_dialect,
                host: r.srv_host,
                host_public: r.srv_host_public,
                port: r.srv_port as u16,
                admin_user: r.srv_admin_user,
                admin_password: r.srv_admin_password,
                args: r.srv_args,
            },
        }
    }
}

#[derive(FromRow)]
struct ViewRow {
    id: i64,
    scope_id: i64,
    name: String,
    created_by: String,
    created_at: DateTime<Utc>,
    filters: serde_json::Value,
}

impl From<ViewRow> for ScopeView {
    fn from(r: ViewRow) -> Self {
        ScopeView {
            id: r.id as u64,
            scope_id: r.scope_id as u64,
            name: r.name,
            created_by: r.created_by,
            created_at: r.created_at,
            filters: serde_json::from_value(r.filters).unwrap_or_default(),
        }
    }
}

#[derive(FromRow)]
struct GrantRow {
    id: i64,
    view_id: i64,
    username: String,
    is_user: bool,
    description: String,
    created_by: String,
    expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<GrantRow> for Grant {
    fn from(r: GrantRow) -> Self {
        Grant {
            id: r.id as u64,
            view_id: r.view_id as u64,
            username: r.username,
            is_user: r.is_user,
            description: r.description,
            created_by: r.created_by,
            expires_at: r.expires_at,
            created_at: r.created_at,
        }
    }
}

#[derive(FromRow)]
struct AgentRow {
    id: i64,
    scope_id: i64,
    name: String,
    host: String,
    version: String,
    active_tasks: i32,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl From<AgentRow> for ScanAgent {
    fn from(r: AgentRow) -> Self {
        ScanAgent {
            id: r.id as u64,
            scope_id: r.scope_id as u64,
            name: r.name,
            host: r.host,
            version: r.version,
            active_tasks: r.active_tasks as u32,
            first_seen: r.first_seen,
            last_seen: r.last_seen,
        }
    }
}

#[derive(FromRow)]
struct SqlLogRow {
    id: i64,
    db_name: String,
    db_user: String,
    client_addr: String,
    query: String,
    logged_at: DateTime<Utc>,
}

impl From<SqlLogRow> for SqlLog {
    fn from(r: SqlLogRow) -> Self {
        SqlLog {
            id: r.id as u64,
            db_name: r.db_name,
            db_user: r.db_user,
            client_addr: r.client_addr,
            query: r.query,
            logged_at: r.logged_at,
        }
    }
}

/// Production catalog store over Postgres.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Connect to the catalog database and run schema auto-migration.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        info!(max_connections, "Catalog store connected");
        Ok(catalog)
    }

    async fn migrate(&self) -> Result<(), CatalogError> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "Catalog schema ensured");
        Ok(())
    }

    /// Close the underlying pool. Part of the shutdown sequence.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn attributes_json(attributes: &HashMap<String, String>) -> serde_json::Value {
        serde_json::to_value(attributes).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    // -------------------------------------------------------------------------
    // Database servers
    // -------------------------------------------------------------------------

    async fn save_db_server(&self, server: &DbServer) -> Result<u64, CatalogError> {
        if server.id == 0 {
            let row = sqlx::query(
                "INSERT INTO db_servers \
                 (name, dialect, host, host_public, port, admin_user, admin_password, args) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
            )
            .bind(&server.name)
            .bind(&server.dialect)
            .bind(&server.host)
            .bind(&server.host_public)
            .bind(i32::from(server.port))
            .bind(&server.admin_user)
            .bind(&server.admin_password)
            .bind(&server.args)
            .fetch_one(&self.pool)
            .await?;
            Ok(row.get::<i64, _>(0) as u64)
        } else {
            let result = sqlx::query(
                "UPDATE db_servers SET name = $2, dialect = $3, host = $4, host_public = $5, \
                 port = $6, admin_user = $7, admin_password = $8, args = $9 WHERE id = $1",
            )
            .bind(server.id as i64)
            .bind(&server.name)
            .bind(&server.dialect)
            .bind(&server.host)
            .bind(&server.host_public)
            .bind(i32::from(server.port))
            .bind(&server.admin_user)
            .bind(&server.admin_password)
            .bind(&server.args)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(CatalogError::NotFound);
            }
            Ok(server.id)
        }
    }

    async fn db_server(&self, id: u64) -> Result<Option<DbServer>, CatalogError> {
        let row = sqlx::query_as::<_, DbServerRow>("SELECT * FROM db_servers WHERE id = $1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(DbServer::from))
    }

    async fn db_servers(&self) -> Result<Vec<DbServer>, CatalogError> {
        let rows = sqlx::query_as::<_, DbServerRow>("SELECT * FROM db_servers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(DbServer::from).collect())
    }

    async fn delete_db_server(&self, id: u64) -> Result<(), CatalogError> {
        let referencing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM scopes WHERE db_server_id = $1")
                .bind(id as i64)
                .fetch_one(&self.pool)
                .await?;
        if referencing > 0 {
            return Err(CatalogError::InUse(format!(
                "db server {id} referenced by {referencing} scope(s)"
            )));
        }
        let result = sqlx::query("DELETE FROM db_servers WHERE id = $1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Scopes
    // -------------------------------------------------------------------------

    async fn insert_scope(&self, scope: &ScanScope) -> Result<u64, CatalogError> {
        let row = sqlx::query(
            "INSERT INTO scopes (name, db_name, group_id, created_by, created_at, enabled, \
             scope_type, cycles, cycles_retention, attributes, size, last_sync, cycle_done, \
             cycle_active, cycle_failed, secret, db_server_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17) \
             RETURNING id",
        )
        .bind(&scope.name)
        .bind(&scope.db_name)
        .bind(scope.group_id as i64)
        .bind(&scope.created_by)
        .bind(scope.created_at)
        .bind(scope.enabled)
        .bind(scope.scope_type.as_str())
        .bind(scope.cycles)
        .bind(scope.cycles_retention)
        .bind(Self::attributes_json(&scope.attributes))
        .bind(scope.size as i64)
        .bind(scope.last_sync)
        .bind(scope.cycle_done)
        .bind(scope.cycle_active)
        .bind(scope.cycle_failed)
        .bind(&scope.secret)
        .bind(scope.db_server_id as i64)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn scope(&self, id: u64) -> Result<Option<ScanScope>, CatalogError> {
        let sql = format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes s \
             JOIN db_servers d ON d.id = s.db_server_id WHERE s.id = $1"
        );
        let row = sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScanScope::from))
    }

    async fn scope_by_secret(&self, secret: &str) -> Result<Option<ScanScope>, CatalogError> {
        let sql = format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes s \
             JOIN db_servers d ON d.id = s.db_server_id WHERE s.secret = $1"
        );
        let row = sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(secret)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScanScope::from))
    }

    async fn scopes(&self) -> Result<Vec<ScanScope>, CatalogError> {
        let sql = format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes s \
             JOIN db_servers d ON d.id = s.db_server_id ORDER BY s.id"
        );
        let rows = sqlx::query_as::<_, ScopeRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ScanScope::from).collect())
    }

    async fn scopes_of(&self, group_ids: &[u64]) -> Result<Vec<ScanScope>, CatalogError> {
        let ids: Vec<i64> = group_ids.iter().map(|g| *g as i64).collect();
        let sql = format!(
            "SELECT {SCOPE_COLUMNS} FROM scopes s \
             JOIN db_servers d ON d.id = s.db_server_id \
             WHERE s.group_id = ANY($1) ORDER BY s.id"
        );
        let rows = sqlx::query_as::<_, ScopeRow>(&sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ScanScope::from).collect())
    }

    async fn scope_entry_ids(&self) -> Result<Vec<u64>, CatalogError> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM scopes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(|id| id as u64).collect())
    }

    async fn update_scope(&self, id: u64, changes: &ScopeChanges) -> Result<(), CatalogError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new("UPDATE scopes SET ");
        let mut fields = builder.separated(", ");
        if let Some(name) = &changes.name {
            fields.push("name = ").push_bind_unseparated(name);
        }
        if let Some(enabled) = changes.enabled {
            fields.push("enabled = ").push_bind_unseparated(enabled);
        }
        if let Some(cycles) = changes.cycles {
            fields.push("cycles = ").push_bind_unseparated(cycles);
        }
        if let Some(retention) = changes.cycles_retention {
            fields
                .push("cycles_retention = ")
                .push_bind_unseparated(retention);
        }
        if let Some(attributes) = &changes.attributes {
            fields
                .push("attributes = ")
                .push_bind_unseparated(Self::attributes_json(attributes));
        }
        if let Some(size) = changes.size {
            fields.push("size = ").push_bind_unseparated(size as i64);
        }
        if let Some(last_sync) = changes.last_sync {
            fields.push("last_sync = ").push_bind_unseparated(last_sync);
        }
        if let Some(ratios) = changes.ratios {
            fields
                .push("cycle_done = ")
                .push_bind_unseparated(ratios.done);
            fields
                .push("cycle_active = ")
                .push_bind_unseparated(ratios.active);
            fields
                .push("cycle_failed = ")
                .push_bind_unseparated(ratios.failed);
        }
        if let Some(secret) = &changes.secret {
            fields.push("secret = ").push_bind_unseparated(secret);
        }
        builder.push(" WHERE id = ").push_bind(id as i64);
        let result = builder.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    async fn delete_scope(&self, id: u64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM scopes WHERE id = $1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    async fn insert_view(&self, view: &ScopeView) -> Result<u64, CatalogError> {
        let row = sqlx::query(
            "INSERT INTO scope_views (scope_id, name, created_by, created_at, filters) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(view.scope_id as i64)
        .bind(&view.name)
        .bind(&view.created_by)
        .bind(view.created_at)
        .bind(serde_json::to_value(&view.filters).unwrap_or_else(|_| serde_json::json!({})))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn view(&self, id: u64) -> Result<Option<ScopeView>, CatalogError> {
        let row = sqlx::query_as::<_, ViewRow>("SELECT * FROM scope_views WHERE id = $1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScopeView::from))
    }

    async fn views(&self) -> Result<Vec<ScopeView>, CatalogError> {
        let rows = sqlx::query_as::<_, ViewRow>("SELECT * FROM scope_views ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ScopeView::from).collect())
    }

    async fn views_of(&self, scope_id: u64) -> Result<Vec<ScopeView>, CatalogError> {
        let rows = sqlx::query_as::<_, ViewRow>(
            "SELECT * FROM scope_views WHERE scope_id = $1 ORDER BY id",
        )
        .bind(scope_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScopeView::from).collect())
    }

    async fn views_granted(&self, username: &str) -> Result<Vec<ScopeView>, CatalogError> {
        let rows = sqlx::query_as::<_, ViewRow>(
            "SELECT v.id, v.scope_id, v.name, v.created_by, v.created_at, v.filters \
             FROM scope_views v JOIN view_grants g ON g.view_id = v.id \
             WHERE g.username = $1 ORDER BY v.id",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScopeView::from).collect())
    }

    async fn rename_view(&self, id: u64, name: &str) -> Result<(), CatalogError> {
        let result = sqlx::query("UPDATE scope_views SET name = $2 WHERE id = $1")
            .bind(id as i64)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    async fn delete_view(&self, id: u64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM scope_views WHERE id = $1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    async fn insert_grant(&self, grant: &Grant) -> Result<u64, CatalogError> {
        let row = sqlx::query(
            "INSERT INTO view_grants \
             (view_id, username, is_user, description, created_by, expires_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(grant.view_id as i64)
        .bind(&grant.username)
        .bind(grant.is_user)
        .bind(&grant.description)
        .bind(&grant.created_by)
        .bind(grant.expires_at)
        .bind(grant.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn grants_of_view(&self, view_id: u64) -> Result<Vec<Grant>, CatalogError> {
        let rows =
            sqlx::query_as::<_, GrantRow>("SELECT * FROM view_grants WHERE view_id = $1 ORDER BY id")
                .bind(view_id as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(Grant::from).collect())
    }

    async fn grant_by_username(&self, username: &str) -> Result<Option<Grant>, CatalogError> {
        let row = sqlx::query_as::<_, GrantRow>("SELECT * FROM view_grants WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Grant::from))
    }

    async fn delete_grant(&self, id: u64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM view_grants WHERE id = $1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
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
        sqlx::query(
            "INSERT INTO scan_agents \
             (scope_id, name, host, version, active_tasks, first_seen, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (scope_id, name) DO UPDATE SET \
             host = EXCLUDED.host, version = EXCLUDED.version, \
             active_tasks = EXCLUDED.active_tasks, last_seen = EXCLUDED.last_seen",
        )
        .bind(scope_id as i64)
        .bind(&report.name)
        .bind(&report.host)
        .bind(&report.version)
        .bind(report.active_tasks as i32)
        .bind(seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn agents(&self) -> Result<Vec<ScanAgent>, CatalogError> {
        let rows = sqlx::query_as::<_, AgentRow>("SELECT * FROM scan_agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ScanAgent::from).collect())
    }

    async fn delete_agent(&self, id: u64) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM scan_agents WHERE id = $1")
            .bind(id as i64)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound);
        }
        Ok(())
    }

    async fn delete_agents_of_scope(&self, scope_id: u64) -> Result<(), CatalogError> {
        sqlx::query("DELETE FROM scan_agents WHERE scope_id = $1")
            .bind(scope_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // SQL audit logs
    // -------------------------------------------------------------------------

    async fn insert_sql_log(&self, log: &SqlLog) -> Result<u64, CatalogError> {
        let row = sqlx::query(
            "INSERT INTO sql_logs (db_name, db_user, client_addr, query, logged_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(&log.db_name)
        .bind(&log.db_user)
        .bind(&log.client_addr)
        .bind(&log.query)
        .bind(log.logged_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    async fn sql_logs_since(
        &self,
        db_name: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<SqlLog>, CatalogError> {
        let rows = sqlx::query_as::<_, SqlLogRow>(
            "SELECT * FROM sql_logs WHERE db_name = $1 AND logged_at >= $2 ORDER BY id",
        )
        .bind(db_name)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SqlLog::from).collect())
    }

    // -------------------------------------------------------------------------
    // Scan settings
    // -------------------------------------------------------------------------

    async fn save_settings(
        &self,
        scope_id: u64,
        settings: &ScanSettings,
    ) -> Result<(), CatalogError> {
        let value = serde_json::to_value(settings)
            .map_err(|e| CatalogError::Transport(e.to_string()))?;
        sqlx::query(
            "INSERT INTO scope_settings (scope_id, settings) VALUES ($1, $2) \
             ON CONFLICT (scope_id) DO UPDATE SET settings = EXCLUDED.settings",
        )
        .bind(scope_id as i64)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn settings(&self, scope_id: u64) -> Result<Option<ScanSettings>, CatalogError> {
        let value: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT settings FROM scope_settings WHERE scope_id = $1")
                .bind(scope_id as i64)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    async fn delete_settings(&self, scope_id: u64) -> Result<(), CatalogError> {
        sqlx::query("DELETE FROM scope_settings WHERE scope_id = $1")
            .bind(scope_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
