//! # Postgres Broker Adapters
//!
//! Production implementations of the admin and scope handle ports.
//!
//! Administrative statements (CREATE DATABASE, CREATE ROLE, ...) accept no
//! bind parameters, so identifiers and literals are quoted explicitly; the
//! quoting helpers live in the crate root. Role credentials arrive either
//! as a manager-generated cleartext password or as a SCRAM-SHA-256
//! verifier, which Postgres stores verbatim.

use crate::errors::BrokerError;
use crate::ports::{sql_view_name, AdminConn, ConnFactory, RoleCredential, ScopeConn};
use crate::{quote_ident, quote_literal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared_types::{DbServer, ProgressCounts, ScanStatus, ScopeView, SyncCounts, Target};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Maintenance database used for administrative connections.
const ADMIN_DB: &str = "postgres";

/// Result tables of one scope database.
const SCOPE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS discovery_targets (
        id             BIGSERIAL PRIMARY KEY,
        input          TEXT NOT NULL UNIQUE,
        input_size     BIGINT NOT NULL DEFAULT 0,
        scan_status    TEXT NOT NULL DEFAULT 'pending',
        scan_started   TIMESTAMPTZ,
        scan_finished  TIMESTAMPTZ,
        country        TEXT NOT NULL DEFAULT '',
        location       TEXT NOT NULL DEFAULT '',
        routing_domain TEXT NOT NULL DEFAULT '',
        zone           TEXT NOT NULL DEFAULT '',
        purpose        TEXT NOT NULL DEFAULT '',
        company        TEXT NOT NULL DEFAULT '',
        department     TEXT NOT NULL DEFAULT '',
        manager        TEXT NOT NULL DEFAULT '',
        contact        TEXT NOT NULL DEFAULT '',
        comment        TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS discovery_results (
        id         BIGSERIAL PRIMARY KEY,
        cycle      INT NOT NULL,
        input      TEXT NOT NULL,
        address    TEXT NOT NULL,
        port       INT,
        protocol   TEXT NOT NULL DEFAULT '',
        service    TEXT NOT NULL DEFAULT '',
        banner     TEXT NOT NULL DEFAULT '',
        seen_at    TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE INDEX IF NOT EXISTS idx_results_cycle ON discovery_results (cycle)",
    "CREATE TABLE IF NOT EXISTS scan_cycle (
        id      INT PRIMARY KEY CHECK (id = 1),
        current INT NOT NULL
    )",
    "INSERT INTO scan_cycle (id, current) VALUES (1, 1) ON CONFLICT (id) DO NOTHING",
];

/// Text columns view filters may reference; each gets a trigram index.
pub const FILTER_COLUMNS: &[&str] = &[
    "country",
    "location",
    "routing_domain",
    "zone",
    "purpose",
    "company",
    "department",
    "manager",
    "contact",
    "comment",
];

/// Opens sqlx pools against a server's maintenance and scope databases.
pub struct PgConnFactory {
    max_connections: u32,
}

impl PgConnFactory {
    #[must_use]
    pub fn new(max_connections: u32) -> Self {
        Self { max_connections }
    }

    fn dsn(server: &DbServer, database: &str) -> String {
        let mut url = format!(
            "postgres://{}:{}@{}:{}/{}",
            server.admin_user, server.admin_password, server.host, server.port, database
        );
        if !server.args.is_empty() {
            url.push('?');
            url.push_str(&server.args);
        }
        url
    }

    async fn open(&self, server: &DbServer, database: &str) -> Result<PgPool, BrokerError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&Self::dsn(server, database))
            .await?;
        Ok(pool)
    }
}

#[async_trait]
impl ConnFactory for PgConnFactory {
    async fn admin(&self, server: &DbServer) -> Result<Arc<dyn AdminConn>, BrokerError> {
        let pool = self.open(server, ADMIN_DB).await?;
        Ok(Arc::new(PgAdminConn { pool }))
    }

    async fn scope(
        &self,
        server: &DbServer,
        db_name: &str,
    ) -> Result<Arc<dyn ScopeConn>, BrokerError> {
        let pool = self.open(server, db_name).await?;
        Ok(Arc::new(PgScopeConn { pool }))
    }
}

/// Administrative handle over the server's maintenance database.
pub struct PgAdminConn {
    pool: PgPool,
}

#[async_trait]
impl AdminConn for PgAdminConn {
    async fn create_database(&self, name: &str) -> Result<(), BrokerError> {
        sqlx::query(&format!("CREATE DATABASE {}", quote_ident(name)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<(), BrokerError> {
        sqlx::query(&format!("DROP DATABASE IF EXISTS {}", quote_ident(name)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_database_comment(&self, name: &str, comment: &str) -> Result<(), BrokerError> {
        sqlx::query(&format!(
            "COMMENT ON DATABASE {} IS {}",
            quote_ident(name),
            quote_literal(comment)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_login_role(
        &self,
        username: &str,
        credential: &RoleCredential,
        valid_until: Option<DateTime<Utc>>,
        connection_limit: i32,
    ) -> Result<(), BrokerError> {
        let mut ddl = format!(
            "CREATE ROLE {} LOGIN PASSWORD {} CONNECTION LIMIT {}",
            quote_ident(username),
            quote_literal(credential.as_password_literal()),
            connection_limit
        );
        if let Some(until) = valid_until {
            ddl.push_str(&format!(" VALID UNTIL {}", quote_literal(&until.to_rfc3339())));
        }
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn set_role_login(&self, username: &str, enabled: bool) -> Result<(), BrokerError> {
        let attribute = if enabled { "LOGIN" } else { "NOLOGIN" };
        sqlx::query(&format!(
            "ALTER ROLE {} {attribute}",
            quote_ident(username)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_role_password(
        &self,
        username: &str,
        credential: &RoleCredential,
        valid_until: Option<DateTime<Utc>>,
    ) -> Result<(), BrokerError> {
        let mut ddl = format!(
            "ALTER ROLE {} PASSWORD {}",
            quote_ident(username),
            quote_literal(credential.as_password_literal())
        );
        if let Some(until) = valid_until {
            ddl.push_str(&format!(" VALID UNTIL {}", quote_literal(&until.to_rfc3339())));
        }
        sqlx::query(&ddl).execute(&self.pool).await?;
        Ok(())
    }

    async fn role_exists(&self, username: &str) -> Result<bool, BrokerError> {
        let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM pg_roles WHERE rolname = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn drop_role(&self, username: &str) -> Result<(), BrokerError> {
        sqlx::query(&format!("DROP ROLE IF EXISTS {}", quote_ident(username)))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[derive(FromRow)]
struct TargetRow {
    input: String,
    input_size: i64,
    scan_status: String,
    scan_started: Option<DateTime<Utc>>,
    scan_finished: Option<DateTime<Utc>>,
    country: String,
    location: String,
    routing_domain: String,
    zone: String,
    purpose: String,
    company: String,
    department: String,
    manager: String,
    contact: String,
    comment: String,
}

impl From<TargetRow> for Target {
    fn from(r: TargetRow) -> Self {
        Target {
            input: r.input,
            input_size: r.input_size as u64,
            scan_status: ScanStatus::parse(&r.scan_status),
            scan_started: r.scan_started,
            scan_finished: r.scan_finished,
            country: r.country,
            location: r.location,
            routing_domain: r.routing_domain,
            zone: r.zone,
            purpose: r.purpose,
            company: r.company,
            department: r.department,
            manager: r.manager,
            contact: r.contact,
            comment: r.comment,
        }
    }
}

fn metadata_of(target: &Target) -> [&str; 10] {
    [
        &target.country,
        &target.location,
        &target.routing_domain,
        &target.zone,
        &target.purpose,
        &target.company,
        &target.department,
        &target.manager,
        &target.contact,
        &target.comment,
    ]
}

/// Handle to one scope's result database.
pub struct PgScopeConn {
    pool: PgPool,
}

#[async_trait]
impl ScopeConn for PgScopeConn {
    async fn revoke_public(&self) -> Result<(), BrokerError> {
        sqlx::query("REVOKE ALL ON SCHEMA public FROM PUBLIC")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn migrate(&self) -> Result<(), BrokerError> {
        for ddl in SCOPE_SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        debug!(statements = SCOPE_SCHEMA.len(), "Scope schema ensured");
        Ok(())
    }

    async fn install_trigram_indexes(&self) -> Result<(), BrokerError> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&self.pool)
            .await?;
        for column in FILTER_COLUMNS {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_targets_{column}_trgm \
                 ON discovery_targets USING gin ({column} gin_trgm_ops)"
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn targets(&self) -> Result<Vec<Target>, BrokerError> {
        let rows = sqlx::query_as::<_, TargetRow>(
            "SELECT input, input_size, scan_status, scan_started, scan_finished, country, \
             location, routing_domain, zone, purpose, company, department, manager, contact, \
             comment FROM discovery_targets ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Target::from).collect())
    }

    async fn sync_targets(&self, desired: &[Target]) -> Result<SyncCounts, BrokerError> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, TargetRow>(
            "SELECT input, input_size, scan_status, scan_started, scan_finished, country, \
             location, routing_domain, zone, purpose, company, department, manager, contact, \
             comment FROM discovery_targets",
        )
        .fetch_all(&mut *tx)
        .await?;
        let existing: HashMap<String, Target> = existing
            .into_iter()
            .map(Target::from)
            .map(|t| (t.input.clone(), t))
            .collect();

        let mut counts = SyncCounts::default();
        for target in desired {
            match existing.get(&target.input) {
                None => {
                    sqlx::query(
                        "INSERT INTO discovery_targets (input, input_size, country, location, \
                         routing_domain, zone, purpose, company, department, manager, contact, \
                         comment) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
                    )
                    .bind(&target.input)
                    .bind(target.input_size as i64)
                    .bind(&target.country)
                    .bind(&target.location)
                    .bind(&target.routing_domain)
                    .bind(&target.zone)
                    .bind(&target.purpose)
                    .bind(&target.company)
                    .bind(&target.department)
                    .bind(&target.manager)
                    .bind(&target.contact)
                    .bind(&target.comment)
                    .execute(&mut *tx)
                    .await?;
                    counts.created += 1;
                }
                Some(current)
                    if current.input_size != target.input_size
                        || metadata_of(current) != metadata_of(target) =>
                {
                    sqlx::query(
                        "UPDATE discovery_targets SET input_size = $2, country = $3, \
                         location = $4, routing_domain = $5, zone = $6, purpose = $7, \
                         company = $8, department = $9, manager = $10, contact = $11, \
                         comment = $12 WHERE input = $1",
                    )
                    .bind(&target.input)
                    .bind(target.input_size as i64)
                    .bind(&target.country)
                    .bind(&target.location)
                    .bind(&target.routing_domain)
                    .bind(&target.zone)
                    .bind(&target.purpose)
                    .bind(&target.company)
                    .bind(&target.department)
                    .bind(&target.manager)
                    .bind(&target.contact)
                    .bind(&target.comment)
                    .execute(&mut *tx)
                    .await?;
                    counts.updated += 1;
                }
                Some(_) => {}
            }
        }

        let desired_inputs: Vec<String> = desired.iter().map(|t| t.input.clone()).collect();
        let removed = sqlx::query("DELETE FROM discovery_targets WHERE input <> ALL($1)")
            .bind(&desired_inputs)
            .execute(&mut *tx)
            .await?;
        counts.removed = removed.rows_affected();

        tx.commit().await?;
        Ok(counts)
    }

    async fn reset_input(&self, input: &str) -> Result<(), BrokerError> {
        let result = sqlx::query(
            "UPDATE discovery_targets SET scan_status = 'pending', scan_started = NULL, \
             scan_finished = NULL WHERE input = $1",
        )
        .bind(input)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BrokerError::TargetMissing(input.to_string()));
        }
        Ok(())
    }

    async fn new_cycle(&self, retention: i32) -> Result<(), BrokerError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE discovery_targets SET scan_status = 'pending', scan_started = NULL, \
             scan_finished = NULL",
        )
        .execute(&mut *tx)
        .await?;
        let row = sqlx::query("UPDATE scan_cycle SET current = current + 1 WHERE id = 1 RETURNING current")
            .fetch_one(&mut *tx)
            .await?;
        let current: i32 = row.get(0);
        if retention >= 1 {
            sqlx::query("DELETE FROM discovery_results WHERE cycle <= $1")
                .bind(current - retention)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn progress_counts(&self) -> Result<ProgressCounts, BrokerError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, \
             COUNT(*) FILTER (WHERE scan_status = 'done') AS done, \
             COUNT(*) FILTER (WHERE scan_status = 'running') AS active, \
             COUNT(*) FILTER (WHERE scan_status = 'failed') AS failed \
             FROM discovery_targets",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(ProgressCounts {
            total: row.get::<i64, _>("total") as u64,
            done: row.get::<i64, _>("done") as u64,
            active: row.get::<i64, _>("active") as u64,
            failed: row.get::<i64, _>("failed") as u64,
        })
    }

    async fn ensure_view(&self, view: &ScopeView) -> Result<(), BrokerError> {
        let mut clauses = Vec::new();
        for column in FILTER_COLUMNS {
            let Some(values) = view.filters.get(*column) else {
                continue;
            };
            if values.is_empty() {
                continue;
            }
            let list: Vec<String> = values.iter().map(|v| quote_literal(v)).collect();
            clauses.push(format!("{column} IN ({})", list.join(", ")));
        }
        let predicate = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        sqlx::query(&format!(
            "CREATE OR REPLACE VIEW {} AS SELECT input, input_size, scan_status, scan_started, \
             scan_finished, country, location, routing_domain, zone, purpose, company, \
             department, manager, contact, comment FROM discovery_targets{predicate}",
            quote_ident(&sql_view_name(&view.name))
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn drop_view(&self, view_name: &str) -> Result<(), BrokerError> {
        sqlx::query(&format!(
            "DROP VIEW IF EXISTS {}",
            quote_ident(&sql_view_name(view_name))
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn grant_view_select(
        &self,
        username: &str,
        view_name: &str,
    ) -> Result<(), BrokerError> {
        // Schema usage is revoked from PUBLIC at creation, so every granted
        // role needs it back explicitly.
        sqlx::query(&format!(
            "GRANT USAGE ON SCHEMA public TO {}",
            quote_ident(username)
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "GRANT SELECT ON {} TO {}",
            quote_ident(&sql_view_name(view_name)),
            quote_ident(username)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_view_select(
        &self,
        username: &str,
        view_name: &str,
    ) -> Result<(), BrokerError> {
        sqlx::query(&format!(
            "REVOKE SELECT ON {} FROM {}",
            quote_ident(&sql_view_name(view_name)),
            quote_ident(username)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_role(&self, username: &str) -> Result<(), BrokerError> {
        sqlx::query(&format!(
            "REVOKE ALL PRIVILEGES ON ALL TABLES IN SCHEMA public FROM {}",
            quote_ident(username)
        ))
        .execute(&self.pool)
        .await?;
        sqlx::query(&format!(
            "REVOKE USAGE ON SCHEMA public FROM {}",
            quote_ident(username)
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
