//! # Catalog Entities
//!
//! The records owned by the manager's catalog plus the per-scope target rows.
//!
//! ## Clusters
//!
//! - **Servers & Scopes**: `DbServer`, `ScanScope`
//! - **Access**: `ScopeView`, `Grant`, `UserCredential`
//! - **Targets & Progress**: `Target`, `ProgressCounts`, `CycleRatios`
//! - **Telemetry & Audit**: `ScanAgent`, `AgentReport`, `SqlLog`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// CLUSTER A: SERVERS & SCOPES
// =============================================================================

/// A reachable Postgres-compatible server hosting scope result databases.
///
/// The pair (host, port, admin_user) is unique. Deletion is refused while
/// any scope references the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DbServer {
    /// Catalog identity.
    pub id: u64,
    /// Human-readable server name.
    pub name: String,
    /// Dialect tag (e.g. "postgres"). Sensitive.
    pub dialect: String,
    /// Internal host the manager connects to. Sensitive.
    pub host: String,
    /// Public host handed out to granted database clients.
    pub host_public: String,
    /// TCP port.
    pub port: u16,
    /// Administrative role name. Sensitive.
    pub admin_user: String,
    /// Administrative credential. Sensitive.
    pub admin_password: String,
    /// Extra connection arguments appended to the DSN. Sensitive.
    pub args: String,
}

impl DbServer {
    /// The safe-family projection: sensitive connection details cleared.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            dialect: String::new(),
            host: String::new(),
            admin_user: String::new(),
            admin_password: String::new(),
            args: String::new(),
            ..self.clone()
        }
    }
}

/// The kind of scanning campaign a scope runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScopeType {
    /// Free-form target list.
    #[default]
    Custom,
    /// Network-range driven.
    Networks,
    /// Asset-inventory driven.
    Assets,
}

impl ScopeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::Custom => "custom",
            ScopeType::Networks => "networks",
            ScopeType::Assets => "assets",
        }
    }

    /// Parse a type tag; unknown tags fall back to `Custom`.
    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "networks" => ScopeType::Networks,
            "assets" => ScopeType::Assets,
            _ => ScopeType::Custom,
        }
    }
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured scanning campaign with its dedicated result database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScanScope {
    /// Catalog identity.
    pub id: u64,
    /// Human-readable scope name.
    pub name: String,
    /// Generated lowercase database name, globally unique on its server.
    pub db_name: String,
    /// Tenancy key of the owning group.
    pub group_id: u64,
    /// User who created the scope.
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// False while the scope is paused.
    pub enabled: bool,
    pub scope_type: ScopeType,
    /// Whether cycle accounting is active for this scope.
    pub cycles: bool,
    /// Number of prior cycles to retain; -1 keeps all, 0 is rejected.
    pub cycles_retention: i32,
    /// Arbitrary retention attributes.
    pub attributes: HashMap<String, String>,
    /// Total number of input addresses covered by all targets.
    pub size: u64,
    /// Completion time of the last target synchronization.
    pub last_sync: Option<DateTime<Utc>>,
    /// Share of targets finished this cycle, in [0,100], floored to 4 decimals.
    pub cycle_done: f64,
    /// Share of targets currently scanning.
    pub cycle_active: f64,
    /// Share of targets that failed.
    pub cycle_failed: f64,
    /// Opaque 64-char token identifying the scope to agents. Sensitive.
    pub secret: String,
    /// Owning database server.
    pub db_server_id: u64,
    /// Embedded server record (redacted or full, matching the scope shape).
    pub db_server: DbServer,
}

impl ScanScope {
    /// The safe-family projection: scope secret and server connection
    /// details cleared. Applied on every egress of the safe method family.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            secret: String::new(),
            db_server: self.db_server.redacted(),
            ..self.clone()
        }
    }
}

// =============================================================================
// CLUSTER B: VIEWS & GRANTS
// =============================================================================

/// Characters permitted in view filter values.
pub const FILTER_VALUE_CHARS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_./ ";

/// A named subset of a scope's results expressed as column-equality filters.
///
/// Filter values contain only characters from `[A-Za-z0-9-_./ ]`; the
/// wildcards `*` and `-` and empty strings are stripped prior to persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScopeView {
    pub id: u64,
    pub scope_id: u64,
    /// View name, unique within its scope.
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Column name to list of legal literal values.
    pub filters: HashMap<String, Vec<String>>,
}

/// Returns true when every character of `value` is filter-legal.
#[must_use]
pub fn filter_value_legal(value: &str) -> bool {
    value.chars().all(|c| FILTER_VALUE_CHARS.contains(c))
}

/// A per-view access right bound to a real user or an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Grant {
    pub id: u64,
    pub view_id: u64,
    /// Database role name; for tokens a generated opaque identifier.
    pub username: String,
    /// True for user grants, false for access tokens.
    pub is_user: bool,
    pub description: String,
    pub created_by: String,
    /// Token expiry; user grants carry none.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A user credential as supplied by the identity layer.
///
/// Only the pre-hashed SCRAM-SHA-256 verifier ever reaches the core;
/// cleartext passwords never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCredential {
    pub username: String,
    pub password_hash: String,
}

// =============================================================================
// CLUSTER C: TARGETS & PROGRESS
// =============================================================================

/// Scan state of a single input target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Queued for the current cycle.
    #[default]
    Pending,
    /// An agent is working on it.
    Running,
    /// Finished this cycle.
    Done,
    /// Gave up this cycle.
    Failed,
}

impl ScanStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Done => "done",
            ScanStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(tag: &str) -> Self {
        match tag {
            "running" => ScanStatus::Running,
            "done" => ScanStatus::Done,
            "failed" => ScanStatus::Failed,
            _ => ScanStatus::Pending,
        }
    }
}

/// One input specification living in a scope's result database.
///
/// The metadata columns are the ones view filters may reference. On target
/// submission the manager recomputes `input_size` and resets the scan state;
/// clients are untrusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Target {
    /// IP address, hostname, or CIDR range.
    pub input: String,
    /// Number of addresses covered by the input.
    pub input_size: u64,
    pub scan_status: ScanStatus,
    pub scan_started: Option<DateTime<Utc>>,
    pub scan_finished: Option<DateTime<Utc>>,
    pub country: String,
    pub location: String,
    pub routing_domain: String,
    pub zone: String,
    pub purpose: String,
    pub company: String,
    pub department: String,
    pub manager: String,
    pub contact: String,
    pub comment: String,
}

/// Result counts of one target synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncCounts {
    pub created: u64,
    pub removed: u64,
    pub updated: u64,
}

/// Raw per-scope progress totals read from the scope database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressCounts {
    pub total: u64,
    pub done: u64,
    pub active: u64,
    pub failed: u64,
}

/// Cycle progress ratios in [0,100], floored to 4 decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CycleRatios {
    pub done: f64,
    pub active: f64,
    pub failed: f64,
}

impl ProgressCounts {
    /// Compute the cycle ratios. An empty scope reports done=100 so the
    /// dashboard shows a completed (vacuous) cycle rather than a stuck one.
    #[must_use]
    pub fn ratios(&self) -> CycleRatios {
        if self.total == 0 {
            return CycleRatios {
                done: 100.0,
                active: 0.0,
                failed: 0.0,
            };
        }
        let total = self.total as f64;
        CycleRatios {
            done: floor4(self.done as f64 * 100.0 / total),
            active: floor4(self.active as f64 * 100.0 / total),
            failed: floor4(self.failed as f64 * 100.0 / total),
        }
    }
}

/// Floor a ratio to 4 decimal places (factor 10^4).
#[must_use]
pub fn floor4(value: f64) -> f64 {
    (value * 10_000.0).floor() / 10_000.0
}

// =============================================================================
// CLUSTER D: TELEMETRY & AUDIT
// =============================================================================

/// Last-seen telemetry for one worker attached to one scope.
///
/// Created on first report, never deleted by workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ScanAgent {
    pub id: u64,
    pub scope_id: u64,
    pub name: String,
    pub host: String,
    pub version: String,
    pub active_tasks: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// One telemetry report as submitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AgentReport {
    pub name: String,
    pub host: String,
    pub version: String,
    pub active_tasks: u32,
}

/// Audit record emitted by the wire-level query proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SqlLog {
    pub id: u64,
    /// Scope database the statement ran against.
    pub db_name: String,
    /// Role the proxy authenticated.
    pub db_user: String,
    pub client_addr: String,
    pub query: String,
    pub logged_at: DateTime<Utc>,
}
