//! # RPC Message Types
//!
//! The typed request/reply pairs crossing the manager's RPC channel. The
//! closed enums double as the serializer registry: every payload type a
//! caller may transmit is a variant field here and nowhere else.
//!
//! Payloads are serialized with bincode inside a length-prefixed frame; see
//! the RPC surface crate for the codec.

use crate::entities::{
    AgentReport, DbServer, Grant, ScanAgent, ScanScope, ScopeView, SqlLog, SyncCounts, Target,
    UserCredential,
};
use crate::errors::{ErrorKind, ManagerError};
use crate::settings::ScanSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A request as sent by workers, proxies, the importer, or the web backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // Notifications
    SubscribeNotification,

    // Scope read-out
    GetScope { id: u64 },
    GetScopes,
    GetScopesOf { group_ids: Vec<u64> },
    GetScopeFull { privilege_secret: String, scope_secret: String },

    // Scope lifecycle
    CreateScope {
        db_server_id: u64,
        name: String,
        group_id: u64,
        created_by: String,
        scope_type: String,
        cycles: bool,
        cycles_retention: i32,
        attributes: HashMap<String, String>,
    },
    DeleteScope { id: u64 },
    ToggleScope { id: u64 },
    UpdateScope {
        id: u64,
        name: String,
        cycles: bool,
        cycles_retention: i32,
        attributes: Option<HashMap<String, String>>,
    },
    NewCycle { id: u64 },
    ResetSecret { id: u64 },
    UpdateSettings { id: u64, settings: ScanSettings },

    // Targets
    GetScopeTargets { id: u64 },
    UpdateScopeTargets { id: u64, targets: Vec<Target>, blocking: bool },
    ResetInput { scope_id: u64, input: String },

    // Views
    GetViews,
    GetViewsOf { scope_id: u64 },
    GetViewsGranted { username: String },
    GetView { id: u64 },
    CreateView {
        scope_id: u64,
        name: String,
        created_by: String,
        filters: HashMap<String, Vec<String>>,
    },
    UpdateView { id: u64, name: String },
    DeleteView { id: u64 },

    // Grants
    GetGrantsOf { view_id: u64 },
    GrantToken {
        view_id: u64,
        description: String,
        created_by: String,
        expires_at: DateTime<Utc>,
    },
    GrantUsers {
        view_id: u64,
        credentials: Vec<UserCredential>,
        granted_by: String,
    },
    RevokeGrants { view_id: u64, usernames: Vec<String> },
    UpdateServerCredentials { username: String, password_hash: String },
    DisableDbCredentials { username: String },
    EnableDbCredentials { username: String },

    // Database servers
    GetDbServers,
    SaveDbServer { server: DbServer },
    DeleteDbServer { id: u64 },

    // Agents & audit
    UpdateAgents { stats: HashMap<u64, Vec<AgentReport>> },
    GetAgents,
    DeleteAgent { id: u64 },
    CreateSqlLog {
        db_name: String,
        db_user: String,
        client_addr: String,
        query: String,
    },
    GetSqlLogs { db_name: String, since: DateTime<Utc> },
}

impl Request {
    /// Method name used for request logging.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Request::SubscribeNotification => "SubscribeNotification",
            Request::GetScope { .. } => "GetScope",
            Request::GetScopes => "GetScopes",
            Request::GetScopesOf { .. } => "GetScopesOf",
            Request::GetScopeFull { .. } => "GetScopeFull",
            Request::CreateScope { .. } => "CreateScope",
            Request::DeleteScope { .. } => "DeleteScope",
            Request::ToggleScope { .. } => "ToggleScope",
            Request::UpdateScope { .. } => "UpdateScope",
            Request::NewCycle { .. } => "NewCycle",
            Request::ResetSecret { .. } => "ResetSecret",
            Request::UpdateSettings { .. } => "UpdateSettings",
            Request::GetScopeTargets { .. } => "GetScopeTargets",
            Request::UpdateScopeTargets { .. } => "UpdateScopeTargets",
            Request::ResetInput { .. } => "ResetInput",
            Request::GetViews => "GetViews",
            Request::GetViewsOf { .. } => "GetViewsOf",
            Request::GetViewsGranted { .. } => "GetViewsGranted",
            Request::GetView { .. } => "GetView",
            Request::CreateView { .. } => "CreateView",
            Request::UpdateView { .. } => "UpdateView",
            Request::DeleteView { .. } => "DeleteView",
            Request::GetGrantsOf { .. } => "GetGrantsOf",
            Request::GrantToken { .. } => "GrantToken",
            Request::GrantUsers { .. } => "GrantUsers",
            Request::RevokeGrants { .. } => "RevokeGrants",
            Request::UpdateServerCredentials { .. } => "UpdateServerCredentials",
            Request::DisableDbCredentials { .. } => "DisableDbCredentials",
            Request::EnableDbCredentials { .. } => "EnableDbCredentials",
            Request::GetDbServers => "GetDbServers",
            Request::SaveDbServer { .. } => "SaveDbServer",
            Request::DeleteDbServer { .. } => "DeleteDbServer",
            Request::UpdateAgents { .. } => "UpdateAgents",
            Request::GetAgents => "GetAgents",
            Request::DeleteAgent { .. } => "DeleteAgent",
            Request::CreateSqlLog { .. } => "CreateSqlLog",
            Request::GetSqlLogs { .. } => "GetSqlLogs",
        }
    }
}

/// A reply as produced by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// The operation failed; see the carried kind and message.
    Error(WireError),
    /// Success without a payload.
    Ack,
    /// A newly assigned or affected catalog id.
    Id(u64),
    /// A single scope, redacted unless produced by the sensitive read-out.
    Scope(Box<ScanScope>),
    Scopes(Vec<ScanScope>),
    /// A coalesced notification batch plus the current live scope-id set.
    Notification {
        update_scope_ids: Vec<u64>,
        remaining_scope_ids: Vec<u64>,
    },
    /// Target read-out; `synchronizing` set while a sync holds the lock.
    Targets {
        synchronizing: bool,
        targets: Vec<Target>,
    },
    SyncCounts(SyncCounts),
    /// A freshly rotated scope secret, disclosed exactly once.
    Secret(String),
    /// Token credentials, disclosed exactly once.
    Credentials { username: String, password: String },
    View(ScopeView),
    Views(Vec<ScopeView>),
    Grants(Vec<Grant>),
    DbServers(Vec<DbServer>),
    Agents(Vec<ScanAgent>),
    SqlLogs(Vec<SqlLog>),
}

/// Error shape crossing the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<ManagerError> for WireError {
    fn from(err: ManagerError) -> Self {
        WireError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl WireError {
    /// Re-materialize the manager error on the client side.
    ///
    /// Conflict and transient kinds map back onto their well-known variants
    /// by message; anything unrecognized degrades to `Internal`.
    #[must_use]
    pub fn into_error(self) -> ManagerError {
        match self.kind {
            ErrorKind::NotFound => ManagerError::RecordNotFound,
            ErrorKind::Unauthorized => ManagerError::InvalidPrivilege,
            ErrorKind::InvalidArgument => ManagerError::InvalidArgument(self.message),
            ErrorKind::Conflict => match self.message.as_str() {
                "view name already existing" => ManagerError::ViewNameExisting,
                "scope update already ongoing" => ManagerError::ScopeUpdateOngoing,
                "database server still in use" => ManagerError::DatabaseInUse,
                "database already existing" => ManagerError::DatabaseDuplicate,
                other => ManagerError::Internal(other.to_string()),
            },
            ErrorKind::Transient => match self.message.as_str() {
                "notifier shutting down" => ManagerError::NotifierShuttingDown,
                other => ManagerError::RpcConnectivity(other.to_string()),
            },
            ErrorKind::Internal => ManagerError::Internal(self.message),
        }
    }
}
