//! Operational limits handed down from the runtime configuration.

use chrono::Duration;
use shared_types::ScanSettings;

/// Limits and defaults the orchestrator enforces.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Maximum lifetime of an access token.
    pub token_expiry_max: Duration,
    /// Validity window applied on every user-password update.
    pub password_expiry: Duration,
    /// Connection limit stamped onto granted database roles.
    pub connections_client: i32,
    /// Scan-setting preset applied to newly created scopes.
    pub default_settings: ScanSettings,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            token_expiry_max: Duration::days(365),
            password_expiry: Duration::days(90),
            connections_client: 3,
            default_settings: ScanSettings::default(),
        }
    }
}
