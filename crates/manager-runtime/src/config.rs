//! # Runtime Configuration
//!
//! Declared defaults plus environment overrides. File-based configuration
//! loading lives outside the core; operators set the handful of
//! environment variables below or link the library and build the struct
//! themselves.

use serde::{Deserialize, Serialize};
use shared_types::ScanSettings;
use sm_05_rpc::TlsFiles;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

/// Complete manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// RPC endpoint address.
    pub listen_addr: String,
    /// TLS configuration.
    pub tls: TlsSettings,
    /// Privilege secrets admitting callers to the sensitive read-out.
    pub privilege_secrets: Vec<String>,
    /// Catalog database settings.
    pub catalog: CatalogSettings,
    /// Connection ceiling per scope/admin database handle.
    pub scope_db_connections: u32,
    /// Connection limit stamped onto granted client roles.
    pub connections_client: i32,
    /// Validity window of user passwords, in days.
    pub password_expiry_days: i64,
    /// Maximum access-token lifetime, in days.
    pub token_expiry_days: i64,
    /// Scan-setting preset applied to new scopes.
    pub scope_defaults: ScanSettings,
    /// Log filter directive (tracing env-filter syntax).
    pub log_level: String,
}

/// TLS toggle plus key material locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
}

impl Default for TlsSettings {
    fn default() -> Self {
        let files = TlsFiles::default();
        Self {
            enabled: true,
            cert: files.cert,
            key: files.key,
            ca: files.ca,
        }
    }
}

impl TlsSettings {
    #[must_use]
    pub fn files(&self) -> TlsFiles {
        TlsFiles {
            cert: self.cert.clone(),
            key: self.key.clone(),
            ca: self.ca.clone(),
        }
    }
}

/// Catalog database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    pub url: String,
    pub max_connections: u32,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            url: "postgres://scope_manager@localhost:5432/scope_manager".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen_addr: sm_05_rpc::DEFAULT_LISTEN_ADDR.to_string(),
            tls: TlsSettings::default(),
            privilege_secrets: Vec::new(),
            catalog: CatalogSettings::default(),
            scope_db_connections: 5,
            connections_client: 3,
            password_expiry_days: 90,
            token_expiry_days: 365,
            scope_defaults: ScanSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ManagerConfig {
    /// Reject zero and negative values where positive ones are required.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("listen address must be set".into()));
        }
        if self.catalog.url.is_empty() {
            return Err(ConfigError::Invalid("catalog url must be set".into()));
        }
        if self.catalog.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "catalog max_connections must be positive".into(),
            ));
        }
        if self.scope_db_connections == 0 {
            return Err(ConfigError::Invalid(
                "scope_db_connections must be positive".into(),
            ));
        }
        if self.connections_client <= 0 {
            return Err(ConfigError::Invalid(
                "connections_client must be positive".into(),
            ));
        }
        if self.password_expiry_days <= 0 {
            return Err(ConfigError::Invalid(
                "password_expiry_days must be positive".into(),
            ));
        }
        if self.token_expiry_days <= 0 {
            return Err(ConfigError::Invalid(
                "token_expiry_days must be positive".into(),
            ));
        }
        self.scope_defaults
            .validate()
            .map_err(ConfigError::Invalid)?;
        Ok(())
    }

    /// Defaults overridden from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("SM_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("SM_CATALOG_URL") {
            config.catalog.url = url;
        }
        if let Ok(secrets) = std::env::var("SM_PRIVILEGE_SECRETS") {
            config.privilege_secrets = secrets
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(toggle) = std::env::var("SM_TLS") {
            config.tls.enabled = !matches!(toggle.as_str(), "0" | "off" | "false");
        }
        if let Ok(level) = std::env::var("SM_LOG") {
            config.log_level = level;
        }
        if config.privilege_secrets.is_empty() {
            warn!("No privilege secrets configured; sensitive read-out is unreachable");
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_default_listen_addr() {
        assert_eq!(ManagerConfig::default().listen_addr, "localhost:2222");
    }

    #[test]
    fn test_zero_values_rejected() {
        let mut config = ManagerConfig::default();
        config.catalog.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.connections_client = 0;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.token_expiry_days = -1;
        assert!(config.validate().is_err());
    }
}
