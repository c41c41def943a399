//! # Scan Settings
//!
//! The per-scope scan preset controlling agent concurrency, timeouts, and
//! protocol-specific exclusion lists. Defaults come from the manager
//! configuration; per-scope overrides are persisted in the catalog.

use chrono::Weekday;
use serde::{Deserialize, Serialize};

/// Scan-setting preset for one scope.
///
/// Workers receive this struct verbatim; the manager only validates and
/// stores it. Zero is rejected wherever a positive value is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    // Concurrency
    /// Maximum number of agents that may attach to the scope.
    pub agents_max: u32,
    /// Parallel tasks per agent.
    pub tasks_per_agent: u32,
    /// Hosts scanned concurrently within one task.
    pub hosts_concurrent: u32,
    /// Ports probed concurrently per host.
    pub ports_concurrent: u32,
    /// Targets handed to an agent per work request.
    pub batch_size: u32,

    // Timeouts and retries (seconds)
    pub timeout_connect_secs: u32,
    pub timeout_read_secs: u32,
    pub timeout_task_secs: u32,
    pub timeout_host_secs: u32,
    pub retry_limit: u32,
    pub retry_backoff_secs: u32,

    // Rate limiting
    /// Probe packets per second per agent; 0 disables the limit.
    pub rate_limit_pps: u32,
    /// Bandwidth ceiling in bytes per second per agent; 0 disables.
    pub rate_limit_bps: u64,

    // Discovery methods
    pub ping_icmp: bool,
    pub ping_tcp: bool,
    pub ping_udp: bool,
    pub lookup_ptr: bool,
    pub probe_banners: bool,
    pub probe_tls: bool,

    // Port selection
    /// TCP port expression, e.g. "1-1024,3306,5432".
    pub ports_tcp: String,
    /// UDP port expression.
    pub ports_udp: String,
    /// When non-zero, restrict to the N most common ports instead.
    pub ports_top: u32,

    // Exclusions
    /// Networks never probed, CIDR notation.
    pub excluded_networks: Vec<String>,
    pub excluded_ports_tcp: Vec<u16>,
    pub excluded_ports_udp: Vec<u16>,
    /// Protocol tags agents must skip (e.g. "smb", "rdp").
    pub excluded_protocols: Vec<String>,
    /// Weekdays on which no scanning happens.
    pub excluded_weekdays: Vec<Weekday>,
    /// Daily scan window, hours in [0,24]; equal bounds mean "always".
    pub scan_window_start_hour: u8,
    pub scan_window_end_hour: u8,

    // Application probes
    pub http_paths: Vec<String>,
    pub http_user_agent: String,
    pub snmp_communities: Vec<String>,
    pub smb_enabled: bool,
    pub ssh_enabled: bool,
    /// TLS versions offered during handshake probes.
    pub tls_versions: Vec<String>,

    // Result handling
    pub max_hosts_per_task: u32,
    pub result_ttl_days: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            agents_max: 4,
            tasks_per_agent: 8,
            hosts_concurrent: 64,
            ports_concurrent: 16,
            batch_size: 256,
            timeout_connect_secs: 5,
            timeout_read_secs: 10,
            timeout_task_secs: 3_600,
            timeout_host_secs: 600,
            retry_limit: 2,
            retry_backoff_secs: 30,
            rate_limit_pps: 1_000,
            rate_limit_bps: 0,
            ping_icmp: true,
            ping_tcp: true,
            ping_udp: false,
            lookup_ptr: true,
            probe_banners: true,
            probe_tls: true,
            ports_tcp: "1-1024,3306,5432,8080,8443".to_string(),
            ports_udp: "53,123,161,500".to_string(),
            ports_top: 0,
            excluded_networks: Vec::new(),
            excluded_ports_tcp: Vec::new(),
            excluded_ports_udp: Vec::new(),
            excluded_protocols: Vec::new(),
            excluded_weekdays: Vec::new(),
            scan_window_start_hour: 0,
            scan_window_end_hour: 0,
            http_paths: vec!["/".to_string()],
            http_user_agent: "scope-manager-agent".to_string(),
            snmp_communities: vec!["public".to_string()],
            smb_enabled: false,
            ssh_enabled: true,
            tls_versions: vec!["1.2".to_string(), "1.3".to_string()],
            max_hosts_per_task: 4_096,
            result_ttl_days: 365,
        }
    }
}

impl ScanSettings {
    /// Validate caller-supplied settings. Positive fields reject zero, hour
    /// bounds must stay within a day.
    pub fn validate(&self) -> Result<(), String> {
        macro_rules! positive {
            ($field:ident) => {
                if self.$field == 0 {
                    return Err(concat!(stringify!($field), " must be positive").to_string());
                }
            };
        }
        positive!(agents_max);
        positive!(tasks_per_agent);
        positive!(hosts_concurrent);
        positive!(ports_concurrent);
        positive!(batch_size);
        positive!(timeout_connect_secs);
        positive!(timeout_read_secs);
        positive!(timeout_task_secs);
        positive!(timeout_host_secs);
        positive!(max_hosts_per_task);
        positive!(result_ttl_days);

        if self.scan_window_start_hour > 24 || self.scan_window_end_hour > 24 {
            return Err("scan window hours must be within [0,24]".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ScanSettings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let settings = ScanSettings {
            hosts_concurrent: 0,
            ..ScanSettings::default()
        };
        let err = settings.validate().unwrap_err();
        assert!(err.contains("hosts_concurrent"));
    }

    #[test]
    fn test_out_of_range_window_rejected() {
        let settings = ScanSettings {
            scan_window_end_hour: 25,
            ..ScanSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_weekday_exclusions_serialize() {
        let settings = ScanSettings {
            excluded_weekdays: vec![Weekday::Sat, Weekday::Sun],
            ..ScanSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let back: ScanSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.excluded_weekdays, settings.excluded_weekdays);
    }
}
