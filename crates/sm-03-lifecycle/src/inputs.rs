//! # Target Input Validation
//!
//! Each submitted input must parse as an IP address, a CIDR range, or a
//! hostname. Invalid and empty entries are dropped with a warning,
//! duplicates are collapsed, and `input_size` is always recomputed here;
//! clients are untrusted.

use ipnet::IpNet;
use shared_types::{ScanStatus, Target};
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::warn;

/// Number of addresses covered by one input, or `None` for garbage.
#[must_use]
pub fn input_size(input: &str) -> Option<u64> {
    if input.parse::<IpAddr>().is_ok() {
        return Some(1);
    }
    if let Ok(net) = input.parse::<IpNet>() {
        let host_bits = u32::from(net.max_prefix_len() - net.prefix_len());
        // A v6 range can exceed any counter; saturate rather than wrap.
        if host_bits >= u64::BITS {
            return Some(u64::MAX);
        }
        return Some(1u64 << host_bits);
    }
    if is_valid_hostname(input) {
        return Some(1);
    }
    None
}

/// RFC 1123 shape check: dot-separated alphanumeric labels, dashes inside.
fn is_valid_hostname(name: &str) -> bool {
    if name.is_empty() || name.len() > 253 {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Validate, deduplicate, and size a submitted target list.
///
/// Scan state is reset on every entry; the scope database preserves the
/// state of rows that already exist.
#[must_use]
pub fn normalize_targets(raw: &[Target]) -> Vec<Target> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::new();
    for target in raw {
        let input = target.input.trim();
        if input.is_empty() {
            warn!("Dropping empty target input");
            continue;
        }
        let Some(size) = input_size(input) else {
            warn!(input, "Dropping unparsable target input");
            continue;
        };
        if !seen.insert(input.to_string()) {
            continue;
        }
        let mut normalized = target.clone();
        normalized.input = input.to_string();
        normalized.input_size = size;
        normalized.scan_status = ScanStatus::Pending;
        normalized.scan_started = None;
        normalized.scan_finished = None;
        accepted.push(normalized);
    }
    accepted
}

/// Total address count of a normalized target list.
#[must_use]
pub fn total_size(targets: &[Target]) -> u64 {
    targets.iter().map(|t| t.input_size).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(input: &str) -> Target {
        Target {
            input: input.into(),
            ..Target::default()
        }
    }

    #[test]
    fn test_input_size_address() {
        assert_eq!(input_size("10.0.0.1"), Some(1));
        assert_eq!(input_size("2001:db8::1"), Some(1));
    }

    #[test]
    fn test_input_size_cidr() {
        assert_eq!(input_size("10.0.0.0/30"), Some(4));
        assert_eq!(input_size("10.0.0.0/24"), Some(256));
        assert_eq!(input_size("2001:db8::/126"), Some(4));
        assert_eq!(input_size("2001:db8::/32"), Some(u64::MAX));
    }

    #[test]
    fn test_input_size_hostname() {
        assert_eq!(input_size("db.example.com"), Some(1));
        assert_eq!(input_size("localhost"), Some(1));
    }

    #[test]
    fn test_input_size_garbage() {
        assert_eq!(input_size("bad input"), None);
        assert_eq!(input_size("-leading.dash"), None);
        assert_eq!(input_size("10.0.0.0/33"), None);
    }

    #[test]
    fn test_normalize_drops_and_dedups() {
        let raw = vec![
            target("10.0.0.0/30"),
            target("bad input"),
            target(""),
            target("10.0.0.0/30"),
        ];
        let accepted = normalize_targets(&raw);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].input_size, 4);
        assert_eq!(total_size(&accepted), 4);
    }

    #[test]
    fn test_normalize_resets_scan_state() {
        let mut submitted = target("10.0.0.1");
        submitted.scan_status = ScanStatus::Done;
        submitted.input_size = 9999;
        let accepted = normalize_targets(&[submitted]);
        assert_eq!(accepted[0].scan_status, ScanStatus::Pending);
        assert_eq!(accepted[0].input_size, 1);
    }
}
