//! # Notification Bus - Coalesced Scope-Change Fan-Out
//!
//! Single-producer/multi-consumer event coalescer. Mutating operations call
//! [`ScopeNotifier::send`] with a scope id; an internal task flushes the
//! accumulated batch once per tick to every subscriber parked in
//! [`ScopeNotifier::recv`].
//!
//! ## Contract
//!
//! - Duplicate ids within one flush window are de-duplicated by value.
//! - `recv` blocks until the next non-empty flush; a subscriber that missed
//!   flushes reconciles through the live-id set its caller attaches.
//! - Once [`ScopeNotifier::shutdown`] has run, every parked and future
//!   `recv` returns [`NotifyError::ShuttingDown`]; subscribers treat this
//!   as "re-subscribe later", not as a hard error.
//! - Id `0` is reserved: "live set changed, no specific id of interest".
//!
//! Stale waiters consume no CPU; they are parked on a broadcast channel.

pub mod notifier;

pub use notifier::{NotifyError, ScopeNotifier};

use std::time::Duration;

/// Default flush tick.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Maximum batches buffered per lagging subscriber before it must reconcile.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flush_interval() {
        assert_eq!(DEFAULT_FLUSH_INTERVAL, Duration::from_secs(1));
    }
}
