//! # Scope DB Broker (sm-02)
//!
//! Maintains a keyed pool of connections to (a) each known database server
//! (administrative handle) and (b) each live scope's result database.
//! Handles are lazy-opened on first request, cached, evicted on scope
//! deletion, and closed on shutdown.
//!
//! ## Per-Handle Responsibilities
//!
//! - **admin**: create/drop databases, set database comments, manage login
//!   roles (create, enable/disable, password, expiry, connection limit)
//! - **scope**: schema auto-migration, trigram indexes, revoking `PUBLIC`
//!   from schema `public`, target row synchronization, progress totals,
//!   SQL views with per-role `SELECT` grants
//!
//! ## Crate Structure
//!
//! - `ports` - The `AdminConn` / `ScopeConn` / `ConnFactory` traits
//! - `broker` - The keyed [`DbBroker`] pool
//! - `adapters/postgres` - Production sqlx adapters
//! - `adapters/memory` - The [`MemoryCluster`] fake used by orchestrator
//!   and integration tests

pub mod adapters;
pub mod broker;
pub mod errors;
pub mod ports;

pub use adapters::memory::MemoryCluster;
pub use adapters::postgres::PgConnFactory;
pub use broker::DbBroker;
pub use errors::BrokerError;
pub use ports::{AdminConn, ConnFactory, RoleCredential, ScopeConn};

/// Quote an identifier for interpolation into DDL.
///
/// Generated names never need quoting, but user-grant role names are email
/// addresses and always do. Embedded double quotes are stripped rather than
/// doubled; they are illegal in every identifier the manager accepts.
#[must_use]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', ""))
}

/// Quote a string literal for interpolation into DDL statements that do not
/// accept bind parameters (CREATE ROLE, ALTER ROLE).
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("abcdefghij"), "\"abcdefghij\"");
        assert_eq!(quote_ident("user@example.com"), "\"user@example.com\"");
        assert_eq!(quote_ident("a\"b"), "\"ab\"");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
    }
}
