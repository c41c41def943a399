//! # Catalog Store (sm-01)
//!
//! The authoritative catalog of database servers, scopes, views, grants,
//! agent telemetry, SQL audit logs, and per-scope scan settings.
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `ports` - The [`CatalogStore`] port trait and the named-column
//!   [`ScopeChanges`] update shape
//! - `adapters/postgres` - Production adapter over a sqlx Postgres pool
//!   with schema auto-migration
//! - `adapters/memory` - In-memory adapter mirroring the declarative
//!   constraints, used by unit and integration tests
//! - `errors` - The catalog error taxonomy
//!
//! ## Invariant Enforcement
//!
//! Uniqueness and referential integrity live in the database schema; the
//! store re-checks only what cannot be expressed declaratively (the
//! "server not in use" rule on [`CatalogStore::delete_db_server`]).
//! Secret-based lookups surface a miss as `Ok(None)`, never as an error,
//! so brute-force probing does not produce critical log noise.

pub mod adapters;
pub mod errors;
pub mod ports;

pub use adapters::memory::MemoryCatalog;
pub use adapters::postgres::PgCatalog;
pub use errors::CatalogError;
pub use ports::{CatalogStore, ScopeChanges};
