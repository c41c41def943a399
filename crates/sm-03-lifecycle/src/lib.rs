//! # Lifecycle Orchestrator (sm-03)
//!
//! Implements the cross-database operations of the manager: every scope
//! mutation touches the catalog, the target server's administrative
//! surface, and the scope's dedicated result database, and must stay
//! consistent under partial failure.
//!
//! ## Transactionality
//!
//! True two-phase commit is neither available nor required; failures after
//! the first side effect run compensating actions in reverse order (drop
//! the created database, delete the catalog row). Compensations that fail
//! themselves are logged at error and surface as internal errors requiring
//! operator reconciliation.
//!
//! ## Concurrency
//!
//! Long-running target synchronization is gated by a per-scope named
//! try-lock ([`locks::ScopeLocks`]): a second concurrent attempt fails
//! fast, and the target read-out reports `synchronizing` instead of stale
//! rows while the lock is held. Scope-DB preparation runs under a
//! single-holder gate the shutdown sequence waits on.
//!
//! ## Crate Structure
//!
//! - `service/` - The [`Orchestrator`] application service, one module per
//!   operation family (scopes, targets, grants, agents)
//! - `locks` - The keyed try-lock table
//! - `inputs` - Target input validation and server-side sizing
//! - `config` - Operational limits handed down from the runtime

pub mod config;
pub mod inputs;
pub mod locks;
pub mod service;

pub use config::LifecycleConfig;
pub use locks::{ScopeLockGuard, ScopeLocks};
pub use service::scopes::CreateScopeParams;
pub use service::Orchestrator;

/// Name of the default view every scope is born with.
pub const DEFAULT_VIEW_NAME: &str = "All";
