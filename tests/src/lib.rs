//! # Scope Manager Test Suite
//!
//! End-to-end scenarios against the in-memory adapters plus a loopback
//! mutual-TLS transport check. Unit tests live beside the code they cover
//! in each crate; this crate exercises whole flows through the dispatcher
//! and the wire.

#[cfg(test)]
mod integration;

#[cfg(test)]
pub(crate) mod harness;
