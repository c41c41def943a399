//! # RPC Surface (sm-05)
//!
//! The manager's single authenticated endpoint: a typed request/reply
//! dispatcher over TLS with mutual-identity verification by certificate.
//!
//! ## Wire Protocol
//!
//! Each message is one bincode-serialized `Request`/`Response` enum inside
//! a u32 length-prefixed frame. The closed enum doubles as the serializer
//! registry; there is no runtime type registration to forget.
//!
//! ## Two Method Families
//!
//! Every safe-family response passes through the redaction projection
//! before egress: scope secrets and server connection details never leave
//! the process. The single sensitive method, `GetScopeFull`, is gated by a
//! constant-time privilege-secret membership check.
//!
//! ## Crate Structure
//!
//! - `codec` - Length-prefixed bincode framing
//! - `tls` - rustls server/client configuration from PEM files
//! - `dispatch` - The method dispatcher with request tagging
//! - `server` - Accept loop and per-connection tasks
//! - `client` - The typed caller used by worker fleets

pub mod client;
pub mod codec;
pub mod dispatch;
pub mod server;
pub mod tls;

pub use client::RpcClient;
pub use codec::{read_message, write_message, RpcError, MAX_FRAME_LEN};
pub use dispatch::Dispatcher;
pub use server::RpcServer;
pub use tls::{client_tls_config, server_tls_config, TlsFiles};

/// Default endpoint the manager listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:2222";
