//! # RPC Client
//!
//! The typed caller worker fleets link against. One request is in flight
//! per client at a time; transport failures surface as `RpcConnectivity`
//! so callers retry or re-subscribe.

use crate::codec::{read_message, write_message};
use rustls::pki_types::ServerName;
use shared_types::{
    ManagerError, ManagerResult, Request, Response, ScanScope, SyncCounts, Target,
};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;

enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Connection to the manager's RPC endpoint.
pub struct RpcClient {
    stream: Mutex<Stream>,
}

impl RpcClient {
    /// Connect without TLS (development mode).
    pub async fn connect_plain(addr: &str) -> ManagerResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| ManagerError::RpcConnectivity(e.to_string()))?;
        Ok(Self {
            stream: Mutex::new(Stream::Plain(stream)),
        })
    }

    /// Connect with mutual TLS. `server_name` must match the manager's
    /// certificate.
    pub async fn connect_tls(
        addr: &str,
        server_name: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> ManagerResult<Self> {
        let tcp = TcpStream::connect(addr)
            .await
            .map_err(|e| ManagerError::RpcConnectivity(e.to_string()))?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ManagerError::RpcConnectivity(e.to_string()))?;
        let stream = TlsConnector::from(config)
            .connect(name, tcp)
            .await
            .map_err(|e| ManagerError::RpcConnectivity(e.to_string()))?;
        Ok(Self {
            stream: Mutex::new(Stream::Tls(Box::new(stream))),
        })
    }

    /// Send one request and await its reply.
    pub async fn call(&self, request: Request) -> ManagerResult<Response> {
        let mut stream = self.stream.lock().await;
        let response = match &mut *stream {
            Stream::Plain(io) => round_trip(io, &request).await?,
            Stream::Tls(io) => round_trip(io.as_mut(), &request).await?,
        };
        match response {
            Some(Response::Error(err)) => Err(err.into_error()),
            Some(response) => Ok(response),
            None => Err(ManagerError::RpcConnectivity(
                "connection closed mid-call".into(),
            )),
        }
    }

    /// Long-poll the next notification batch.
    pub async fn subscribe_notification(&self) -> ManagerResult<(Vec<u64>, Vec<u64>)> {
        match self.call(Request::SubscribeNotification).await? {
            Response::Notification {
                update_scope_ids,
                remaining_scope_ids,
            } => Ok((update_scope_ids, remaining_scope_ids)),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch one scope (redacted).
    pub async fn get_scope(&self, id: u64) -> ManagerResult<ScanScope> {
        match self.call(Request::GetScope { id }).await? {
            Response::Scope(scope) => Ok(*scope),
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch the unredacted scope identified by its secret.
    pub async fn get_scope_full(
        &self,
        privilege_secret: &str,
        scope_secret: &str,
    ) -> ManagerResult<ScanScope> {
        let request = Request::GetScopeFull {
            privilege_secret: privilege_secret.to_string(),
            scope_secret: scope_secret.to_string(),
        };
        match self.call(request).await? {
            Response::Scope(scope) => Ok(*scope),
            other => Err(unexpected(&other)),
        }
    }

    /// Replace a scope's targets.
    pub async fn update_scope_targets(
        &self,
        id: u64,
        targets: Vec<Target>,
        blocking: bool,
    ) -> ManagerResult<SyncCounts> {
        let request = Request::UpdateScopeTargets {
            id,
            targets,
            blocking,
        };
        match self.call(request).await? {
            Response::SyncCounts(counts) => Ok(counts),
            other => Err(unexpected(&other)),
        }
    }

    /// Read a scope's targets.
    pub async fn get_scope_targets(&self, id: u64) -> ManagerResult<(bool, Vec<Target>)> {
        match self.call(Request::GetScopeTargets { id }).await? {
            Response::Targets {
                synchronizing,
                targets,
            } => Ok((synchronizing, targets)),
            other => Err(unexpected(&other)),
        }
    }
}

async fn round_trip<S>(io: &mut S, request: &Request) -> ManagerResult<Option<Response>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_message(io, request).await.map_err(ManagerError::from)?;
    read_message(io).await.map_err(ManagerError::from)
}

fn unexpected(response: &Response) -> ManagerError {
    ManagerError::internal(format!("unexpected response variant: {response:?}"))
}
