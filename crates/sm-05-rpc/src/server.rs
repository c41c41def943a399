//! # RPC Server
//!
//! Accept loop plus one task per connection. Requests on a connection are
//! handled sequentially; `SubscribeNotification` long-polls in place, which
//! gives each subscriber its expected at-most-one-outstanding call.

use crate::codec::{read_message, write_message, RpcError};
use crate::dispatch::Dispatcher;
use shared_types::Request;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// The manager's RPC endpoint.
pub struct RpcServer {
    listen_addr: String,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
}

impl RpcServer {
    #[must_use]
    pub fn new(
        listen_addr: String,
        tls: Option<Arc<rustls::ServerConfig>>,
        dispatcher: Arc<Dispatcher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            listen_addr,
            tls: tls.map(TlsAcceptor::from),
            dispatcher,
            shutdown,
        }
    }

    /// Bind and serve until the shutdown signal flips.
    ///
    /// New connections stop being accepted immediately on shutdown;
    /// parked subscribers are released by the notifier's own shutdown.
    pub async fn run(self) -> Result<(), RpcError> {
        let (_, serve) = self.bind().await?;
        serve.await;
        Ok(())
    }

    /// Bind eagerly and return the bound address together with the serve
    /// future. Tests use this to learn the ephemeral port.
    pub async fn bind(
        mut self,
    ) -> Result<(SocketAddr, impl std::future::Future<Output = ()>), RpcError> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, tls = self.tls.is_some(), "RPC endpoint listening");
        let serve = async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(error = %err, "Accept failed");
                                continue;
                            }
                        };
                        let dispatcher = Arc::clone(&self.dispatcher);
                        let tls = self.tls.clone();
                        let shutdown = self.shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, peer, tls, dispatcher, shutdown).await {
                                debug!(peer = %peer, error = %err, "Connection closed with error");
                            }
                        });
                    }
                    _ = self.shutdown.changed() => {
                        info!("RPC endpoint stopped accepting connections");
                        return;
                    }
                }
            }
        };
        Ok((local, serve))
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    tls: Option<TlsAcceptor>,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), RpcError> {
    debug!(peer = %peer, "Connection accepted");
    match tls {
        Some(acceptor) => {
            let stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| RpcError::Tls(e.to_string()))?;
            serve_stream(stream, dispatcher, shutdown).await
        }
        None => serve_stream(stream, dispatcher, shutdown).await,
    }
}

async fn serve_stream<S>(
    mut stream: S,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), RpcError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request: Option<Request> = tokio::select! {
            read = read_message(&mut stream) => read?,
            _ = shutdown.changed() => {
                debug!("Connection dropped by shutdown");
                return Ok(());
            }
        };
        let Some(request) = request else {
            return Ok(());
        };
        let response = dispatcher.handle(request).await;
        write_message(&mut stream, &response).await?;
    }
}
