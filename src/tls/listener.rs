//! actix-web listener used by the rotation supervisor.
//!
//! The TCP socket is bound once. Every certificate epoch hands a duplicate
//! of it to a fresh `HttpServer`, so stopping one epoch never closes the
//! listening socket and connections arriving mid-rotation wait in the
//! backlog for the next epoch.

use std::net::{TcpListener, ToSocketAddrs};
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::app_state::AppState;
use crate::service;
use crate::tls::supervisor::{EpochListener, ListenerError};
use crate::tls::TlsCredential;

/// Slack on top of the worker shutdown timeout before giving up on a drain
const DRAIN_SLACK: Duration = Duration::from_secs(5);

pub struct ActixListener {
    socket: TcpListener,
    state: web::Data<AppState>,
    workers: usize,
    drain_timeout: Duration,
}

impl ActixListener {
    /// Bind the listening socket for the configured address.
    pub fn bind(addr: impl ToSocketAddrs, state: AppState) -> std::io::Result<Self> {
        let socket = TcpListener::bind(addr)?;
        info!("Listening on {}", socket.local_addr()?);
        let workers = state.config.server.workers.max(1);
        let drain_timeout = state.config.server.shutdown_timeout();
        Ok(Self { socket, state: web::Data::new(state), workers, drain_timeout })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Start a server on a duplicate of the socket, with TLS when `tls` is set.
    fn start(&self, tls: Option<rustls::ServerConfig>) -> std::io::Result<Server> {
        let state = self.state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .wrap(Logger::default())
                .configure(service::configure)
        })
        .workers(self.workers)
        .disable_signals()
        .shutdown_timeout(self.drain_timeout.as_secs());

        let socket = self.socket.try_clone()?;
        let server = match tls {
            Some(config) => server.listen_rustls_0_23(socket, config)?,
            None => server.listen(socket)?,
        };
        Ok(server.run())
    }

    /// Run `server` until `epoch` is cancelled, then stop it gracefully.
    ///
    /// The drain is bounded by the server's own shutdown timeout plus a little
    /// slack, never by a cancellation token.
    async fn drive(&self, server: Server, epoch: CancellationToken) -> Result<(), ListenerError> {
        let handle = server.handle();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                // Signals are disabled, so the server only stops on request.
                return result.map_err(ListenerError::Fatal);
            }
            _ = epoch.cancelled() => {}
        }

        debug!("Stopping listener, draining for up to {:?}", self.drain_timeout);
        let drain = async {
            let (_, result) = tokio::join!(handle.stop(true), &mut server);
            result
        };
        match tokio::time::timeout(self.drain_timeout + DRAIN_SLACK, drain).await {
            Ok(Ok(())) => debug!("Listener drained"),
            Ok(Err(e)) => warn!("Listener reported an error while stopping: {}", e),
            Err(_) => warn!("Listener did not drain within {:?}", self.drain_timeout + DRAIN_SLACK),
        }
        Err(ListenerError::Cancelled)
    }

    /// Serve plain HTTP until `cancel` fires.
    pub async fn serve_plain(&self, cancel: CancellationToken) -> Result<(), ListenerError> {
        let server = self.start(None).map_err(ListenerError::Fatal)?;
        info!("Serving plain HTTP");
        match self.drive(server, cancel).await {
            Err(ListenerError::Cancelled) => Ok(()),
            other => other,
        }
    }
}

#[async_trait(?Send)]
impl EpochListener for ActixListener {
    async fn serve(&self, credential: TlsCredential, epoch: CancellationToken) -> Result<(), ListenerError> {
        let config = credential.server_config().map_err(ListenerError::InvalidCredential)?;
        let server = self.start(Some(config)).map_err(ListenerError::Fatal)?;
        self.drive(server, epoch).await
    }
}
