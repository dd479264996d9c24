//! TCP accept loop
//!
//! Accepts connections, bounds how many are served at once and spawns one
//! task per connection, each with its own [`ServerSession`].

use anyhow::{Context, Result};
use common::{Connection, ServerSession, Timeouts, UsbBridge, serve_connection, wait_for_shutdown};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// TCP server for the RPC engine
pub struct RpcServer {
    listener: TcpListener,
    usb_bridge: UsbBridge,
    timeouts: Timeouts,
    sessions: Arc<Semaphore>,
}

impl RpcServer {
    /// Bind the listening socket
    pub async fn bind(
        addr: &str,
        usb_bridge: UsbBridge,
        timeouts: Timeouts,
        max_sessions: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            usb_bridge,
            timeouts,
            sessions: Arc::new(Semaphore::new(max_sessions.max(1))),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown
    ///
    /// A connection beyond `max_sessions` is accepted only once a running one
    /// has finished. Running connections see the same shutdown signal and are
    /// awaited before returning.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut connections = JoinSet::new();

        loop {
            let permit = tokio::select! {
                permit = self.sessions.clone().acquire_owned() => {
                    permit.context("Session limiter closed")?
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            let conn = self.prepare(stream, peer);
            let session = ServerSession::new(self.usb_bridge.clone());
            let shutdown = shutdown.clone();
            connections.spawn(async move {
                let _permit = permit;
                match serve_connection(conn, session, shutdown).await {
                    Ok(summary) => debug!("{} done after {} calls", peer, summary.calls),
                    Err(e) => error!("Connection from {} failed: {}", peer, e),
                }
            });

            // Reap finished connections
            while connections.try_join_next().is_some() {}
        }

        info!("Waiting for {} connection(s) to close", connections.len());
        while connections.join_next().await.is_some() {}
        Ok(())
    }

    /// Serve exactly one connection, then return
    pub async fn serve_one(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (stream, peer) = tokio::select! {
            accepted = self.listener.accept() => accepted.context("Accept failed")?,
            _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
        };

        let conn = self.prepare(stream, peer);
        let summary = serve_connection(conn, ServerSession::new(self.usb_bridge.clone()), shutdown)
            .await
            .with_context(|| format!("Connection from {} failed", peer))?;
        info!("{} done after {} calls", peer, summary.calls);
        Ok(())
    }

    fn prepare(&self, stream: TcpStream, peer: SocketAddr) -> Connection<TcpStream> {
        info!("Accepted connection from {}", peer);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }
        Connection::new(stream, self.timeouts)
    }
}
