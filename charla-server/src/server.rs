//! Listener, dispatcher, and shutdown coordination.
//!
//! One accept loop, one spawned task per connection. The shutdown token
//! is the single cancellation signal: the accept loop selects on it, and
//! every connection task observes the same token. Shutdown order is stop
//! accepting → close every registered session → release the listening
//! socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::connection;
use crate::registry::Registry;

pub struct Server {
    config: ServerConfig,
    registry: Arc<Registry>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// The token observed by the accept loop and every connection task.
    /// Cancelling it is the shutdown signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Run the server until the shutdown token fires or the listener
    /// fails. A failed accept is fatal to the whole server; a failed
    /// connection is not.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        tracing::info!("listening on {}", self.config.listen_addr);
        self.accept_loop(listener).await
    }

    /// Bind and return the local address together with the running server
    /// task. Entry point for tests, which bind port 0.
    pub async fn start(self) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.listen_addr))?;
        let addr = listener.local_addr()?;
        tracing::info!("listening on {addr}");
        let handle = tokio::spawn(async move { self.accept_loop(listener).await });
        Ok((addr, handle))
    }

    async fn accept_loop(self, listener: TcpListener) -> Result<()> {
        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    break Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let registry = Arc::clone(&self.registry);
                            let shutdown = self.shutdown.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    connection::handle(stream, registry, shutdown).await
                                {
                                    tracing::error!("connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept failed: {e}");
                            break Err(e).context("accept failed");
                        }
                    }
                }
            }
        };

        // Stop admitting (the token also wakes every receive loop), close
        // whatever is still registered, then release the socket.
        self.shutdown.cancel();
        for session in self.registry.snapshot() {
            connection::close(&session, &self.registry);
        }
        drop(listener);
        result
    }
}
