//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the store (loading the archive if there is one)
//! - Bind the listener
//! - Run until shutdown, drain handlers, then persist the store
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when the store is ready)
//! - Shutdown has a grace period; stragglers are abandoned after it

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::http::handler::HandlerContext;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};
use crate::store::{MemoryStore, StoreError};

/// Error type for startup and the final archive write.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("listener: {0}")]
    Listener(#[from] ListenerError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("archive task: {0}")]
    ArchiveTask(#[from] tokio::task::JoinError),
}

/// A fully initialized cache, ready to accept connections.
pub struct Server {
    listener: Listener,
    ctx: Arc<HandlerContext>,
    store: Arc<MemoryStore>,
    tracker: ConnectionTracker,
    shutdown: Shutdown,
    shutdown_rx: broadcast::Receiver<()>,
    grace: Duration,
}

impl Server {
    /// Initialize every subsystem from a validated config.
    pub async fn build(config: &ProxyConfig) -> Result<Self, StartupError> {
        let store = Arc::new(MemoryStore::open(&config.store)?);
        let tracker = ConnectionTracker::new();
        let ctx = Arc::new(HandlerContext::new(config, store.clone(), tracker.clone()));

        if let Some((host, port)) = &ctx.upstream {
            tracing::info!(proxy = %format!("{}:{}", host, port), "Forwarding through upstream proxy");
        }

        let listener = Listener::bind(&config.listener).await?;
        let shutdown = Shutdown::new();
        let shutdown_rx = shutdown.subscribe();

        Ok(Self {
            listener,
            ctx,
            store,
            tracker,
            shutdown,
            shutdown_rx,
            grace: config.timeouts.shutdown_grace(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Handle that stops [`Server::run`] when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn store(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.store)
    }

    /// Accept until shutdown, wait for in-flight handlers, save the archive.
    pub async fn run(self) -> Result<(), StartupError> {
        self.listener.run(Arc::clone(&self.ctx), self.shutdown_rx).await;

        tracing::info!(active = self.tracker.active_count(), "Draining connections");
        if !self.tracker.wait_for_idle(self.grace).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Grace period expired with connections still open"
            );
        }

        let store = Arc::clone(&self.store);
        let saved = tokio::task::spawn_blocking(move || store.save_archive()).await;
        self.store.close();
        saved??;
        tracing::info!("Shutdown complete");
        Ok(())
    }
}
