//! otalink server setup.
//!
//! This module wires the registry, dispatcher and OTA service into one
//! Axum application and serves it on a single listener for both device
//! WebSockets and admin HTTP requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use otalink_core::{DeviceStore, MemoryDeviceStore, OTA_CHUNK_SIZE};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::registry::DeviceRegistry;
use crate::routes::{create_router, AppState};
use crate::session::{OtaConfig, OtaService};

/// Configuration for the otalink server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name reported by `/health`.
    pub name: String,
    /// Server version reported by `/health`.
    pub version: String,
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Upper bound for one frame to be accepted by a device socket.
    pub send_timeout: Duration,
    /// Interval between PING probes on each device connection.
    pub keepalive_interval: Duration,
    /// Largest accepted firmware upload.
    pub max_image_bytes: usize,
    /// Frames that may queue on one connection before senders wait.
    pub link_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "otalink-server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            send_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            max_image_bytes: 16 * 1024 * 1024,
            link_capacity: 8,
        }
    }
}

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// The otalink device and admin server.
pub struct OtaServer {
    config: Arc<ServerConfig>,
    registry: Arc<DeviceRegistry>,
    store: Arc<dyn DeviceStore>,
}

impl OtaServer {
    /// Create a server that keeps device metadata in memory.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryDeviceStore::new()))
    }

    /// Create a server backed by the given device store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn DeviceStore>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(DeviceRegistry::new()),
            store,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    pub fn store(&self) -> Arc<dyn DeviceStore> {
        self.store.clone()
    }

    /// Shared handler state.
    pub fn state(&self) -> AppState {
        let ota = OtaService::new(
            self.registry.clone(),
            OtaConfig {
                chunk_size: OTA_CHUNK_SIZE,
                send_timeout: self.config.send_timeout,
            },
        );
        AppState {
            config: self.config.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            dispatcher: Dispatcher::new(self.registry.clone(), self.store.clone()),
            ota,
        }
    }

    /// Router with all device and admin routes.
    pub fn router(&self) -> Router {
        create_router(self.state())
    }

    /// Bind the configured address and serve until an error occurs.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        serve(listener, self.router()).await
    }
}

/// Serve `router` on `listener`, exposing peer addresses to handlers.
pub async fn serve(listener: TcpListener, router: Router) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("otalink server listening on {}", addr);
    }
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
