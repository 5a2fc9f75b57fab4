//! Main server module that orchestrates all subsystems.
//!
//! This module coordinates the initialization and execution of:
//! - Persistent storage backend (sled-based node store)
//! - Transactional list store (optimistic concurrency control)
//! - Session hub (change fan-out to attached clients)
//! - gRPC session service

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tracing::{info, warn};

use crate::api::SessionService;
use crate::engine::retry::DEFAULT_MAX_ATTEMPTS;
use crate::hub::ListHub;
use crate::listdpb::list_session_server::ListSessionServer;
use crate::storage::backend::{Backend, BackendConfig};
use crate::storage::ListStore;

/// Main listd server that coordinates all subsystems.
pub struct ListdServer {
    config: ServerConfig,
    store: Arc<ListStore>,
    hub: Arc<ListHub>,
}

/// Configuration for the listd server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Human-readable name for this instance, used in logs.
    pub name: String,

    /// Path to the data directory.
    pub data_dir: PathBuf,

    /// List of URLs to listen on for client traffic.
    pub listen_client_urls: Vec<String>,

    /// Origins accepted on session attach. Empty allows every origin;
    /// `*` as an entry also allows every origin that presents one.
    pub allowed_origins: Vec<String>,

    /// Retry driver attempt budget per mutation.
    pub max_txn_retries: u32,

    /// Backend page cache size in megabytes.
    pub cache_size_mb: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            data_dir: PathBuf::from("default.listd"),
            listen_client_urls: vec!["http://localhost:4020".to_string()],
            allowed_origins: Vec::new(),
            max_txn_retries: DEFAULT_MAX_ATTEMPTS,
            cache_size_mb: 64,
        }
    }
}

impl ListdServer {
    /// Creates a new listd server instance with the given configuration.
    ///
    /// This initializes all subsystems:
    /// 1. Persistent storage backend
    /// 2. Transactional list store
    /// 3. Session hub for change notifications
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        info!(
            name = %config.name,
            data_dir = %config.data_dir.display(),
            "Initializing listd server"
        );

        let backend_config = BackendConfig {
            data_dir: config.data_dir.clone(),
            cache_size_mb: config.cache_size_mb,
            flush_interval_ms: 1000,
        };
        let backend = Backend::new(backend_config)
            .map_err(|e| anyhow::anyhow!("Failed to initialize backend: {}", e))?;
        info!("Backend storage initialized");

        let store = ListStore::new(backend);
        info!("List store initialized");

        let hub = ListHub::new();
        info!("Session hub initialized");

        Ok(Self { config, store, hub })
    }

    /// Runs the server, blocking until the shutdown signal resolves or an
    /// error occurs.
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> anyhow::Result<()> {
        let client_urls = parse_socket_addrs(&self.config.listen_client_urls)?;
        if client_urls.is_empty() {
            return Err(anyhow::anyhow!("No valid client URLs to listen on"));
        }

        // We use the first URL as the primary listener
        let addr = client_urls[0];

        info!(addr = %addr, "Starting gRPC server");

        let session_service = SessionService::new(
            self.store.clone(),
            self.hub.clone(),
            self.config.allowed_origins.clone(),
            self.config.max_txn_retries,
        );

        let server = Server::builder()
            .http2_keepalive_interval(Some(Duration::from_secs(10)))
            .http2_keepalive_timeout(Some(Duration::from_secs(20)))
            .add_service(ListSessionServer::new(session_service))
            .serve_with_shutdown(addr, shutdown);

        info!("listd server listening on {}", addr);
        info!("Data directory: {}", self.config.data_dir.display());
        info!("Instance name: {}", self.config.name);

        server.await?;

        info!("listd server shutting down");
        Ok(())
    }

    /// Get reference to the list store.
    pub fn store(&self) -> Arc<ListStore> {
        self.store.clone()
    }

    /// Get reference to the session hub.
    pub fn hub(&self) -> Arc<ListHub> {
        self.hub.clone()
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Parse listen URLs into socket addresses.
fn parse_socket_addrs(urls: &[String]) -> anyhow::Result<Vec<SocketAddr>> {
    let mut addrs = Vec::new();
    for url in urls {
        // Simple parser for http://host:port format
        let url_str = if let Some(stripped) = url.strip_prefix("http://") {
            stripped
        } else if let Some(stripped) = url.strip_prefix("https://") {
            stripped
        } else {
            url.as_str()
        };

        match url_str.to_socket_addrs() {
            Ok(mut iter) => {
                if let Some(addr) = iter.next() {
                    addrs.push(addr);
                }
            }
            Err(e) => {
                warn!(url = url, error = %e, "Failed to parse listen URL");
            }
        }
    }

    Ok(addrs)
}
