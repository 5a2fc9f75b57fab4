//! Sled-backed persistent storage backend.
//!
//! This module provides the low-level key-value interface using sled, a
//! high-performance embedded database library:
//!
//! - **Memory efficiency**: configurable page cache instead of unbounded mmap
//! - **Write atomicity**: batch operations for multi-key commits
//! - **Read concurrency**: lock-free B+ tree allows reads without blocking writes
//!
//! The backend hosts a single `nodes` tree: one row per list node, keyed by
//! the node's 16 id bytes.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Backend storage errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Configuration for the backend storage.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    /// Path to the data directory where sled stores all files.
    pub data_dir: PathBuf,

    /// Maximum page cache size in megabytes. Controls memory usage.
    pub cache_size_mb: u64,

    /// Flush interval in milliseconds. How often sled flushes dirty pages to disk.
    pub flush_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            cache_size_mb: 64,
            flush_interval_ms: 1000,
        }
    }
}

/// The persistent storage backend using sled.
pub struct Backend {
    /// The sled database instance
    db: sled::Db,

    /// Node rows, keyed by node id bytes
    nodes_tree: sled::Tree,
}

impl Backend {
    /// Creates a new backend with the given configuration.
    ///
    /// If a database already exists at the data directory, it is opened.
    pub fn new(config: BackendConfig) -> BackendResult<Arc<Self>> {
        debug!("Initializing storage backend at {:?}", config.data_dir);

        std::fs::create_dir_all(&config.data_dir)?;

        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_size_mb * 1024 * 1024)
            .flush_every_ms(Some(config.flush_interval_ms))
            .open()
            .map_err(|e| {
                BackendError::ConfigError(format!("Failed to open sled database: {}", e))
            })?;

        let nodes_tree = db.open_tree("nodes")?;

        info!(
            "Storage backend initialized with cache_size={}MB, flush_interval={}ms",
            config.cache_size_mb, config.flush_interval_ms
        );

        Ok(Arc::new(Self { db, nodes_tree }))
    }

    /// Stores a node row.
    pub fn put(&self, key: &[u8], value: &[u8]) -> BackendResult<()> {
        self.nodes_tree.insert(key, value)?;
        Ok(())
    }

    /// Retrieves a node row by key.
    pub fn get(&self, key: &[u8]) -> BackendResult<Option<Vec<u8>>> {
        Ok(self.nodes_tree.get(key)?.map(|v| v.to_vec()))
    }

    /// Deletes a node row.
    pub fn delete(&self, key: &[u8]) -> BackendResult<()> {
        self.nodes_tree.remove(key)?;
        Ok(())
    }

    /// Applies a batch of writes atomically.
    pub fn apply_batch(&self, batch: sled::Batch) -> BackendResult<()> {
        self.nodes_tree.apply_batch(batch)?;
        Ok(())
    }

    /// Scans every node row in key order.
    pub fn scan(&self) -> BackendResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = Vec::new();
        for item in self.nodes_tree.iter() {
            let (k, v) = item?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    /// Returns the number of persisted node rows.
    pub fn len(&self) -> usize {
        self.nodes_tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_tree.is_empty()
    }

    /// Returns the approximate total size of the database in bytes.
    pub fn size(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> BackendResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
