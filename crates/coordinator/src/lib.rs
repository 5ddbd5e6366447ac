//! Coordinator - control plane for the table distribution engine
//!
//! Owns one [`Engine`], persists its committed catalog and exposes the
//! distribution operations over an HTTP admin API.
//!
//! # Usage Example
//! ```ignore
//! use coordinator::{Config, Coordinator};
//!
//! let coordinator = Arc::new(Coordinator::new(Config::default()).await?);
//! let _save = coordinator.clone().start_periodic_save();
//! let app = coordinator::api::HttpApi::new(coordinator).router();
//! ```

pub mod api;
pub mod config;
pub mod executor;
pub mod storage;

pub use config::{Config, ConfigError};
pub use executor::LoggingExecutor;
pub use storage::{FileStorage, StorageError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use dist_core::{Catalog, DistError, Engine, RemoteExecutor};

/// Failure of a coordinator operation
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Dist(#[from] DistError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The blocking engine task panicked or was cancelled
    #[error("engine task failed: {0}")]
    Task(String),
}

pub struct Coordinator {
    config: Config,
    storage: FileStorage,
    engine: Arc<Engine>,
    /// Catalog version last written to disk
    saved_version: AtomicU64,
    save_lock: Mutex<()>,
}

impl Coordinator {
    /// Load (or create) the catalog and start an engine that logs remote commands
    pub async fn new(config: Config) -> Result<Self, StorageError> {
        Self::with_executor(config, Arc::new(LoggingExecutor::new())).await
    }

    pub async fn with_executor(
        config: Config,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Result<Self, StorageError> {
        let storage = FileStorage::new(&config.storage.data_dir);
        let catalog = storage
            .load_or_create(&config.engine.cluster_name)
            .await?;
        let version = catalog.version;
        let engine = Arc::new(Engine::with_catalog(config.engine.clone(), catalog, executor));

        info!(
            "Coordinator initialized: cluster={}, data_dir={:?}",
            config.engine.cluster_name, config.storage.data_dir
        );

        Ok(Self {
            config,
            storage,
            engine,
            saved_version: AtomicU64::new(version),
            save_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Snapshot of the committed catalog
    pub fn catalog(&self) -> Catalog {
        self.engine.catalog()
    }

    /// Run an engine operation on the blocking pool, then persist the catalog.
    ///
    /// Engine operations may wait on the lock manager, so they never run on
    /// the async workers.
    pub async fn execute<T, F>(&self, op: F) -> Result<T, CoordinatorError>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> dist_core::Result<T> + Send + 'static,
    {
        let engine = self.engine.clone();
        let value = tokio::task::spawn_blocking(move || op(&engine))
            .await
            .map_err(|e| CoordinatorError::Task(e.to_string()))??;
        self.save().await?;
        Ok(value)
    }

    /// Write the catalog when it changed since the last save
    pub async fn save(&self) -> Result<(), StorageError> {
        let _guard = self.save_lock.lock().await;
        let catalog = self.engine.catalog();
        if catalog.version == self.saved_version.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.storage.save(&catalog).await?;
        self.saved_version.store(catalog.version, Ordering::SeqCst);
        Ok(())
    }

    /// Copy the catalog file aside
    pub async fn backup(&self) -> Result<std::path::PathBuf, StorageError> {
        self.save().await?;
        self.storage.backup().await
    }

    /// Start periodic save task
    pub fn start_periodic_save(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = self.config.storage.save_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(e) = self.save().await {
                    error!("Failed to save catalog: {}", e);
                }
            }
        })
    }
}
