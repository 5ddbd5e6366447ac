//! File persistent storage
//!
//! Persists the committed catalog as JSON in the data directory

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use dist_core::Catalog;

const CATALOG_FILE: &str = "catalog.json";

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

/// Catalog file in a data directory
pub struct FileStorage {
    data_dir: PathBuf,
    catalog_path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        let data_dir = data_dir.as_ref().to_path_buf();
        let catalog_path = data_dir.join(CATALOG_FILE);
        Self {
            data_dir,
            catalog_path,
        }
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    /// Ensure data directory exists
    pub async fn ensure_dir(&self) -> Result<(), StorageError> {
        if !self.data_dir.exists() {
            fs::create_dir_all(&self.data_dir).await?;
            info!("Created data directory: {:?}", self.data_dir);
        }
        Ok(())
    }

    /// Load the catalog, None when nothing was saved yet
    pub async fn load(&self) -> Result<Option<Catalog>, StorageError> {
        if !self.catalog_path.exists() {
            info!("Catalog file not found, will create a new cluster");
            return Ok(None);
        }

        let content = fs::read_to_string(&self.catalog_path).await?;
        let catalog: Catalog = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let stats = catalog.stats();
        info!(
            "Loaded catalog '{}': {} nodes, {} distributed tables, {} shards, version {}",
            catalog.name, stats.total_nodes, stats.distributed_tables, stats.total_shards, stats.version
        );
        Ok(Some(catalog))
    }

    /// Write the catalog to a temp file, then rename it into place
    pub async fn save(&self, catalog: &Catalog) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let temp_path = self.catalog_path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(catalog)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &self.catalog_path).await?;

        debug!("Saved catalog version {}", catalog.version);
        Ok(())
    }

    pub async fn load_or_create(&self, cluster_name: &str) -> Result<Catalog, StorageError> {
        match self.load().await? {
            Some(catalog) => Ok(catalog),
            None => {
                let catalog = Catalog::new(cluster_name);
                self.save(&catalog).await?;
                info!("Created new cluster '{}'", cluster_name);
                Ok(catalog)
            }
        }
    }

    /// Copy the current catalog file next to it with a timestamp
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        if !self.catalog_path.exists() {
            return Err(StorageError::NotFound(self.catalog_path.clone()));
        }

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = self.data_dir.join(format!("catalog_{}.json.bak", timestamp));

        fs::copy(&self.catalog_path, &backup_path).await?;
        info!("Backed up catalog to {:?}", backup_path);

        Ok(backup_path)
    }
}
