//! Whole-file JSON persistence for the record collection.

use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::models::Expediente;

/// Reads and overwrites a single pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored collection.
    ///
    /// A missing file is an empty collection. An unreadable or corrupt file
    /// is logged and also treated as empty.
    pub async fn load(&self) -> Vec<Expediente> {
        match self.try_load().await {
            Ok(Some(records)) => {
                tracing::info!(path = %self.path.display(), records = records.len(), "Loaded data file");
                records
            }
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "No data file yet, starting empty");
                Vec::new()
            }
            Err(e) => {
                tracing::error!(path = %self.path.display(), "Error loading data file: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_load(&self) -> Result<Option<Vec<Expediente>>, AppError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let records = serde_json::from_slice(&raw)
            .map_err(|e| AppError::Persistence(format!("Corrupt data file: {}", e)))?;
        Ok(Some(records))
    }

    /// Overwrite the stored collection.
    pub async fn save(&self, records: &[Expediente]) -> Result<(), AppError> {
        // Ensure the parent directory exists
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }

        let body = serde_json::to_vec_pretty(records)
            .map_err(|e| AppError::Internal(format!("Failed to encode records: {}", e)))?;
        tokio::fs::write(&self.path, body).await?;

        tracing::info!(path = %self.path.display(), records = records.len(), "Data saved");
        Ok(())
    }
}
