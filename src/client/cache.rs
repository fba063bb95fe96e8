//! Client-local cache of the last known collection.

use std::path::{Path, PathBuf};

use crate::errors::AppError;
use crate::models::Expediente;

/// File name of the cache under the client's cache directory.
pub const CACHE_KEY: &str = "expedientes.json";

/// A single cached full collection, overwritten on every inbound sync.
#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache stored under the well-known key inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(CACHE_KEY))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Cold-start seed. Missing or unreadable caches give an empty collection.
    pub async fn load(&self) -> Vec<Expediente> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Error reading cache: {}", e);
                return Vec::new();
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Discarding corrupt cache: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn store(&self, records: &[Expediente]) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let body = serde_json::to_vec(records)
            .map_err(|e| AppError::Internal(format!("Failed to encode cache: {}", e)))?;
        tokio::fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AreaTracking;
    use tempfile::TempDir;

    fn record(id: &str) -> Expediente {
        Expediente {
            id: id.to_string(),
            numero: id.to_string(),
            asunto: String::new(),
            tracking: AreaTracking::Multi {
                area_servicio: Vec::new(),
            },
            fecha_inicio: "2024-01-01".to_string(),
            fecha_vencimiento: String::new(),
            observacion: String::new(),
            created_at: 5,
        }
    }

    #[tokio::test]
    async fn test_cache_round_trip_under_key() {
        let temp_dir = TempDir::new().unwrap();
        let cache = LocalCache::in_dir(temp_dir.path());
        assert!(cache.path().ends_with(CACHE_KEY));

        cache.store(&[record("a"), record("b")]).await.unwrap();
        cache.store(&[record("c")]).await.unwrap();

        let loaded = cache.load().await;
        assert_eq!(loaded, vec![record("c")]);
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_cache_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let cache = LocalCache::in_dir(temp_dir.path());
        assert!(cache.load().await.is_empty());

        std::fs::write(cache.path(), b"[{").unwrap();
        assert!(cache.load().await.is_empty());
    }
}
