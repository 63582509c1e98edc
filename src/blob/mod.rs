// Blob store module
// Fetches raw document bytes for the pipeline's downloading stage.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{PipelineError, Result};

/// Read access to stored document bytes, keyed by an opaque string.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Blob store over a root directory; keys are relative paths.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Keys must stay inside the root directory.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if key.is_empty() || escapes {
            return Err(PipelineError::Blob(format!("invalid blob key '{key}'")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        debug!("Reading blob '{}' from {}", key, path.display());

        tokio::fs::read(&path)
            .await
            .map_err(|error| PipelineError::Blob(format!("failed to read blob '{key}': {error}")))
    }
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub async fn insert(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.blobs.write().await.insert(key.into(), bytes.into());
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::Blob(format!("no blob stored under '{key}'")))
    }
}
