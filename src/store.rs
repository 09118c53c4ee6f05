//! Document stores
//!
//! The core only loads and saves whole documents; discovery, watching, and
//! backups belong to the caller. `FsStore` is the production implementation,
//! `MemoryStore` backs tests and embedders that keep documents elsewhere.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from document storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Whole-document load/save. Implementations must be thread-safe; the
/// execute path loads, reconciles, and saves around cell runs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load(&self, path: &Path) -> StoreResult<String>;
    async fn save(&self, path: &Path, text: &str) -> StoreResult<()>;
}

/// Filesystem-backed store.
#[derive(Debug, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentStore for FsStore {
    async fn load(&self, path: &Path) -> StoreResult<String> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, path: &Path, text: &str) -> StoreResult<()> {
        tokio::fs::write(path, text).await?;
        Ok(())
    }
}

/// In-memory store for tests and embedders.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: DashMap<PathBuf, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.files.insert(path.into(), text.into());
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files.insert(path.into(), text.into());
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files.get(path.as_ref()).map(|t| t.clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load(&self, path: &Path) -> StoreResult<String> {
        self.files
            .get(path)
            .map(|t| t.clone())
            .ok_or_else(|| StoreError::NotFound(path.display().to_string()))
    }

    async fn save(&self, path: &Path, text: &str) -> StoreResult<()> {
        self.files.insert(path.to_path_buf(), text.to_string());
        Ok(())
    }
}
