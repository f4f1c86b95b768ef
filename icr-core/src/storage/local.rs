use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{validate_logical_path, FileStorage, StorageError, StorageRef};

/// Files under a root directory; references are root-relative paths.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, logical_path: &str) -> Result<PathBuf, StorageError> {
        validate_logical_path(logical_path)?;
        Ok(self.root.join(logical_path))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, bytes: &[u8], logical_path: &str) -> Result<StorageRef, StorageError> {
        let path = self.resolve(logical_path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!(path = %path.display(), bytes = bytes.len(), "Stored file");
        Ok(StorageRef::new(logical_path))
    }

    async fn read(&self, reference: &StorageRef) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(reference.as_str())?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError> {
        let path = self.resolve(reference.as_str())?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
