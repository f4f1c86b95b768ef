//! File storage for full images, extracted labels and stitched composites.
//!
//! The pipeline only sees opaque [`StorageRef`]s; where the bytes live is the
//! backend's business.

mod local;
mod memory;

pub use local::LocalFileStorage;
pub use memory::InMemoryFileStorage;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid storage reference: {0}")]
    InvalidReference(String),
}

/// Opaque handle returned by [`FileStorage::store`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageRef(String);

impl StorageRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject logical paths that could escape the storage root.
pub(crate) fn validate_logical_path(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if invalid {
        return Err(StorageError::InvalidReference(path.to_string()));
    }
    Ok(())
}

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Store `bytes` under `logical_path`, overwriting any previous object.
    async fn store(&self, bytes: &[u8], logical_path: &str) -> Result<StorageRef, StorageError>;

    async fn read(&self, reference: &StorageRef) -> Result<Vec<u8>, StorageError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError>;
}
