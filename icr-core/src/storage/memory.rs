use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{validate_logical_path, FileStorage, StorageError, StorageRef};

/// Process-local object store for tests and storage-less deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFileStorage {
    objects: Arc<DashMap<String, Vec<u8>>>,
}

impl InMemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, logical_path: &str) -> bool {
        self.objects.contains_key(logical_path)
    }
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
    async fn store(&self, bytes: &[u8], logical_path: &str) -> Result<StorageRef, StorageError> {
        validate_logical_path(logical_path)?;
        self.objects.insert(logical_path.to_string(), bytes.to_vec());
        Ok(StorageRef::new(logical_path))
    }

    async fn read(&self, reference: &StorageRef) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(reference.as_str())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }

    async fn delete(&self, reference: &StorageRef) -> Result<(), StorageError> {
        self.objects.remove(reference.as_str());
        Ok(())
    }
}
