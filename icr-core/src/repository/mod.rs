//! Persistence collaborators.
//!
//! The pipeline depends only on these traits. Entities are plain data; the
//! state-machine guards live on the entities, so repositories store what they
//! are given.

mod memory;

pub use memory::{InMemoryScanRepository, InMemoryStitchedLabelRepository};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{GradedCardScan, ScanStatus, StitchStatus, StitchedLabel};

/// Largest page size a listing will return.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Error, Debug)]
pub enum RepositoryError {
    /// A unique key (image hash, label set) is already taken.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("record not found: {0}")]
    NotFound(Uuid),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

impl Pagination {
    /// Clamp to `page >= 1` and `1 <= limit <= MAX_PAGE_SIZE`.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.max(1) - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, pagination: Pagination, total: u64) -> Self {
        let has_more = pagination.offset() + (items.len() as u64) < total;
        Self {
            items,
            page: pagination.page,
            limit: pagination.limit,
            total,
            has_more,
        }
    }
}

#[async_trait]
pub trait ScanRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<GradedCardScan>>;

    async fn find_by_hash(&self, image_hash: &str) -> RepoResult<Option<GradedCardScan>>;

    /// Insert a new scan. Fails with [`RepositoryError::Duplicate`] when the
    /// image hash is already stored.
    async fn create(&self, scan: &GradedCardScan) -> RepoResult<()>;

    /// Replace a stored scan.
    async fn update(&self, scan: &GradedCardScan) -> RepoResult<()>;

    async fn update_status(&self, id: Uuid, status: ScanStatus) -> RepoResult<()>;

    /// Newest first; `None` lists every status.
    async fn find_many_by_status(
        &self,
        status: Option<ScanStatus>,
        pagination: Pagination,
    ) -> RepoResult<Page<GradedCardScan>>;

    async fn count_by_status(&self) -> RepoResult<Vec<(ScanStatus, u64)>>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: Uuid) -> RepoResult<bool>;
}

#[async_trait]
pub trait StitchedLabelRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<StitchedLabel>>;

    /// Look up by composite image hash.
    async fn find_by_hash(&self, image_hash: &str) -> RepoResult<Option<StitchedLabel>>;

    /// Look up by the hash of the ordered label-hash list.
    async fn find_by_label_set(&self, label_set_hash: &str) -> RepoResult<Option<StitchedLabel>>;

    /// Insert a new composite. Both the image hash and the label set are unique.
    async fn create(&self, label: &StitchedLabel) -> RepoResult<()>;

    async fn update(&self, label: &StitchedLabel) -> RepoResult<()>;

    async fn update_status(&self, id: Uuid, status: StitchStatus) -> RepoResult<()>;

    async fn find_many_by_status(
        &self,
        status: Option<StitchStatus>,
        pagination: Pagination,
    ) -> RepoResult<Page<StitchedLabel>>;

    async fn count_by_status(&self) -> RepoResult<Vec<(StitchStatus, u64)>>;
}
