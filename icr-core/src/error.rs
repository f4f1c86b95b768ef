use thiserror::Error;
use uuid::Uuid;

use crate::pipeline::BatchFailure;
use crate::repository::RepositoryError;
use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum IcrError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Control-flow signal: the input was already processed, use `existing_id`.
    #[error("Duplicate detected: existing record {existing_id}")]
    DuplicateDetected { existing_id: Uuid },

    #[error("Invalid {entity} state transition: {current} -> {attempted}")]
    StateTransition {
        entity: &'static str,
        current: String,
        attempted: String,
    },

    #[error("OCR provider error: {0}")]
    ExternalProvider(String),

    #[error("Batch partially failed: {} succeeded, {} failed", successful.len(), failed.len())]
    PartialBatchFailure {
        successful: Vec<String>,
        failed: Vec<BatchFailure>,
    },

    #[error("Failed to decode image #{index}: {reason}")]
    ImageDecode { index: usize, reason: String },

    #[error("Failed to encode image: {0}")]
    ImageEncode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IcrError {
    /// Short machine-readable category, used in logs and batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::DuplicateDetected { .. } => "duplicate",
            Self::StateTransition { .. } => "state_transition",
            Self::ExternalProvider(_) => "external_provider",
            Self::PartialBatchFailure { .. } => "partial_batch_failure",
            Self::ImageDecode { .. } => "image_decode",
            Self::ImageEncode(_) => "image_encode",
            Self::Storage(_) => "storage",
            Self::Repository(_) => "repository",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, IcrError>;
