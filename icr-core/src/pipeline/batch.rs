//! Partial-failure batch results.

use serde::{Deserialize, Serialize};

use crate::error::{IcrError, Result};

/// One item of a batch that failed, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Scan id, file name or input position of the failed item.
    pub id: String,
    pub error: String,
    /// Error category, see [`IcrError::kind`].
    pub kind: String,
}

impl BatchFailure {
    pub fn new(id: impl Into<String>, error: &IcrError) -> Self {
        Self {
            id: id.into(),
            error: error.to_string(),
            kind: error.kind().to_string(),
        }
    }
}

/// Successes and failures of a batch operation. One item failing never
/// aborts its siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult<T> {
    pub successful: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one item's outcome.
    pub fn push(&mut self, id: impl Into<String>, outcome: Result<T>) {
        match outcome {
            Ok(item) => self.successful.push(item),
            Err(err) => self.failed.push(BatchFailure::new(id, &err)),
        }
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.successful.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Turn any failure into [`IcrError::PartialBatchFailure`], for callers
    /// that need all-or-nothing.
    pub fn into_strict(self, id_of: impl Fn(&T) -> String) -> Result<Vec<T>> {
        if self.failed.is_empty() {
            return Ok(self.successful);
        }
        Err(IcrError::PartialBatchFailure {
            successful: self.successful.iter().map(id_of).collect(),
            failed: self.failed,
        })
    }
}
