//! `StitchedLabel`: one composite image spanning several scans.
//!
//! The composite bytes, position table and label-hash set are derived
//! together, so they are fixed at construction and only exposed read-only.
//! Adding a label means stitching a new composite.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IcrError, Result};
use crate::hashing::label_set_hash;
use crate::imaging::LabelPosition;
use crate::ocr::TextAnnotation;
use crate::storage::StorageRef;

const ENTITY: &str = "StitchedLabel";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StitchStatus {
    Stitched,
    OcrComplete,
    Matched,
}

impl StitchStatus {
    pub const ALL: [StitchStatus; 3] = [
        StitchStatus::Stitched,
        StitchStatus::OcrComplete,
        StitchStatus::Matched,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stitched => "stitched",
            Self::OcrComplete => "ocr_complete",
            Self::Matched => "matched",
        }
    }

    pub fn can_transition_to(&self, next: StitchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Stitched, Self::OcrComplete) | (Self::OcrComplete, Self::Matched)
        )
    }
}

impl fmt::Display for StitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StitchStatus {
    type Err = IcrError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| IcrError::Validation(format!("unknown stitched label status '{s}'")))
    }
}

/// How well the OCR annotations mapped back onto labels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionMetrics {
    pub total_annotations: usize,
    pub distributed_annotations: usize,
    pub skipped_annotations: usize,
    pub average_confidence: f32,
    pub processing_time_ms: u64,
}

/// Raw OCR output for the composite, as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedOcr {
    pub provider: String,
    pub full_text: String,
    pub confidence: f32,
    pub annotations: Vec<TextAnnotation>,
    pub metrics: DistributionMetrics,
    pub completed_at: DateTime<Utc>,
}

/// Everything needed to create a [`StitchedLabel`].
#[derive(Debug, Clone)]
pub struct NewStitchedLabel {
    pub image_hash: String,
    pub image: StorageRef,
    pub width: u32,
    pub height: u32,
    pub positions: Vec<LabelPosition>,
    pub label_hashes: Vec<String>,
    pub scan_ids: Vec<Uuid>,
    pub batch_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchedLabel {
    id: Uuid,
    image_hash: String,
    label_set_hash: String,
    label_hashes: Vec<String>,
    positions: Vec<LabelPosition>,
    scan_ids: Vec<Uuid>,
    image: StorageRef,
    width: u32,
    height: u32,
    batch_id: String,
    status: StitchStatus,
    ocr: Option<StitchedOcr>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StitchedLabel {
    pub fn new(data: NewStitchedLabel) -> Result<Self> {
        let count = data.positions.len();
        if count == 0 || data.label_hashes.len() != count || data.scan_ids.len() != count {
            return Err(IcrError::Validation(format!(
                "stitched label needs one hash and scan per position: {} positions, {} hashes, {} scans",
                count,
                data.label_hashes.len(),
                data.scan_ids.len()
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            label_set_hash: label_set_hash(&data.label_hashes),
            image_hash: data.image_hash,
            label_hashes: data.label_hashes,
            positions: data.positions,
            scan_ids: data.scan_ids,
            image: data.image,
            width: data.width,
            height: data.height,
            batch_id: data.batch_id,
            status: StitchStatus::Stitched,
            ocr: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// SHA-256 of the composite bytes.
    pub fn image_hash(&self) -> &str {
        &self.image_hash
    }

    pub fn label_set_hash(&self) -> &str {
        &self.label_set_hash
    }

    pub fn label_hashes(&self) -> &[String] {
        &self.label_hashes
    }

    pub fn positions(&self) -> &[LabelPosition] {
        &self.positions
    }

    /// Constituent scans, in position order.
    pub fn scan_ids(&self) -> &[Uuid] {
        &self.scan_ids
    }

    pub fn image(&self) -> &StorageRef {
        &self.image
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn label_count(&self) -> usize {
        self.positions.len()
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn status(&self) -> StitchStatus {
        self.status
    }

    pub fn ocr(&self) -> Option<&StitchedOcr> {
        self.ocr.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn ensure_transition(&self, next: StitchStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(IcrError::StateTransition {
                entity: ENTITY,
                current: self.status.to_string(),
                attempted: next.to_string(),
            })
        }
    }

    fn transition(&mut self, next: StitchStatus) -> Result<()> {
        self.ensure_transition(next)?;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_ocr(&mut self, ocr: StitchedOcr) -> Result<()> {
        self.transition(StitchStatus::OcrComplete)?;
        self.ocr = Some(ocr);
        Ok(())
    }

    pub fn mark_matched(&mut self) -> Result<()> {
        self.transition(StitchStatus::Matched)
    }

    /// Status write without the transition guard, for repositories.
    pub(crate) fn overwrite_status(&mut self, status: StitchStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
