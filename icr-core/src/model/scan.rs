//! `GradedCardScan`: one physical card image moving through the pipeline.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::distribute::OcrSegment;
use crate::error::{IcrError, Result};
use crate::matching::CardMatch;
use crate::parsing::ExtractedFields;
use crate::storage::StorageRef;

const ENTITY: &str = "GradedCardScan";

/// Processing status of a scan.
///
/// ```text
/// uploaded -> extracted -> stitched -> ocr_complete -> matched
///                            ^  |                        |-> confirmed -> card_created
///                            +--+ (re-stitch)            |-> card_created
///                                                        |-> denied
///                                                        +-> no_match
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Uploaded,
    Extracted,
    Stitched,
    OcrComplete,
    Matched,
    Confirmed,
    CardCreated,
    Denied,
    NoMatch,
}

impl ScanStatus {
    pub const ALL: [ScanStatus; 9] = [
        ScanStatus::Uploaded,
        ScanStatus::Extracted,
        ScanStatus::Stitched,
        ScanStatus::OcrComplete,
        ScanStatus::Matched,
        ScanStatus::Confirmed,
        ScanStatus::CardCreated,
        ScanStatus::Denied,
        ScanStatus::NoMatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Extracted => "extracted",
            Self::Stitched => "stitched",
            Self::OcrComplete => "ocr_complete",
            Self::Matched => "matched",
            Self::Confirmed => "confirmed",
            Self::CardCreated => "card_created",
            Self::Denied => "denied",
            Self::NoMatch => "no_match",
        }
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Uploaded, Extracted)
                | (Extracted, Stitched)
                | (Stitched, Stitched)
                | (Stitched, OcrComplete)
                | (OcrComplete, Matched)
                | (Matched, Confirmed | CardCreated | Denied | NoMatch)
                | (Confirmed, Confirmed | CardCreated | Denied)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CardCreated | Self::Denied | Self::NoMatch)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = IcrError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| IcrError::Validation(format!("unknown scan status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingStatus {
    #[default]
    Pending,
    Matched,
    NoMatch,
    /// Operator picked a card outside the proposed candidates.
    ManualOverride,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationFlags {
    pub user_selected: bool,
    pub user_approved: bool,
    pub user_denied: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedCardScan {
    pub id: Uuid,
    /// SHA-256 of the full image; globally unique.
    pub image_hash: String,
    pub full_image: StorageRef,
    pub original_filename: Option<String>,
    pub file_size: u64,
    pub batch_id: String,

    pub label_image: Option<StorageRef>,
    pub label_hash: Option<String>,
    pub stitched_label_id: Option<Uuid>,

    pub ocr_text: Option<String>,
    pub ocr_confidence: Option<f32>,
    #[serde(default)]
    pub ocr_segments: Vec<OcrSegment>,
    pub extracted: Option<ExtractedFields>,

    #[serde(default)]
    pub candidates: Vec<CardMatch>,
    pub selected_match: Option<CardMatch>,
    pub graded_card_id: Option<String>,

    pub processing_status: ScanStatus,
    pub matching_status: MatchingStatus,
    #[serde(default)]
    pub verification: VerificationFlags,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GradedCardScan {
    pub fn new(
        image_hash: impl Into<String>,
        full_image: StorageRef,
        batch_id: impl Into<String>,
        original_filename: Option<String>,
        file_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            image_hash: image_hash.into(),
            full_image,
            original_filename,
            file_size,
            batch_id: batch_id.into(),
            label_image: None,
            label_hash: None,
            stitched_label_id: None,
            ocr_text: None,
            ocr_confidence: None,
            ocr_segments: Vec::new(),
            extracted: None,
            candidates: Vec::new(),
            selected_match: None,
            graded_card_id: None,
            processing_status: ScanStatus::Uploaded,
            matching_status: MatchingStatus::Pending,
            verification: VerificationFlags::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Check a transition without applying it.
    pub fn ensure_transition(&self, next: ScanStatus) -> Result<()> {
        if self.processing_status.can_transition_to(next) {
            Ok(())
        } else {
            Err(IcrError::StateTransition {
                entity: ENTITY,
                current: self.processing_status.to_string(),
                attempted: next.to_string(),
            })
        }
    }

    fn transition(&mut self, next: ScanStatus) -> Result<()> {
        self.ensure_transition(next)?;
        self.processing_status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn record_extraction(
        &mut self,
        label_image: StorageRef,
        label_hash: String,
    ) -> Result<()> {
        self.transition(ScanStatus::Extracted)?;
        self.label_image = Some(label_image);
        self.label_hash = Some(label_hash);
        Ok(())
    }

    pub fn mark_stitched(&mut self, stitched_label_id: Uuid) -> Result<()> {
        self.transition(ScanStatus::Stitched)?;
        self.stitched_label_id = Some(stitched_label_id);
        Ok(())
    }

    pub fn record_ocr(
        &mut self,
        text: String,
        confidence: f32,
        segments: Vec<OcrSegment>,
        fields: ExtractedFields,
    ) -> Result<()> {
        self.transition(ScanStatus::OcrComplete)?;
        self.ocr_text = Some(text);
        self.ocr_confidence = Some(confidence);
        self.ocr_segments = segments;
        self.extracted = Some(fields);
        Ok(())
    }

    /// Store ranked candidates. An empty list is a valid outcome: the scan is
    /// still `matched` but its matching status is `no_match`.
    pub fn record_matches(&mut self, candidates: Vec<CardMatch>) -> Result<()> {
        self.transition(ScanStatus::Matched)?;
        self.matching_status = if candidates.is_empty() {
            MatchingStatus::NoMatch
        } else {
            MatchingStatus::Matched
        };
        self.candidates = candidates;
        Ok(())
    }

    /// Operator picks a card, either from the candidates or from the catalog.
    pub fn select_match(&mut self, selected: CardMatch) -> Result<()> {
        self.transition(ScanStatus::Confirmed)?;
        let from_candidates = self
            .candidates
            .iter()
            .any(|c| c.card_id == selected.card_id);
        self.matching_status = if from_candidates {
            MatchingStatus::Matched
        } else {
            MatchingStatus::ManualOverride
        };
        self.selected_match = Some(selected);
        self.verification.user_selected = true;
        Ok(())
    }

    /// The match a card record should be created from: the operator's pick,
    /// else the top candidate.
    pub fn approval_match(&self) -> Option<&CardMatch> {
        self.selected_match.as_ref().or_else(|| self.candidates.first())
    }

    pub fn mark_card_created(&mut self, graded_card_id: String) -> Result<()> {
        self.ensure_transition(ScanStatus::CardCreated)?;
        let chosen = self.approval_match().cloned().ok_or_else(|| {
            IcrError::Validation(format!("scan {} has no match to approve", self.id))
        })?;
        self.transition(ScanStatus::CardCreated)?;
        self.selected_match = Some(chosen);
        self.graded_card_id = Some(graded_card_id);
        self.verification.user_approved = true;
        self.verification.verified_at = Some(self.updated_at);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn deny(&mut self) -> Result<()> {
        self.transition(ScanStatus::Denied)?;
        self.verification.user_denied = true;
        self.verification.verified_at = Some(self.updated_at);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }

    pub fn mark_no_match(&mut self) -> Result<()> {
        self.transition(ScanStatus::NoMatch)?;
        self.matching_status = MatchingStatus::NoMatch;
        self.verification.verified_at = Some(self.updated_at);
        self.completed_at = Some(self.updated_at);
        Ok(())
    }
}
