//! Downstream graded-card collection.
//!
//! Approving a scan hands a [`GradedCardDraft`] to the collection, which owns
//! the long-lived graded-card record. Only the returned id is kept on the scan.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::matching::CardMatch;
use crate::model::GradedCardScan;
use crate::parsing::Language;
use crate::storage::StorageRef;

/// Everything the collection needs to create a graded-card record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedCardDraft {
    pub scan_id: Uuid,
    pub card_id: String,
    pub card_name: String,
    pub set_name: String,
    pub card_number: String,
    pub year: Option<u16>,
    pub grade: Option<String>,
    pub grade_label: Option<String>,
    pub cert_number: Option<String>,
    pub language: Language,
    pub modifiers: Vec<String>,
    pub image: StorageRef,
    pub label_image: Option<StorageRef>,
}

impl GradedCardDraft {
    pub fn from_scan(scan: &GradedCardScan, chosen: &CardMatch) -> Self {
        let fields = scan.extracted.clone().unwrap_or_default();
        Self {
            scan_id: scan.id,
            card_id: chosen.card_id.clone(),
            card_name: chosen.name.clone(),
            set_name: chosen.set_name.clone(),
            card_number: chosen.number.clone(),
            year: chosen.year,
            grade: fields.grade,
            grade_label: fields.grade_label,
            cert_number: fields.cert_number,
            language: fields.language,
            modifiers: fields.modifiers,
            image: scan.full_image.clone(),
            label_image: scan.label_image.clone(),
        }
    }
}

#[async_trait]
pub trait GradedCardSink: Send + Sync {
    /// Create the collection record and return its id.
    ///
    /// Must be idempotent per `scan_id`: approving again after a failed
    /// status write returns the existing record.
    async fn create_graded_card(&self, draft: &GradedCardDraft) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCollection {
    cards: Arc<DashMap<Uuid, (String, GradedCardDraft)>>,
}

impl InMemoryCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn get_by_scan(&self, scan_id: Uuid) -> Option<(String, GradedCardDraft)> {
        self.cards.get(&scan_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl GradedCardSink for InMemoryCollection {
    async fn create_graded_card(&self, draft: &GradedCardDraft) -> Result<String> {
        let entry = self
            .cards
            .entry(draft.scan_id)
            .or_insert_with(|| (Uuid::new_v4().to_string(), draft.clone()));
        Ok(entry.value().0.clone())
    }
}
