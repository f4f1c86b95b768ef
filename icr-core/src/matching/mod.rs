//! Weighted multi-criterion card matching.
//!
//! PSA label OCR is noisy and each field has its own reliability, so every
//! candidate is scored on independent axes (year, name tokens, card number,
//! modifiers, set) that are combined by a weighted sum. The sub-scores are
//! kept on the result so a reviewer can see why a card was proposed.
//!
//! The default weights are a starting point, not a tuned contract.

mod catalog;

pub use catalog::{CardCatalog, CatalogCard, InMemoryCatalog};

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::parsing::{normalize_card_number, tokenize, ExtractedFields};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub year: f32,
    pub name: f32,
    pub number: f32,
    pub modifier: f32,
    pub set: f32,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            year: 0.25,
            name: 0.35,
            number: 0.20,
            modifier: 0.10,
            set: 0.10,
        }
    }
}

impl MatchWeights {
    fn total(&self) -> f32 {
        self.year + self.name + self.number + self.modifier + self.set
    }
}

/// Per-axis scores, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchScores {
    pub year: f32,
    pub name: f32,
    pub number: f32,
    pub modifier: f32,
    pub set: f32,
}

/// One ranked candidate, denormalized for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMatch {
    pub card_id: String,
    pub name: String,
    pub number: String,
    pub set_name: String,
    pub year: Option<u16>,
    pub confidence: f32,
    pub scores: MatchScores,
}

impl CardMatch {
    /// A match picked by an operator rather than the scorer.
    pub fn manual(card: &CatalogCard) -> Self {
        Self {
            card_id: card.id.clone(),
            name: card.name.clone(),
            number: card.number.clone(),
            set_name: card.set_name.clone(),
            year: card.year,
            confidence: 1.0,
            scores: MatchScores::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CardMatcher {
    weights: MatchWeights,
    min_confidence: f32,
    top_n: usize,
}

impl Default for CardMatcher {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            min_confidence: 0.2,
            top_n: 5,
        }
    }
}

impl CardMatcher {
    pub fn new(weights: MatchWeights) -> Self {
        Self {
            weights,
            ..Default::default()
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    /// Score one catalog card against a label.
    pub fn score(&self, fields: &ExtractedFields, card: &CatalogCard) -> CardMatch {
        let label_tokens = fields.label_tokens();
        self.score_with_tokens(fields, &label_tokens, card)
    }

    fn score_with_tokens(
        &self,
        fields: &ExtractedFields,
        label_tokens: &BTreeSet<String>,
        card: &CatalogCard,
    ) -> CardMatch {
        let scores = MatchScores {
            year: year_score(fields.year, card.year),
            name: token_coverage(&tokenize(&card.name), label_tokens),
            number: number_score(&fields.card_numbers, &card.number),
            modifier: modifier_score(&fields.modifiers, &card.modifiers),
            set: token_coverage(&tokenize(&card.set_name), label_tokens),
        };

        let w = &self.weights;
        let total = w.total();
        let confidence = if total > 0.0 {
            (w.year * scores.year
                + w.name * scores.name
                + w.number * scores.number
                + w.modifier * scores.modifier
                + w.set * scores.set)
                / total
        } else {
            0.0
        };

        CardMatch {
            card_id: card.id.clone(),
            name: card.name.clone(),
            number: card.number.clone(),
            set_name: card.set_name.clone(),
            year: card.year,
            confidence: confidence.clamp(0.0, 1.0),
            scores,
        }
    }

    /// Score, filter and order candidates. Empty input gives an empty list.
    pub fn rank(&self, fields: &ExtractedFields, candidates: &[CatalogCard]) -> Vec<CardMatch> {
        let label_tokens = fields.label_tokens();
        let mut scored: Vec<(u32, CardMatch)> = candidates
            .iter()
            .map(|card| (card.ordinal(), self.score_with_tokens(fields, &label_tokens, card)))
            .filter(|(_, m)| m.confidence >= self.min_confidence)
            .collect();

        scored.sort_by(|(ord_a, a), (ord_b, b)| compare_matches((*ord_a, a), (*ord_b, b)));
        scored.truncate(self.top_n);
        scored.into_iter().map(|(_, m)| m).collect()
    }

    #[instrument(level = "debug", skip_all, fields(cert = ?fields.cert_number))]
    pub async fn find_matches(
        &self,
        catalog: &dyn CardCatalog,
        fields: &ExtractedFields,
    ) -> Result<Vec<CardMatch>> {
        let candidates = catalog.find_candidates(fields).await?;
        let ranked = self.rank(fields, &candidates);
        debug!(
            candidates = candidates.len(),
            kept = ranked.len(),
            best = ranked.first().map(|m| m.confidence),
            "Ranked catalog candidates"
        );
        Ok(ranked)
    }
}

/// Confidence desc, name score desc, set ordinal asc, then card id.
fn compare_matches((ord_a, a): (u32, &CardMatch), (ord_b, b): (u32, &CardMatch)) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.scores.name.total_cmp(&a.scores.name))
        .then_with(|| ord_a.cmp(&ord_b))
        .then_with(|| a.card_id.cmp(&b.card_id))
}

fn year_score(label: Option<u16>, card: Option<u16>) -> f32 {
    match (label, card) {
        (Some(a), Some(b)) if a == b => 1.0,
        (Some(a), Some(b)) if a.abs_diff(b) == 1 => 0.5,
        _ => 0.0,
    }
}

/// Fraction of `wanted` tokens present on the label.
fn token_coverage(wanted: &BTreeSet<String>, label_tokens: &BTreeSet<String>) -> f32 {
    if wanted.is_empty() {
        return 0.0;
    }
    let hits = wanted.iter().filter(|t| label_tokens.contains(*t)).count();
    hits as f32 / wanted.len() as f32
}

fn number_score(label_numbers: &[String], card_number: &str) -> f32 {
    let wanted = normalize_card_number(card_number);
    if label_numbers.iter().any(|n| *n == wanted) {
        1.0
    } else {
        0.0
    }
}

fn modifier_score(label: &[String], card: &[String]) -> f32 {
    let normalize = |tokens: &[String]| -> BTreeSet<String> {
        tokens.iter().map(|t| t.trim().to_uppercase()).collect()
    };
    let label = normalize(label);
    let card = normalize(card);

    match (label.is_empty(), card.is_empty()) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.0,
        (false, false) => {
            let shared = label.intersection(&card).count();
            let union = label.union(&card).count();
            shared as f32 / union as f32
        }
    }
}
