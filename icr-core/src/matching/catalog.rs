//! Card catalog collaborator.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{IcrError, Result};
use crate::parsing::{normalize_card_number, tokenize, ExtractedFields};

/// Immutable reference data for one card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCard {
    pub id: String,
    pub name: String,
    /// Number within the set as printed (`"4"`, `"SV49"`).
    pub number: String,
    pub set_name: String,
    #[serde(default)]
    pub year: Option<u16>,
    /// Variant tokens such as `HOLO` or `1ST EDITION`.
    #[serde(default)]
    pub modifiers: Vec<String>,
}

impl CatalogCard {
    /// Numeric position within the set, `u32::MAX` when the number has no digits.
    pub fn ordinal(&self) -> u32 {
        let digits: String = self
            .number
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().unwrap_or(u32::MAX)
    }
}

/// Reference-data lookup used by the matcher.
#[async_trait]
pub trait CardCatalog: Send + Sync {
    /// Cards plausibly related to `fields`. Ranking is the matcher's job.
    async fn find_candidates(&self, fields: &ExtractedFields) -> Result<Vec<CatalogCard>>;

    async fn get(&self, id: &str) -> Result<Option<CatalogCard>>;
}

/// Catalog held in memory, usually loaded from a JSON array.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    cards: Vec<CatalogCard>,
}

impl InMemoryCatalog {
    pub fn new(cards: Vec<CatalogCard>) -> Self {
        Self { cards }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let cards: Vec<CatalogCard> = serde_json::from_str(json)
            .map_err(|e| IcrError::Validation(format!("invalid card catalog JSON: {e}")))?;
        Ok(Self::new(cards))
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    fn is_candidate(
        card: &CatalogCard,
        fields: &ExtractedFields,
        label_tokens: &BTreeSet<String>,
    ) -> bool {
        let year_close = match (fields.year, card.year) {
            (Some(a), Some(b)) => a.abs_diff(b) <= 1,
            _ => false,
        };
        let number_hit = fields
            .card_numbers
            .contains(&normalize_card_number(&card.number));
        let name_hit = tokenize(&card.name)
            .iter()
            .any(|t| label_tokens.contains(t));

        year_close || number_hit || name_hit
    }
}

#[async_trait]
impl CardCatalog for InMemoryCatalog {
    async fn find_candidates(&self, fields: &ExtractedFields) -> Result<Vec<CatalogCard>> {
        let label_tokens = fields.label_tokens();
        Ok(self
            .cards
            .iter()
            .filter(|card| Self::is_candidate(card, fields, &label_tokens))
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<CatalogCard>> {
        Ok(self.cards.iter().find(|c| c.id == id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"[
        {"id": "base-4", "name": "Charizard", "number": "4", "set_name": "Base", "year": 1999, "modifiers": ["HOLO"]},
        {"id": "neo-9", "name": "Lugia", "number": "9", "set_name": "Neo Genesis", "year": 2000}
    ]"#;

    #[tokio::test]
    async fn test_find_candidates_by_name() {
        let catalog = InMemoryCatalog::from_json(CATALOG).unwrap();
        let fields = ExtractedFields {
            dynamic_fields: vec!["CHARIZARD-HOLO".into()],
            ..Default::default()
        };

        let found = catalog.find_candidates(&fields).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "base-4");
    }

    #[tokio::test]
    async fn test_no_signal_no_candidates() {
        let catalog = InMemoryCatalog::from_json(CATALOG).unwrap();
        let found = catalog
            .find_candidates(&ExtractedFields::default())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let catalog = InMemoryCatalog::from_json(CATALOG).unwrap();
        assert!(catalog.get("neo-9").await.unwrap().is_some());
        assert!(catalog.get("nope").await.unwrap().is_none());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            InMemoryCatalog::from_json("{"),
            Err(IcrError::Validation(_))
        ));
    }

    #[test]
    fn test_ordinal() {
        let mut card: CatalogCard = serde_json::from_str(
            r#"{"id":"x","name":"x","number":"SV049","set_name":"x"}"#,
        )
        .unwrap();
        assert_eq!(card.ordinal(), 49);
        card.number = "?".into();
        assert_eq!(card.ordinal(), u32::MAX);
    }
}
