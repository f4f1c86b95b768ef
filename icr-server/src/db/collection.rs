//! Graded card collection backed by `graded_cards`.

use async_trait::async_trait;
use icr_core::{GradedCardDraft, GradedCardSink, IcrError};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::map_sqlx_error;

/// Creates one graded-card row per approved scan.
#[derive(Clone)]
pub struct PgGradedCardSink {
    pool: PgPool,
}

impl PgGradedCardSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradedCardSink for PgGradedCardSink {
    /// Upsert on `scan_id`: approving the same scan twice returns the
    /// existing card id.
    async fn create_graded_card(&self, draft: &GradedCardDraft) -> icr_core::Result<String> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO graded_cards (id, scan_id, card_id, cert_number, grade, document)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (scan_id) DO UPDATE SET scan_id = EXCLUDED.scan_id
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.scan_id)
        .bind(&draft.card_id)
        .bind(&draft.cert_number)
        .bind(&draft.grade)
        .bind(Json(draft))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| IcrError::Repository(map_sqlx_error(e)))?;

        tracing::info!(
            graded_card_id = %id,
            scan_id = %draft.scan_id,
            card_id = %draft.card_id,
            "Graded card created"
        );

        Ok(id.to_string())
    }
}
