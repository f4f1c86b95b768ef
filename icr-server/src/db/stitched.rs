//! Stitched label repository
//!
//! Stores [`StitchedLabel`] composites in `stitched_labels`. Both the
//! composite image hash and the label-set hash are unique keys.

use async_trait::async_trait;
use chrono::Utc;
use icr_core::repository::RepoResult;
use icr_core::{
    Page, Pagination, RepositoryError, StitchStatus, StitchedLabel, StitchedLabelRepository,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{limit_offset, map_sqlx_error};

#[derive(FromRow)]
struct StitchedRow {
    document: Json<StitchedLabel>,
}

/// PostgreSQL-backed stitched label repository.
#[derive(Clone)]
pub struct PgStitchedLabelRepository {
    pool: PgPool,
}

impl PgStitchedLabelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, column_query: &str, key: &str) -> RepoResult<Option<StitchedLabel>> {
        let row = sqlx::query_as::<_, StitchedRow>(column_query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.document.0))
    }
}

#[async_trait]
impl StitchedLabelRepository for PgStitchedLabelRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<StitchedLabel>> {
        let row = sqlx::query_as::<_, StitchedRow>(
            r#"SELECT document FROM stitched_labels WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.document.0))
    }

    async fn find_by_hash(&self, image_hash: &str) -> RepoResult<Option<StitchedLabel>> {
        self.find_one(
            r#"SELECT document FROM stitched_labels WHERE image_hash = $1"#,
            image_hash,
        )
        .await
    }

    async fn find_by_label_set(&self, label_set_hash: &str) -> RepoResult<Option<StitchedLabel>> {
        self.find_one(
            r#"SELECT document FROM stitched_labels WHERE label_set_hash = $1"#,
            label_set_hash,
        )
        .await
    }

    async fn create(&self, label: &StitchedLabel) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stitched_labels
                (id, image_hash, label_set_hash, batch_id, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(label.id())
        .bind(label.image_hash())
        .bind(label.label_set_hash())
        .bind(label.batch_id())
        .bind(label.status().as_str())
        .bind(Json(label))
        .bind(label.created_at())
        .bind(label.updated_at())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!(
            stitched_id = %label.id(),
            label_count = label.label_count(),
            "Stored stitched label"
        );
        Ok(())
    }

    async fn update(&self, label: &StitchedLabel) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE stitched_labels
            SET status = $2, document = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(label.id())
        .bind(label.status().as_str())
        .bind(Json(label))
        .bind(label.updated_at())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(label.id()));
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: StitchStatus) -> RepoResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE stitched_labels
            SET status = $2,
                updated_at = $3,
                document = jsonb_set(jsonb_set(document, '{status}', $4), '{updated_at}', $5)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .bind(Json(status))
        .bind(Json(now))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id));
        }
        Ok(())
    }

    async fn find_many_by_status(
        &self,
        status: Option<StitchStatus>,
        pagination: Pagination,
    ) -> RepoResult<Page<StitchedLabel>> {
        let (limit, offset) = limit_offset(pagination);
        let status = status.map(|s| s.as_str());

        let rows = sqlx::query_as::<_, StitchedRow>(
            r#"
            SELECT document FROM stitched_labels
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let total: (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*) FROM stitched_labels WHERE ($1::TEXT IS NULL OR status = $1)"#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let items = rows.into_iter().map(|r| r.document.0).collect();
        Ok(Page::new(items, pagination, total.0.max(0) as u64))
    }

    async fn count_by_status(&self) -> RepoResult<Vec<(StitchStatus, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM stitched_labels GROUP BY status"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(StitchStatus::ALL
            .into_iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(name, _)| name == status.as_str())
                    .map_or(0, |(_, n)| (*n).max(0) as u64);
                (status, count)
            })
            .collect())
    }
}
