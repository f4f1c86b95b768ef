//! Scan repository
//!
//! Stores [`GradedCardScan`] records in `graded_card_scans`.

use async_trait::async_trait;
use chrono::Utc;
use icr_core::repository::RepoResult;
use icr_core::{GradedCardScan, Page, Pagination, RepositoryError, ScanRepository, ScanStatus};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{limit_offset, map_sqlx_error};

#[derive(FromRow)]
struct ScanRow {
    document: Json<GradedCardScan>,
}

/// PostgreSQL-backed scan repository.
#[derive(Clone)]
pub struct PgScanRepository {
    pool: PgPool,
}

impl PgScanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanRepository for PgScanRepository {
    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<GradedCardScan>> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"SELECT document FROM graded_card_scans WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.document.0))
    }

    async fn find_by_hash(&self, image_hash: &str) -> RepoResult<Option<GradedCardScan>> {
        let row = sqlx::query_as::<_, ScanRow>(
            r#"SELECT document FROM graded_card_scans WHERE image_hash = $1"#,
        )
        .bind(image_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|r| r.document.0))
    }

    async fn create(&self, scan: &GradedCardScan) -> RepoResult<()> {
        sqlx::query(
            r#"
            INSERT INTO graded_card_scans (id, image_hash, batch_id, status, document, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(scan.id)
        .bind(&scan.image_hash)
        .bind(&scan.batch_id)
        .bind(scan.processing_status.as_str())
        .bind(Json(scan))
        .bind(scan.created_at)
        .bind(scan.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        tracing::debug!(scan_id = %scan.id, "Stored scan");
        Ok(())
    }

    async fn update(&self, scan: &GradedCardScan) -> RepoResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE graded_card_scans
            SET status = $2, document = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(scan.id)
        .bind(scan.processing_status.as_str())
        .bind(Json(scan))
        .bind(scan.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(scan.id));
        }
        Ok(())
    }

    async fn update_status(&self, id: Uuid, status: ScanStatus) -> RepoResult<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE graded_card_scans
            SET status = $2,
                updated_at = $3,
                document = jsonb_set(
                    jsonb_set(document, '{processing_status}', $4),
                    '{updated_at}', $5
                )
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
        status: Option<ScanStatus>,
        pagination: Pagination,
    ) -> RepoResult<Page<GradedCardScan>> {
        let (limit, offset) = limit_offset(pagination);
        let status = status.map(|s| s.as_str());

        let rows = sqlx::query_as::<_, ScanRow>(
            r#"
            SELECT document FROM graded_card_scans
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
            r#"SELECT COUNT(*) FROM graded_card_scans WHERE ($1::TEXT IS NULL OR status = $1)"#,
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let items = rows.into_iter().map(|r| r.document.0).collect();
        Ok(Page::new(items, pagination, total.0.max(0) as u64))
    }

    async fn count_by_status(&self) -> RepoResult<Vec<(ScanStatus, u64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT status, COUNT(*) FROM graded_card_scans GROUP BY status"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(ScanStatus::ALL
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

    async fn delete(&self, id: Uuid) -> RepoResult<bool> {
        let result = sqlx::query(r#"DELETE FROM graded_card_scans WHERE id = $1"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
