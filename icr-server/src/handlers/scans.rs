//! Scan handlers
//!
//! Listing, inspection, deletion and the operator review actions.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use icr_core::{GradedCardScan, Page, Pagination, ScanStatus};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::AppState;

/// Query parameters for paginated listings
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListQuery {
    /// Page number (1-indexed)
    #[param(default = 1, minimum = 1)]
    pub page: Option<u32>,

    /// Items per page (max 100)
    #[param(default = 20, minimum = 1, maximum = 100)]
    pub limit: Option<u32>,

    /// Filter by status, e.g. `ocr_complete`
    pub status: Option<String>,
}

impl ListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page.unwrap_or(1), self.limit.unwrap_or(20))
    }

    /// Parse the status filter; blank means no filter.
    pub fn status<S>(&self) -> Result<Option<S>, ApiError>
    where
        S: std::str::FromStr<Err = icr_core::IcrError>,
    {
        match self.status.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Ok(Some(raw.parse()?)),
            _ => Ok(None),
        }
    }
}

/// Body of the manual match selection
#[derive(Debug, Deserialize, ToSchema)]
pub struct SelectMatchRequest {
    /// Catalog card id, either a proposed candidate or any catalog card
    #[schema(example = "base1-4")]
    pub card_id: String,
}

/// Response for a deleted scan
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteScanResponse {
    pub deleted: bool,
    #[schema(value_type = String)]
    pub id: Uuid,
}

/// GET /api/icr/scans - List scans, newest first
#[utoipa::path(
    get,
    path = "/api/icr/scans",
    tag = "Scans",
    params(ListQuery),
    responses(
        (status = 200, description = "Page of scans: `items`, `page`, `limit`, `total`, `has_more`"),
        (status = 400, description = "Unknown status filter")
    )
)]
pub async fn list_scans_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<GradedCardScan>>, ApiError> {
    let status: Option<ScanStatus> = query.status()?;
    let page = state.pipeline.list_scans(status, query.pagination()).await?;
    Ok(Json(page))
}

/// GET /api/icr/scans/{id} - Get one scan
#[utoipa::path(
    get,
    path = "/api/icr/scans/{id}",
    tag = "Scans",
    params(
        ("id" = String, Path, description = "Scan ID (UUID)")
    ),
    responses(
        (status = 200, description = "The scan record"),
        (status = 404, description = "Scan not found")
    )
)]
pub async fn get_scan_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GradedCardScan>, ApiError> {
    Ok(Json(state.pipeline.get_scan(id).await?))
}

/// DELETE /api/icr/scans/{id} - Delete a scan and its stored images
#[utoipa::path(
    delete,
    path = "/api/icr/scans/{id}",
    tag = "Scans",
    params(
        ("id" = String, Path, description = "Scan ID (UUID)")
    ),
    responses(
        (status = 200, description = "Scan deleted", body = DeleteScanResponse),
        (status = 404, description = "Scan not found")
    )
)]
pub async fn delete_scan_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteScanResponse>, ApiError> {
    state.pipeline.delete_scan(id).await?;
    Ok(Json(DeleteScanResponse { deleted: true, id }))
}

/// POST /api/icr/scans/{id}/select - Pick the card for a matched scan
///
/// A card outside the proposed candidates is looked up in the catalog and
/// recorded as a manual override.
#[utoipa::path(
    post,
    path = "/api/icr/scans/{id}/select",
    tag = "Review",
    params(
        ("id" = String, Path, description = "Scan ID (UUID)")
    ),
    request_body = SelectMatchRequest,
    responses(
        (status = 200, description = "Scan moved to confirmed"),
        (status = 400, description = "Blank card_id"),
        (status = 404, description = "Scan or card not found"),
        (status = 409, description = "Scan is not awaiting review")
    )
)]
pub async fn select_match_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectMatchRequest>,
) -> Result<Json<GradedCardScan>, ApiError> {
    Ok(Json(state.pipeline.select_match(id, &request.card_id).await?))
}

/// POST /api/icr/scans/{id}/approve - Create the graded card for a scan
///
/// Uses the selected card, or the top candidate when none was selected.
#[utoipa::path(
    post,
    path = "/api/icr/scans/{id}/approve",
    tag = "Review",
    params(
        ("id" = String, Path, description = "Scan ID (UUID)")
    ),
    responses(
        (status = 200, description = "Scan moved to card_created with its graded_card_id"),
        (status = 400, description = "No card to approve"),
        (status = 404, description = "Scan not found"),
        (status = 409, description = "Scan is not awaiting review")
    )
)]
pub async fn approve_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GradedCardScan>, ApiError> {
    Ok(Json(state.pipeline.approve(id).await?))
}

/// POST /api/icr/scans/{id}/deny - Reject a scan
#[utoipa::path(
    post,
    path = "/api/icr/scans/{id}/deny",
    tag = "Review",
    params(
        ("id" = String, Path, description = "Scan ID (UUID)")
    ),
    responses(
        (status = 200, description = "Scan moved to denied"),
        (status = 404, description = "Scan not found"),
        (status = 409, description = "Scan is not awaiting review")
    )
)]
pub async fn deny_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GradedCardScan>, ApiError> {
    Ok(Json(state.pipeline.deny(id).await?))
}

/// POST /api/icr/scans/{id}/no-match - Record that no catalog card fits
#[utoipa::path(
    post,
    path = "/api/icr/scans/{id}/no-match",
    tag = "Review",
    params(
        ("id" = String, Path, description = "Scan ID (UUID)")
    ),
    responses(
        (status = 200, description = "Scan moved to no_match"),
        (status = 404, description = "Scan not found"),
        (status = 409, description = "Scan is not awaiting review")
    )
)]
pub async fn no_match_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GradedCardScan>, ApiError> {
    Ok(Json(state.pipeline.mark_no_match(id).await?))
}
