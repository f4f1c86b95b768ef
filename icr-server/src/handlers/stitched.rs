//! Stitched label and status handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use icr_core::{Page, StatusSummary, StitchStatus, StitchedLabel};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::{AppState, ListQuery};

/// GET /api/icr/stitched - List stitched labels, newest first
#[utoipa::path(
    get,
    path = "/api/icr/stitched",
    tag = "Stitched",
    params(ListQuery),
    responses(
        (status = 200, description = "Page of stitched labels"),
        (status = 400, description = "Unknown status filter")
    )
)]
pub async fn list_stitched_handler(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<StitchedLabel>>, ApiError> {
    let status: Option<StitchStatus> = query.status()?;
    let page = state
        .pipeline
        .list_stitched(status, query.pagination())
        .await?;
    Ok(Json(page))
}

/// GET /api/icr/stitched/{id} - Get one stitched label with its position table
#[utoipa::path(
    get,
    path = "/api/icr/stitched/{id}",
    tag = "Stitched",
    params(
        ("id" = String, Path, description = "Stitched label ID (UUID)")
    ),
    responses(
        (status = 200, description = "The stitched label"),
        (status = 404, description = "Stitched label not found")
    )
)]
pub async fn get_stitched_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StitchedLabel>, ApiError> {
    Ok(Json(state.pipeline.get_stitched(id).await?))
}

/// GET /api/icr/status - Per-status counts for scans and stitched labels
#[utoipa::path(
    get,
    path = "/api/icr/status",
    tag = "Stitched",
    responses(
        (status = 200, description = "Counts keyed by status, plus totals")
    )
)]
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusSummary>, ApiError> {
    Ok(Json(state.pipeline.status_summary().await?))
}
