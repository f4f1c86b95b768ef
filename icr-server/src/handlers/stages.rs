//! Pipeline stage handlers
//!
//! Label extraction, stitching, OCR and matching. Each handler is a thin
//! adapter over one [`icr_core::IcrPipeline`] stage.

use axum::{
    extract::{Path, State},
    Json,
};
use icr_core::{BatchResult, GradedCardScan, OcrOutcome, StitchOutcome};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::AppState;

/// Request body naming the scans a stage should process
#[derive(Debug, Deserialize, ToSchema)]
pub struct ScanIdsRequest {
    /// Scan ids; for stitching, the order is the top-to-bottom label order
    #[schema(example = json!(["550e8400-e29b-41d4-a716-446655440000"]))]
    pub scan_ids: Vec<Uuid>,
}

impl ScanIdsRequest {
    fn require_ids(&self) -> Result<&[Uuid], ApiError> {
        if self.scan_ids.is_empty() {
            return Err(ApiError::bad_request("scan_ids must not be empty"));
        }
        Ok(&self.scan_ids)
    }
}

/// POST /api/icr/extract - Crop the label region out of uploaded scans
#[utoipa::path(
    post,
    path = "/api/icr/extract",
    tag = "Pipeline",
    request_body = ScanIdsRequest,
    responses(
        (status = 200, description = "Extracted scans under `successful`, per-scan errors under `failed`"),
        (status = 400, description = "Empty scan_ids")
    )
)]
pub async fn extract_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanIdsRequest>,
) -> Result<Json<BatchResult<GradedCardScan>>, ApiError> {
    let result = state.pipeline.extract_labels(request.require_ids()?).await?;
    Ok(Json(result))
}

/// POST /api/icr/stitch - Stitch extracted labels into one composite
///
/// Stitching the same ordered label set twice returns the existing
/// composite with `duplicate: true`.
#[utoipa::path(
    post,
    path = "/api/icr/stitch",
    tag = "Pipeline",
    request_body = ScanIdsRequest,
    responses(
        (status = 200, description = "The stitched label and whether it already existed"),
        (status = 400, description = "Empty, repeated or too many scan ids"),
        (status = 404, description = "Unknown scan"),
        (status = 409, description = "A scan is not in the extracted state")
    )
)]
pub async fn stitch_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanIdsRequest>,
) -> Result<Json<StitchOutcome>, ApiError> {
    let outcome = state.pipeline.stitch(request.require_ids()?).await?;
    Ok(Json(outcome))
}

/// POST /api/icr/stitched/{id}/ocr - Run OCR on a composite
///
/// One provider call for the whole composite. The text is distributed back
/// onto each label and parsed into fields.
#[utoipa::path(
    post,
    path = "/api/icr/stitched/{id}/ocr",
    tag = "Pipeline",
    params(
        ("id" = String, Path, description = "Stitched label ID (UUID)")
    ),
    responses(
        (status = 200, description = "Updated stitched label and the per-scan results"),
        (status = 404, description = "Stitched label not found"),
        (status = 409, description = "OCR already ran for this composite"),
        (status = 503, description = "OCR provider failed, timed out or rate limit wait expired")
    )
)]
pub async fn ocr_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OcrOutcome>, ApiError> {
    let outcome = state.pipeline.run_ocr(id).await?;
    Ok(Json(outcome))
}

/// POST /api/icr/match - Match OCR'd scans against the card catalog
#[utoipa::path(
    post,
    path = "/api/icr/match",
    tag = "Pipeline",
    request_body = ScanIdsRequest,
    responses(
        (status = 200, description = "Matched scans under `successful`, per-scan errors under `failed`"),
        (status = 400, description = "Empty scan_ids")
    )
)]
pub async fn match_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanIdsRequest>,
) -> Result<Json<BatchResult<GradedCardScan>>, ApiError> {
    let result = state.pipeline.match_scans(request.require_ids()?).await?;
    Ok(Json(result))
}
