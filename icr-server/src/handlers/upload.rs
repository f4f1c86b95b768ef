//! Upload handler
//!
//! Stores slab photos and creates one scan per distinct image.

use axum::{
    extract::{Multipart, State},
    Json,
};
use icr_core::{UploadBatchOutcome, UploadImage};

use crate::error::ApiError;
use crate::handlers::AppState;
use crate::multipart::MultipartFields;

/// POST /api/icr/upload - Upload slab photos
///
/// Accepts multipart/form-data with:
/// - images (repeatable) or file: the photos to upload
/// - batch_id (optional): `[A-Za-z0-9_-]{1,64}`, generated when omitted
///
/// Identical bytes are never stored twice: a re-uploaded photo comes back
/// as the existing scan with `duplicate: true`. Per-image failures are
/// listed under `failed` without failing the request.
#[utoipa::path(
    post,
    path = "/api/icr/upload",
    tag = "Upload",
    request_body(
        content_type = "multipart/form-data",
        description = "One or more images under `images` or `file`, plus an optional `batch_id`"
    ),
    responses(
        (status = 200, description = "Batch outcome: `batch_id`, `successful` scans (each flagged `duplicate`) and `failed` items"),
        (status = 400, description = "No images, unsupported Content-Type, empty or oversized file, invalid batch_id"),
        (status = 413, description = "Request body too large")
    )
)]
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadBatchOutcome>, ApiError> {
    let mut fields = MultipartFields::parse(&mut multipart, state.max_file_size).await?;
    let images: Vec<UploadImage> = fields
        .require_files()?
        .into_iter()
        .map(UploadImage::from)
        .collect();
    let batch_id = fields.get_text("batch_id");

    tracing::info!(images = images.len(), batch_id = ?batch_id, "Upload received");

    let outcome = state.pipeline.upload_batch(images, batch_id).await?;
    Ok(Json(outcome))
}
