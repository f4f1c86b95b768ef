//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document for the ICR API.

use utoipa::OpenApi;

use crate::handlers::{
    DeleteScanResponse, HealthResponse, ReadyResponse, ScanIdsRequest, SelectMatchRequest,
};

/// PSA label ICR API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Pokemon ICR API",
        version = "0.1.0",
        description = r#"
## Graded Card Label Recognition

Turns photos of PSA graded card slabs into identified catalog cards.

### Flow

1. **Upload** slab photos via `POST /api/icr/upload` (duplicates are detected by content hash)
2. **Extract** the label strip of each photo via `POST /api/icr/extract`
3. **Stitch** up to 50 labels into one composite via `POST /api/icr/stitch`
4. **OCR** the composite once via `POST /api/icr/stitched/{id}/ocr`; text is mapped back to each label
5. **Match** the parsed fields against the card catalog via `POST /api/icr/match`
6. **Review**: select, approve, deny or mark no-match per scan

Batch operations never fail as a whole because of one bad item: they return
`{ "successful": [...], "failed": [...] }`.
"#,
        license(
            name = "MIT OR Apache-2.0",
            url = "https://github.com/ArthurDEV44/pokemon-icr/blob/main/LICENSE"
        )
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Upload", description = "Upload slab photos"),
        (name = "Pipeline", description = "Label extraction, stitching, OCR and matching"),
        (name = "Scans", description = "Scan listing, inspection and deletion"),
        (name = "Review", description = "Operator review actions on matched scans"),
        (name = "Stitched", description = "Stitched composites and status counts"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::upload::upload_handler,
        crate::handlers::stages::extract_handler,
        crate::handlers::stages::stitch_handler,
        crate::handlers::stages::ocr_handler,
        crate::handlers::stages::match_handler,
        crate::handlers::scans::list_scans_handler,
        crate::handlers::scans::get_scan_handler,
        crate::handlers::scans::delete_scan_handler,
        crate::handlers::scans::select_match_handler,
        crate::handlers::scans::approve_handler,
        crate::handlers::scans::deny_handler,
        crate::handlers::scans::no_match_handler,
        crate::handlers::stitched::list_stitched_handler,
        crate::handlers::stitched::get_stitched_handler,
        crate::handlers::stitched::status_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            ScanIdsRequest,
            SelectMatchRequest,
            DeleteScanResponse,
        )
    )
)]
pub struct ApiDoc;
