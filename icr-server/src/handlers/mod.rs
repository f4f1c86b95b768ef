//! HTTP request handlers
//!
//! This module contains all the request handlers for the API endpoints.

pub mod health;
pub mod scans;
pub mod stages;
pub mod stitched;
pub mod upload;

pub use crate::state::AppState;
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use scans::{
    approve_handler, delete_scan_handler, deny_handler, get_scan_handler, list_scans_handler,
    no_match_handler, select_match_handler, DeleteScanResponse, ListQuery, SelectMatchRequest,
};
pub use stages::{extract_handler, match_handler, ocr_handler, stitch_handler, ScanIdsRequest};
pub use stitched::{get_stitched_handler, list_stitched_handler, status_handler};
pub use upload::upload_handler;
