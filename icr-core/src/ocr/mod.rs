//! OCR provider abstraction.
//!
//! The pipeline treats OCR as an external text-extraction oracle: image bytes
//! in, per-token annotations with bounding polygons out.
//!
//! - **GoogleVisionProvider** - Google Cloud Vision `TEXT_DETECTION` (production)
//! - **MockOcrProvider** - Scripted responses (testing, offline runs)

#[cfg(feature = "google-vision")]
mod google_vision;
mod mock;
pub mod rate_limit;

#[cfg(feature = "google-vision")]
pub use google_vision::{GoogleVisionConfig, GoogleVisionProvider};
pub use mock::MockOcrProvider;
pub use rate_limit::{acquire_permit, RatePermit, RateLimiter, SlidingWindowLimiter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A polygon vertex in composite-image pixel coordinates.
///
/// Providers omit zero coordinates from their JSON, hence the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vertex {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
}

/// One recognised token (or, for some providers, the full-page block).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub text: String,
    pub confidence: f32,
    #[serde(default)]
    pub bounding_polygon: Vec<Vertex>,
}

impl TextAnnotation {
    /// Axis-aligned rectangle annotation, mostly useful for tests and mocks.
    pub fn rect(text: impl Into<String>, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
            bounding_polygon: vec![
                Vertex { x, y },
                Vertex { x: x + w, y },
                Vertex { x: x + w, y: y + h },
                Vertex { x, y: y + h },
            ],
        }
    }

    /// Mean of the polygon's `y` coordinates, or `None` for a malformed polygon.
    pub fn vertical_center(&self) -> Option<f32> {
        self.mean_of(|v| v.y)
    }

    pub fn horizontal_center(&self) -> Option<f32> {
        self.mean_of(|v| v.x)
    }

    /// Height of the polygon's bounding box.
    pub fn vertical_extent(&self) -> Option<f32> {
        if !self.has_valid_polygon() {
            return None;
        }
        let (min, max) = self
            .bounding_polygon
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
        Some(max - min)
    }

    pub fn has_valid_polygon(&self) -> bool {
        !self.bounding_polygon.is_empty()
            && self
                .bounding_polygon
                .iter()
                .all(|v| v.x.is_finite() && v.y.is_finite())
    }

    fn mean_of(&self, coord: impl Fn(&Vertex) -> f32) -> Option<f32> {
        if !self.has_valid_polygon() {
            return None;
        }
        let sum: f32 = self.bounding_polygon.iter().map(coord).sum();
        Some(sum / self.bounding_polygon.len() as f32)
    }
}

/// Result of one OCR call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrResponse {
    pub raw_annotations: Vec<TextAnnotation>,
    pub full_text: String,
    #[serde(default)]
    pub processing_time_ms: u64,
}

/// Provider-specific response conventions the pipeline must know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrCapabilities {
    /// Provider name for logs and records.
    pub provider: &'static str,
    /// Annotation 0 is a full-page text block rather than a token.
    pub leading_full_text_block: bool,
}

/// External OCR service.
///
/// Implementations must be thread-safe (`Send + Sync`) and must not retry
/// internally: retry is a caller decision.
#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Extract text and per-token geometry from an encoded image.
    async fn extract_text(&self, image: &[u8]) -> Result<OcrResponse>;

    fn capabilities(&self) -> OcrCapabilities;
}
