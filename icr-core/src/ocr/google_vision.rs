//! Google Cloud Vision `TEXT_DETECTION` client.
//!
//! Vision returns the whole detected text as annotation 0 followed by one
//! annotation per token, so this provider reports
//! `leading_full_text_block = true`. Per-token confidences are not populated
//! by `TEXT_DETECTION`; the mean page confidence from `fullTextAnnotation` is
//! used instead, and 0.0 when that is missing too.
//!
//! No retries happen here. A 429 or 5xx is surfaced as
//! [`IcrError::ExternalProvider`] and the caller decides what to do.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{OcrCapabilities, OcrProvider, OcrResponse, TextAnnotation, Vertex};
use crate::error::{IcrError, Result};

const DEFAULT_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GoogleVisionConfig {
    pub api_key: String,
    /// `images:annotate` URL, overridable for proxies and tests.
    pub endpoint: String,
    /// HTTP-level timeout. The pipeline applies its own stage timeout on top.
    pub timeout: Duration,
    /// BCP-47 language hints sent with every request.
    pub language_hints: Vec<String>,
}

impl GoogleVisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            language_hints: vec!["en".to_string()],
        }
    }
}

// ---- wire types ----

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateRequest<'a> {
    requests: [ImageRequest<'a>; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageRequest<'a> {
    image: ImageContent,
    features: [Feature; 1],
    image_context: ImageContext<'a>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageContext<'a> {
    language_hints: &'a [String],
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<EntityAnnotation>,
    full_text_annotation: Option<FullTextAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityAnnotation {
    #[serde(default)]
    description: String,
    confidence: Option<f32>,
    bounding_poly: Option<BoundingPoly>,
}

#[derive(Debug, Deserialize)]
struct BoundingPoly {
    #[serde(default)]
    vertices: Vec<Vertex>,
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
    #[serde(default)]
    pages: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

/// Google Cloud Vision OCR client.
pub struct GoogleVisionProvider {
    client: Client,
    config: GoogleVisionConfig,
}

impl GoogleVisionProvider {
    #[instrument(level = "debug", skip_all, fields(
        endpoint = %config.endpoint,
        timeout_ms = config.timeout.as_millis() as u64
    ))]
    pub fn new(config: GoogleVisionConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(IcrError::Validation(
                "Google Vision API key must not be empty".into(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                warn!(error = %e, "Failed to create HTTP client");
                IcrError::ExternalProvider(format!("Failed to create HTTP client: {e}"))
            })?;

        info!("Google Vision client created");
        Ok(Self { client, config })
    }

    fn into_ocr_response(response: ImageResponse, elapsed: Duration) -> Result<OcrResponse> {
        if let Some(status) = response.error {
            return Err(IcrError::ExternalProvider(format!(
                "Google Vision error {}: {}",
                status.code, status.message
            )));
        }

        let (full_text, page_confidence) = match response.full_text_annotation {
            Some(full) => {
                let confidences: Vec<f32> =
                    full.pages.iter().filter_map(|p| p.confidence).collect();
                let mean = if confidences.is_empty() {
                    None
                } else {
                    Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
                };
                (full.text, mean)
            }
            None => (String::new(), None),
        };

        let raw_annotations = response
            .text_annotations
            .into_iter()
            .map(|ann| TextAnnotation {
                text: ann.description,
                confidence: ann.confidence.or(page_confidence).unwrap_or(0.0),
                bounding_polygon: ann.bounding_poly.map(|p| p.vertices).unwrap_or_default(),
            })
            .collect();

        Ok(OcrResponse {
            raw_annotations,
            full_text,
            processing_time_ms: elapsed.as_millis() as u64,
        })
    }
}

#[async_trait]
impl OcrProvider for GoogleVisionProvider {
    #[instrument(
        level = "info",
        skip_all,
        fields(provider = "google_vision", image_bytes = image.len())
    )]
    async fn extract_text(&self, image: &[u8]) -> Result<OcrResponse> {
        if image.is_empty() {
            return Err(IcrError::Validation("image payload is empty".into()));
        }

        let start = Instant::now();
        let body = AnnotateRequest {
            requests: [ImageRequest {
                image: ImageContent {
                    content: STANDARD.encode(image),
                },
                features: [Feature {
                    kind: "TEXT_DETECTION",
                }],
                image_context: ImageContext {
                    language_hints: &self.config.language_hints,
                },
            }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, timeout = e.is_timeout(), "Google Vision request failed");
                IcrError::ExternalProvider(format!("Google Vision request failed: {e}"))
            })?;

        let status = response.status();
        debug!(status = %status, "Received HTTP response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("Google Vision quota exhausted");
            return Err(IcrError::ExternalProvider(
                "Google Vision quota exceeded (HTTP 429)".into(),
            ));
        }
        if !status.is_success() {
            warn!(status = %status, "Google Vision returned an error status");
            return Err(IcrError::ExternalProvider(format!(
                "Google Vision returned status: {status}"
            )));
        }

        let parsed: AnnotateResponse = response.json().await.map_err(|e| {
            warn!(error = %e, "Failed to parse Google Vision response");
            IcrError::ExternalProvider(format!("Failed to parse Google Vision response: {e}"))
        })?;

        let first = parsed.responses.into_iter().next().unwrap_or_default();
        let result = Self::into_ocr_response(first, start.elapsed())?;

        info!(
            annotations = result.raw_annotations.len(),
            latency_ms = result.processing_time_ms,
            "OCR completed"
        );
        Ok(result)
    }

    fn capabilities(&self) -> OcrCapabilities {
        OcrCapabilities {
            provider: "google_vision",
            leading_full_text_block: true,
        }
    }
}
