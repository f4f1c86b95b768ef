//! Mock OCR provider for testing and offline runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{OcrCapabilities, OcrProvider, OcrResponse};
use crate::error::{IcrError, Result};

/// Returns a scripted response for every call.
/// WARNING: never inspects the image - for tests and demos only!
pub struct MockOcrProvider {
    response: OcrResponse,
    leading_full_text_block: bool,
    failure: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockOcrProvider {
    pub fn new(response: OcrResponse) -> Self {
        Self {
            response,
            leading_full_text_block: false,
            failure: None,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider that never finds any text.
    pub fn empty() -> Self {
        Self::new(OcrResponse::default())
    }

    /// A provider whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::empty()
        }
    }

    /// Treat annotation 0 as a full-text block, like Google Vision does.
    pub fn with_full_text_block(mut self, enabled: bool) -> Self {
        self.leading_full_text_block = enabled;
        self
    }

    /// Sleep before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `extract_text` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockOcrProvider {
    fn default() -> Self {
        Self::empty()
    }
}

#[async_trait]
impl OcrProvider for MockOcrProvider {
    async fn extract_text(&self, image: &[u8]) -> Result<OcrResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if image.is_empty() {
            return Err(IcrError::ExternalProvider("empty image payload".into()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(IcrError::ExternalProvider(message.clone()));
        }

        Ok(self.response.clone())
    }

    fn capabilities(&self) -> OcrCapabilities {
        OcrCapabilities {
            provider: "mock",
            leading_full_text_block: self.leading_full_text_block,
        }
    }
}
