//! Application state module
//!
//! Defines shared state accessible across all request handlers and wires the
//! pipeline collaborators from configuration.

use std::sync::Arc;

use icr_core::{
    CardMatcher, GoogleVisionConfig, GoogleVisionProvider, IcrError, IcrPipeline,
    InMemoryCatalog, LocalFileStorage, MockOcrProvider, OcrProvider, SlidingWindowLimiter,
};
use thiserror::Error;

use crate::config::Config;
use crate::db::{
    self, DatabaseError, PgGradedCardSink, PgScanRepository, PgStitchedLabelRepository,
};
use crate::validation::DEFAULT_MAX_FILE_SIZE;

/// Errors that prevent the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("Failed to load card catalog from {path}: {reason}")]
    Catalog { path: String, reason: String },

    #[error("No OCR provider: set GOOGLE_VISION_API_KEY or ALLOW_MOCK_OCR=true")]
    OcrUnavailable,

    #[error(transparent)]
    Pipeline(#[from] IcrError),
}

/// Application state containing shared resources.
#[derive(Clone)]
pub struct AppState {
    /// The ICR pipeline every handler delegates to
    pub pipeline: Arc<IcrPipeline>,
    /// Maximum size of one uploaded image in bytes
    pub max_file_size: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<IcrPipeline>) -> Self {
        Self {
            pipeline,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub fn with_max_file_size(mut self, max_file_size: usize) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    /// Build the pipeline described by `config`.
    ///
    /// Postgres repositories when `DATABASE_URL` is set, local disk storage
    /// when `STORAGE_DIR` is set; in-memory collaborators otherwise.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let mut builder = IcrPipeline::builder()
            .config(config.pipeline_config())
            .ocr_provider(ocr_provider(config)?)
            .rate_limiter(Arc::new(SlidingWindowLimiter::per_minute(
                config.ocr_calls_per_minute,
            )))
            .matcher(CardMatcher::default().with_top_n(config.match_top_n));

        match &config.database_url {
            Some(url) => {
                let pool = db::connect(url, config).await?;
                builder = builder
                    .scan_repository(Arc::new(PgScanRepository::new(pool.clone())))
                    .stitched_repository(Arc::new(PgStitchedLabelRepository::new(pool.clone())))
                    .collection(Arc::new(PgGradedCardSink::new(pool)));
            }
            None => tracing::warn!("DATABASE_URL not set, records are kept in memory"),
        }

        match &config.storage_dir {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "Storing images on local disk");
                builder = builder.storage(Arc::new(LocalFileStorage::new(dir.clone())));
            }
            None => tracing::warn!("STORAGE_DIR not set, images are kept in memory"),
        }

        match &config.card_catalog_path {
            Some(path) => {
                let json = tokio::fs::read_to_string(path).await.map_err(|e| {
                    StartupError::Catalog {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                let catalog =
                    InMemoryCatalog::from_json(&json).map_err(|e| StartupError::Catalog {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                tracing::info!(cards = catalog.len(), "Card catalog loaded");
                builder = builder.catalog(Arc::new(catalog));
            }
            None => tracing::warn!("CARD_CATALOG_PATH not set, matching will find no cards"),
        }

        let pipeline = builder.build()?;
        Ok(Self::new(Arc::new(pipeline)).with_max_file_size(config.max_file_size()))
    }
}

fn ocr_provider(config: &Config) -> Result<Arc<dyn OcrProvider>, StartupError> {
    if let Some(api_key) = &config.google_vision_api_key {
        tracing::info!("OCR provider: Google Vision");
        let provider = GoogleVisionProvider::new(GoogleVisionConfig::new(api_key.clone()))?;
        return Ok(Arc::new(provider));
    }

    if config.allow_mock_ocr {
        tracing::warn!("OCR provider: mock (returns no text)");
        return Ok(Arc::new(MockOcrProvider::empty().with_full_text_block(true)));
    }

    Err(StartupError::OcrUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_default_config_uses_memory_backends() {
        let state = AppState::from_config(&Config::default()).await.unwrap();
        assert_eq!(state.max_file_size, Config::default().max_file_size());
        assert_eq!(state.pipeline.ocr_capabilities().provider, "mock");
    }

    #[tokio::test]
    async fn test_mock_ocr_must_be_allowed() {
        let config = Config {
            allow_mock_ocr: false,
            ..Config::default()
        };
        assert!(matches!(
            AppState::from_config(&config).await,
            Err(StartupError::OcrUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_missing_catalog_file_fails_startup() {
        let config = Config {
            card_catalog_path: Some("/nonexistent/catalog.json".into()),
            ..Config::default()
        };
        assert!(matches!(
            AppState::from_config(&config).await,
            Err(StartupError::Catalog { .. })
        ));
    }
}
