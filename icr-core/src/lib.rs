//! ICR Core - Intelligent Character Recognition for PSA graded card labels
//!
//! This crate turns photos of graded card slabs into identified catalog cards.
//! Labels are cropped from each photo, stitched into one composite so that a
//! batch costs a single OCR call, and the OCR text is mapped back to each
//! label by geometry before being parsed and matched against a card catalog.
//!
//! # Features
//!
//! - Content-hash deduplication of uploads and stitched composites
//! - Vertical label stitching with a position table for text distribution
//! - Pluggable OCR providers (Google Vision, deterministic mock) behind a
//!   process-wide sliding-window rate limiter
//! - PSA label tokenizer anchored on year and certification number
//! - Weighted, explainable card matching
//! - Explicit state machines for scans and stitched labels
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use icr_core::{IcrPipeline, MockOcrProvider, UploadImage};
//!
//! # async fn example(images: Vec<Vec<u8>>) -> icr_core::Result<()> {
//! let pipeline = IcrPipeline::builder()
//!     .ocr_provider(Arc::new(MockOcrProvider::empty()))
//!     .build()?;
//!
//! let uploads = images
//!     .into_iter()
//!     .map(|bytes| UploadImage::new(bytes, None))
//!     .collect();
//! let batch = pipeline.upload_batch(uploads, None).await?;
//! let ids: Vec<_> = batch.result.successful.iter().map(|u| u.scan.id).collect();
//!
//! pipeline.extract_labels(&ids).await?;
//! let stitched = pipeline.stitch(&ids).await?;
//! pipeline.run_ocr(stitched.stitched.id()).await?;
//! let matched = pipeline.match_scans(&ids).await?;
//! println!("{} scans matched", matched.successful.len());
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod distribute;
pub mod error;
pub mod hashing;
pub mod imaging;
pub mod matching;
pub mod model;
pub mod ocr;
pub mod parsing;
pub mod pipeline;
pub mod repository;
pub mod storage;

// Re-export main types for convenience
pub use collection::{GradedCardDraft, GradedCardSink, InMemoryCollection};
pub use distribute::{reading_lines, DistributionResult, LabelText, OcrSegment, OcrTextDistributor};
pub use error::{IcrError, Result};
pub use hashing::{content_hash, label_set_hash};
pub use imaging::{
    ExtractedLabel, LabelExtractor, LabelPosition, LabelRegion, StitchConfig, StitchedImage,
    StitchingEngine,
};
pub use matching::{
    CardCatalog, CardMatch, CardMatcher, CatalogCard, InMemoryCatalog, MatchScores, MatchWeights,
};
pub use model::{
    DistributionMetrics, GradedCardScan, MatchingStatus, NewStitchedLabel, ScanStatus,
    StitchStatus, StitchedLabel, StitchedOcr, VerificationFlags,
};
#[cfg(feature = "google-vision")]
pub use ocr::{GoogleVisionConfig, GoogleVisionProvider};
pub use ocr::{
    MockOcrProvider, OcrCapabilities, OcrProvider, OcrResponse, RateLimiter,
    SlidingWindowLimiter, TextAnnotation, Vertex,
};
pub use parsing::{parse_label, ExtractedFields, Language, ParsedLabel, PsaLabelParser};
pub use pipeline::{
    BatchFailure, BatchResult, IcrPipeline, IcrPipelineBuilder, OcrOutcome, PipelineConfig,
    StatusSummary, StitchOutcome, UploadBatchOutcome, UploadImage, UploadOutcome,
};
pub use repository::{
    InMemoryScanRepository, InMemoryStitchedLabelRepository, Page, Pagination, RepositoryError,
    ScanRepository, StitchedLabelRepository,
};
pub use storage::{FileStorage, InMemoryFileStorage, LocalFileStorage, StorageError, StorageRef};
