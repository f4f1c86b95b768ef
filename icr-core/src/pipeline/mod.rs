//! `IcrPipeline`: upload, extract, stitch, OCR, match and review.
//!
//! Each stage owns exactly one status transition and writes only the fields
//! that transition produces. Stages over many scans run per item and report
//! `{successful, failed}` instead of aborting on the first bad scan. Stage
//! level failures (provider down, storage unreachable) abort the call and are
//! never retried here.

mod batch;
mod locks;

pub use batch::{BatchFailure, BatchResult};
pub use locks::{KeyedGuard, KeyedLocks};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::collection::{GradedCardDraft, GradedCardSink, InMemoryCollection};
use crate::distribute::{reading_lines, LabelText, OcrTextDistributor};
use crate::error::{IcrError, Result};
use crate::hashing::{content_hash, label_set_hash};
use crate::imaging::{
    sniff_extension, LabelExtractor, LabelRegion, StitchConfig, StitchingEngine,
};
use crate::matching::{CardCatalog, CardMatch, CardMatcher, InMemoryCatalog};
use crate::model::{
    DistributionMetrics, GradedCardScan, NewStitchedLabel, ScanStatus, StitchStatus,
    StitchedLabel, StitchedOcr,
};
use crate::ocr::{
    acquire_permit, OcrCapabilities, OcrProvider, RateLimiter, SlidingWindowLimiter,
};
use crate::parsing::{parse_label, PsaLabelParser};
use crate::repository::{
    InMemoryScanRepository, InMemoryStitchedLabelRepository, Page, Pagination, RepositoryError,
    ScanRepository, StitchedLabelRepository,
};
use crate::storage::{FileStorage, InMemoryFileStorage};

pub const DEFAULT_MAX_LABELS_PER_STITCH: usize = 50;
pub const DEFAULT_OCR_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_RATE_LIMIT_MAX_WAIT: Duration = Duration::from_secs(60);
pub const DEFAULT_OCR_CALLS_PER_MINUTE: usize = 60;
pub const MAX_BATCH_ID_LEN: usize = 64;

/// Library-level pipeline tunables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub label_region: LabelRegion,
    pub stitch: StitchConfig,
    pub max_labels_per_stitch: usize,
    /// Hard bound on a single OCR provider call.
    pub ocr_timeout: Duration,
    /// How long an OCR call may queue behind the rate limiter.
    pub rate_limit_max_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label_region: LabelRegion::default(),
            stitch: StitchConfig::default(),
            max_labels_per_stitch: DEFAULT_MAX_LABELS_PER_STITCH,
            ocr_timeout: DEFAULT_OCR_TIMEOUT,
            rate_limit_max_wait: DEFAULT_RATE_LIMIT_MAX_WAIT,
        }
    }
}

/// One image handed to [`IcrPipeline::upload`].
#[derive(Debug, Clone)]
pub struct UploadImage {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

impl UploadImage {
    pub fn new(bytes: impl Into<Vec<u8>>, filename: Option<String>) -> Self {
        Self {
            bytes: bytes.into(),
            filename,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub scan: GradedCardScan,
    /// The bytes were already uploaded; `scan` is the existing record.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadBatchOutcome {
    pub batch_id: String,
    #[serde(flatten)]
    pub result: BatchResult<UploadOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchOutcome {
    pub stitched: StitchedLabel,
    /// The label set (or composite) already existed; nothing was created.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrOutcome {
    pub stitched: StitchedLabel,
    pub scans: BatchResult<GradedCardScan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub scans: BTreeMap<String, u64>,
    pub stitched: BTreeMap<String, u64>,
    pub total_scans: u64,
    pub total_stitched: u64,
}

pub struct IcrPipeline {
    scans: Arc<dyn ScanRepository>,
    stitched: Arc<dyn StitchedLabelRepository>,
    storage: Arc<dyn FileStorage>,
    ocr: Arc<dyn OcrProvider>,
    limiter: Arc<dyn RateLimiter>,
    catalog: Arc<dyn CardCatalog>,
    collection: Arc<dyn GradedCardSink>,
    extractor: LabelExtractor,
    stitcher: StitchingEngine,
    parser: PsaLabelParser,
    matcher: CardMatcher,
    locks: KeyedLocks,
    config: PipelineConfig,
}

impl IcrPipeline {
    pub fn builder() -> IcrPipelineBuilder {
        IcrPipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ocr_capabilities(&self) -> OcrCapabilities {
        self.ocr.capabilities()
    }

    // --- upload ---------------------------------------------------------

    /// Store one image and create its scan, or return the existing scan for
    /// identical bytes.
    #[instrument(skip_all, fields(size = image.bytes.len()))]
    pub async fn upload(
        &self,
        image: UploadImage,
        batch_id: Option<&str>,
    ) -> Result<UploadOutcome> {
        let batch_id = resolve_batch_id(batch_id)?;
        self.upload_into(image, &batch_id).await
    }

    #[instrument(skip_all, fields(count = images.len()))]
    pub async fn upload_batch(
        &self,
        images: Vec<UploadImage>,
        batch_id: Option<&str>,
    ) -> Result<UploadBatchOutcome> {
        if images.is_empty() {
            return Err(IcrError::Validation("no images provided".into()));
        }
        let batch_id = resolve_batch_id(batch_id)?;

        let labels: Vec<String> = images
            .iter()
            .enumerate()
            .map(|(i, image)| image.filename.clone().unwrap_or_else(|| format!("image[{i}]")))
            .collect();
        let uploads = images
            .into_iter()
            .map(|image| self.upload_into(image, &batch_id));
        let outcomes = join_all(uploads).await;

        let mut result = BatchResult::new();
        for (label, outcome) in labels.into_iter().zip(outcomes) {
            if let Err(err) = &outcome {
                warn!(file = %label, error = %err, "Upload failed");
            }
            result.push(label, outcome);
        }
        info!(
            batch_id = %batch_id,
            successful = result.successful.len(),
            failed = result.failed.len(),
            "Upload batch finished"
        );
        Ok(UploadBatchOutcome { batch_id, result })
    }

    async fn upload_into(&self, image: UploadImage, batch_id: &str) -> Result<UploadOutcome> {
        let hash = content_hash(&image.bytes)?;
        if let Some(existing) = self.scans.find_by_hash(&hash).await? {
            debug!(scan_id = %existing.id, "Duplicate upload");
            return Ok(UploadOutcome {
                scan: existing,
                duplicate: true,
            });
        }

        let path = format!("scans/{batch_id}/{hash}.{}", sniff_extension(&image.bytes));
        let reference = self.storage.store(&image.bytes, &path).await?;
        let scan = GradedCardScan::new(
            hash.clone(),
            reference.clone(),
            batch_id,
            image.filename,
            image.bytes.len() as u64,
        );

        match self.scans.create(&scan).await {
            Ok(()) => {
                info!(scan_id = %scan.id, batch_id, "Scan uploaded");
                Ok(UploadOutcome {
                    scan,
                    duplicate: false,
                })
            }
            // Lost a race with a concurrent upload of the same bytes.
            Err(RepositoryError::Duplicate(_)) => {
                let existing = self
                    .scans
                    .find_by_hash(&hash)
                    .await?
                    .ok_or_else(|| IcrError::NotFound(format!("scan with hash {hash}")))?;
                if existing.full_image != reference {
                    self.storage.delete(&reference).await?;
                }
                Ok(UploadOutcome {
                    scan: existing,
                    duplicate: true,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    // --- extraction -----------------------------------------------------

    /// Crop and hash the label of each scan. Scans are independent and run
    /// concurrently; a corrupt image fails only its own scan.
    #[instrument(skip_all, fields(count = scan_ids.len()))]
    pub async fn extract_labels(&self, scan_ids: &[Uuid]) -> Result<BatchResult<GradedCardScan>> {
        let ids = unique_ids(scan_ids)?;
        let started = Instant::now();

        let outcomes = join_all(ids.iter().map(|&id| self.extract_one(id))).await;
        let result = collect_batch(&ids, outcomes, "Label extraction failed");

        info!(
            successful = result.successful.len(),
            failed = result.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Label extraction finished"
        );
        Ok(result)
    }

    async fn extract_one(&self, id: Uuid) -> Result<GradedCardScan> {
        let _guard = self.locks.lock(&scan_key(id)).await;
        let mut scan = self.load_scan(id).await?;
        scan.ensure_transition(ScanStatus::Extracted)?;

        let bytes = self.storage.read(&scan.full_image).await?;
        let extractor = self.extractor.clone();
        let label = run_blocking(move || extractor.extract(&bytes)).await?;

        let reference = self
            .storage
            .store(&label.bytes, &format!("labels/{}.png", label.hash))
            .await?;
        scan.record_extraction(reference, label.hash)?;
        self.scans.update(&scan).await?;

        debug!(scan_id = %id, width = label.width, height = label.height, "Label extracted");
        Ok(scan)
    }

    // --- stitching ------------------------------------------------------

    /// Compose the extracted labels of `scan_ids`, in order, into one
    /// composite.
    ///
    /// Every scan must carry an extracted label. A label set that was
    /// stitched before is returned with `duplicate: true` whatever state its
    /// scans are in now. Only a new composite requires every scan to accept
    /// the `stitched` transition. Requests for the same ordered label set
    /// are serialized, and any decode failure aborts the whole stitch.
    #[instrument(skip_all, fields(label_count = scan_ids.len()))]
    pub async fn stitch(&self, scan_ids: &[Uuid]) -> Result<StitchOutcome> {
        if scan_ids.is_empty() {
            return Err(IcrError::Validation("no scan ids provided".into()));
        }
        if scan_ids.len() > self.config.max_labels_per_stitch {
            return Err(IcrError::Validation(format!(
                "cannot stitch {} labels, the limit is {}",
                scan_ids.len(),
                self.config.max_labels_per_stitch
            )));
        }
        let mut seen = HashSet::with_capacity(scan_ids.len());
        if let Some(dup) = scan_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(IcrError::Validation(format!("scan {dup} listed twice")));
        }

        let mut label_hashes = Vec::with_capacity(scan_ids.len());
        let mut label_images = Vec::with_capacity(scan_ids.len());
        let mut batch_id = None;
        for &id in scan_ids {
            let scan = self.load_scan(id).await?;
            let (Some(hash), Some(image)) = (scan.label_hash.clone(), scan.label_image.clone())
            else {
                scan.ensure_transition(ScanStatus::Stitched)?;
                return Err(IcrError::Validation(format!("scan {id} has no extracted label")));
            };
            label_hashes.push(hash);
            label_images.push(image);
            batch_id.get_or_insert(scan.batch_id);
        }

        let set_hash = label_set_hash(&label_hashes);
        let _guard = self.locks.lock(&format!("label-set:{set_hash}")).await;

        if let Some(existing) = self.stitched.find_by_label_set(&set_hash).await? {
            info!(stitched_id = %existing.id(), "Label set already stitched");
            return self.existing_composite(existing).await;
        }

        let started = Instant::now();
        let images = try_join_all(label_images.iter().map(|r| self.storage.read(r))).await?;
        let engine = self.stitcher.clone();
        let composite = run_blocking(move || engine.stitch(&images)).await?;
        let image_hash = content_hash(&composite.bytes)?;

        if let Some(existing) = self.stitched.find_by_hash(&image_hash).await? {
            info!(stitched_id = %existing.id(), "Identical composite already stored");
            return self.existing_composite(existing).await;
        }

        // Scans stay locked from validation until they point at the new
        // composite, so none can be deleted or advanced in between.
        let mut lock_order = scan_ids.to_vec();
        lock_order.sort_unstable();
        let mut scan_guards = Vec::with_capacity(lock_order.len());
        for &id in &lock_order {
            scan_guards.push(self.locks.lock(&scan_key(id)).await);
        }
        let mut scans = Vec::with_capacity(scan_ids.len());
        for (&id, hash) in scan_ids.iter().zip(&label_hashes) {
            let scan = self.load_scan(id).await?;
            scan.ensure_transition(ScanStatus::Stitched)?;
            if scan.label_hash.as_ref() != Some(hash) {
                return Err(IcrError::Validation(format!(
                    "label of scan {id} changed while stitching"
                )));
            }
            scans.push(scan);
        }

        let image = self
            .storage
            .store(&composite.bytes, &format!("stitched/{image_hash}.png"))
            .await?;
        let label = StitchedLabel::new(NewStitchedLabel {
            image_hash,
            image,
            width: composite.width,
            height: composite.height,
            positions: composite.positions,
            label_hashes,
            scan_ids: scan_ids.to_vec(),
            batch_id: batch_id.unwrap_or_default(),
        })?;

        match self.stitched.create(&label).await {
            Ok(()) => {}
            Err(RepositoryError::Duplicate(reason)) => {
                // Another process won the race for this label set.
                drop(scan_guards);
                return match self.stitched.find_by_label_set(&set_hash).await? {
                    Some(existing) => self.existing_composite(existing).await,
                    None => Err(RepositoryError::Duplicate(reason).into()),
                };
            }
            Err(err) => return Err(err.into()),
        }

        for mut scan in scans {
            scan.mark_stitched(label.id())?;
            self.scans.update(&scan).await?;
        }
        drop(scan_guards);

        info!(
            stitched_id = %label.id(),
            label_count = label.label_count(),
            width = composite.width,
            height = composite.height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Labels stitched"
        );
        Ok(StitchOutcome {
            stitched: label,
            duplicate: false,
        })
    }

    /// Hand back a composite that already exists for the requested labels.
    ///
    /// While it still awaits OCR, its scans that were since re-stitched into
    /// another composite are pointed back at it, so its OCR run feeds every
    /// position.
    async fn existing_composite(&self, existing: StitchedLabel) -> Result<StitchOutcome> {
        if existing.status() == StitchStatus::Stitched {
            for &id in existing.scan_ids() {
                let _scan_guard = self.locks.lock(&scan_key(id)).await;
                let Some(mut scan) = self.scans.find_by_id(id).await? else {
                    continue;
                };
                if scan.processing_status == ScanStatus::Stitched
                    && scan.stitched_label_id != Some(existing.id())
                {
                    scan.mark_stitched(existing.id())?;
                    self.scans.update(&scan).await?;
                    debug!(scan_id = %id, stitched_id = %existing.id(), "Scan reattached");
                }
            }
        }
        Ok(StitchOutcome {
            stitched: existing,
            duplicate: true,
        })
    }

    // --- OCR ------------------------------------------------------------

    /// Run OCR once on a composite and distribute the text to its scans.
    ///
    /// The provider call waits for the process-wide rate limiter and is
    /// bounded by `ocr_timeout`; expiry is a hard `ExternalProvider` failure.
    #[instrument(skip_all, fields(stitched_id = %stitched_id))]
    pub async fn run_ocr(&self, stitched_id: Uuid) -> Result<OcrOutcome> {
        let _guard = self.locks.lock(&format!("ocr:{stitched_id}")).await;
        let mut label = self.load_stitched(stitched_id).await?;
        label.ensure_transition(StitchStatus::OcrComplete)?;

        let mut awaiting = 0;
        for &scan_id in label.scan_ids() {
            if let Some(scan) = self.scans.find_by_id(scan_id).await? {
                if scan.processing_status == ScanStatus::Stitched
                    && scan.stitched_label_id == Some(stitched_id)
                {
                    awaiting += 1;
                }
            }
        }
        if awaiting == 0 {
            return Err(IcrError::Validation(format!(
                "no scan of stitched label {stitched_id} is waiting for OCR"
            )));
        }

        let image = self.storage.read(label.image()).await?;
        let capabilities = self.ocr.capabilities();
        let started = Instant::now();

        let response = {
            let _permit =
                acquire_permit(self.limiter.as_ref(), self.config.rate_limit_max_wait).await?;
            match timeout(self.config.ocr_timeout, self.ocr.extract_text(&image)).await {
                Ok(response) => response?,
                Err(_) => {
                    warn!(
                        provider = capabilities.provider,
                        timeout_secs = self.config.ocr_timeout.as_secs(),
                        "OCR call timed out"
                    );
                    return Err(IcrError::ExternalProvider(format!(
                        "OCR call timed out after {}s",
                        self.config.ocr_timeout.as_secs()
                    )));
                }
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let distribution = OcrTextDistributor::for_provider(capabilities)
            .distribute(&response.raw_annotations, label.positions());

        label.record_ocr(StitchedOcr {
            provider: capabilities.provider.to_string(),
            full_text: response.full_text,
            confidence: distribution.overall_confidence,
            annotations: response.raw_annotations,
            metrics: DistributionMetrics {
                total_annotations: distribution.total_annotations,
                distributed_annotations: distribution.distributed_annotations,
                skipped_annotations: distribution.skipped_annotations,
                average_confidence: distribution.overall_confidence,
                processing_time_ms: if response.processing_time_ms > 0 {
                    response.processing_time_ms
                } else {
                    elapsed_ms
                },
            },
            completed_at: Utc::now(),
        })?;
        self.stitched.update(&label).await?;

        let ids: Vec<Uuid> = label.scan_ids().to_vec();
        let writes = ids
            .iter()
            .zip(distribution.label_texts)
            .map(|(&scan_id, text)| self.record_scan_text(scan_id, label.id(), text));
        let outcomes = join_all(writes).await;
        let scans = collect_batch(&ids, outcomes, "Recording OCR text failed");

        info!(
            provider = capabilities.provider,
            annotations = distribution.total_annotations,
            skipped = distribution.skipped_annotations,
            confidence = distribution.overall_confidence,
            elapsed_ms,
            "OCR complete"
        );
        Ok(OcrOutcome {
            stitched: label,
            scans,
        })
    }

    async fn record_scan_text(
        &self,
        scan_id: Uuid,
        stitched_id: Uuid,
        text: LabelText,
    ) -> Result<GradedCardScan> {
        let _guard = self.locks.lock(&scan_key(scan_id)).await;
        let mut scan = self.load_scan(scan_id).await?;
        if scan.stitched_label_id != Some(stitched_id) {
            return Err(IcrError::Validation(format!(
                "scan {scan_id} now belongs to another composite"
            )));
        }

        let lines = reading_lines(&text.segments);
        let fields = parse_label(&self.parser, &lines);
        debug!(
            scan_id = %scan_id,
            lines = lines.len(),
            year = ?fields.year,
            cert = ?fields.cert_number,
            "Parsed label text"
        );

        scan.record_ocr(text.text, text.confidence, text.segments, fields)?;
        self.scans.update(&scan).await?;
        Ok(scan)
    }

    // --- matching -------------------------------------------------------

    /// Rank catalog candidates for each scan. Zero candidates is a normal
    /// outcome (`matching_status = no_match`), not a failure.
    #[instrument(skip_all, fields(count = scan_ids.len()))]
    pub async fn match_scans(&self, scan_ids: &[Uuid]) -> Result<BatchResult<GradedCardScan>> {
        let ids = unique_ids(scan_ids)?;
        let outcomes = join_all(ids.iter().map(|&id| self.match_one(id))).await;
        let result = collect_batch(&ids, outcomes, "Matching failed");

        let composites: BTreeSet<Uuid> = result
            .successful
            .iter()
            .filter_map(|scan| scan.stitched_label_id)
            .collect();
        for stitched_id in composites {
            if let Err(err) = self.complete_stitched(stitched_id).await {
                warn!(
                    stitched_id = %stitched_id,
                    error = %err,
                    "Could not complete stitched label"
                );
            }
        }

        info!(
            successful = result.successful.len(),
            failed = result.failed.len(),
            "Matching finished"
        );
        Ok(result)
    }

    async fn match_one(&self, id: Uuid) -> Result<GradedCardScan> {
        let _guard = self.locks.lock(&scan_key(id)).await;
        let mut scan = self.load_scan(id).await?;
        scan.ensure_transition(ScanStatus::Matched)?;

        let fields = scan.extracted.clone().unwrap_or_default();
        let candidates = self.matcher.find_matches(self.catalog.as_ref(), &fields).await?;
        scan.record_matches(candidates)?;
        self.scans.update(&scan).await?;
        Ok(scan)
    }

    /// Advance a composite to `matched` once none of its scans is waiting
    /// for matching. Returns whether it advanced.
    async fn complete_stitched(&self, stitched_id: Uuid) -> Result<bool> {
        let label = self.load_stitched(stitched_id).await?;
        if label.status() != StitchStatus::OcrComplete {
            return Ok(false);
        }
        for &scan_id in label.scan_ids() {
            if let Some(scan) = self.scans.find_by_id(scan_id).await? {
                if !has_left_ocr(scan.processing_status) {
                    return Ok(false);
                }
            }
        }

        label.ensure_transition(StitchStatus::Matched)?;
        self.stitched
            .update_status(stitched_id, StitchStatus::Matched)
            .await?;
        info!(stitched_id = %stitched_id, "Stitched label matched");
        Ok(true)
    }

    // --- review ---------------------------------------------------------

    /// Operator picks a card: one of the candidates, or any catalog card
    /// (recorded as a manual override).
    #[instrument(skip(self), fields(scan_id = %scan_id))]
    pub async fn select_match(&self, scan_id: Uuid, card_id: &str) -> Result<GradedCardScan> {
        let card_id = card_id.trim();
        if card_id.is_empty() {
            return Err(IcrError::Validation("card id is required".into()));
        }

        let _guard = self.locks.lock(&scan_key(scan_id)).await;
        let mut scan = self.load_scan(scan_id).await?;
        scan.ensure_transition(ScanStatus::Confirmed)?;

        let selected = match scan.candidates.iter().find(|c| c.card_id == card_id) {
            Some(candidate) => candidate.clone(),
            None => {
                let card = self
                    .catalog
                    .get(card_id)
                    .await?
                    .ok_or_else(|| IcrError::NotFound(format!("catalog card {card_id}")))?;
                CardMatch::manual(&card)
            }
        };

        scan.select_match(selected)?;
        self.scans.update(&scan).await?;
        info!(card_id, matching_status = ?scan.matching_status, "Match selected");
        Ok(scan)
    }

    /// Create the graded-card record from the selected (or top) match.
    #[instrument(skip(self), fields(scan_id = %scan_id))]
    pub async fn approve(&self, scan_id: Uuid) -> Result<GradedCardScan> {
        let _guard = self.locks.lock(&scan_key(scan_id)).await;
        let mut scan = self.load_scan(scan_id).await?;
        scan.ensure_transition(ScanStatus::CardCreated)?;

        let chosen = scan.approval_match().cloned().ok_or_else(|| {
            IcrError::Validation(format!("scan {scan_id} has no match to approve"))
        })?;
        let draft = GradedCardDraft::from_scan(&scan, &chosen);
        let graded_card_id = self.collection.create_graded_card(&draft).await?;

        scan.mark_card_created(graded_card_id.clone())?;
        self.scans.update(&scan).await?;
        info!(graded_card_id = %graded_card_id, card_id = %chosen.card_id, "Graded card created");
        Ok(scan)
    }

    #[instrument(skip(self), fields(scan_id = %scan_id))]
    pub async fn deny(&self, scan_id: Uuid) -> Result<GradedCardScan> {
        let _guard = self.locks.lock(&scan_key(scan_id)).await;
        let mut scan = self.load_scan(scan_id).await?;
        scan.deny()?;
        self.scans.update(&scan).await?;
        info!("Scan denied");
        Ok(scan)
    }

    #[instrument(skip(self), fields(scan_id = %scan_id))]
    pub async fn mark_no_match(&self, scan_id: Uuid) -> Result<GradedCardScan> {
        let _guard = self.locks.lock(&scan_key(scan_id)).await;
        let mut scan = self.load_scan(scan_id).await?;
        scan.mark_no_match()?;
        self.scans.update(&scan).await?;
        info!("Scan marked as no match");
        Ok(scan)
    }

    /// Delete a scan and its stored images. Files go first so a storage
    /// failure leaves the record in place.
    #[instrument(skip(self), fields(scan_id = %scan_id))]
    pub async fn delete_scan(&self, scan_id: Uuid) -> Result<()> {
        let _guard = self.locks.lock(&scan_key(scan_id)).await;
        let scan = self.load_scan(scan_id).await?;

        self.storage.delete(&scan.full_image).await?;
        if let Some(label) = &scan.label_image {
            self.storage.delete(label).await?;
        }
        if !self.scans.delete(scan_id).await? {
            return Err(IcrError::NotFound(format!("scan {scan_id}")));
        }
        info!("Scan deleted");
        Ok(())
    }

    // --- queries --------------------------------------------------------

    pub async fn get_scan(&self, scan_id: Uuid) -> Result<GradedCardScan> {
        self.load_scan(scan_id).await
    }

    pub async fn list_scans(
        &self,
        status: Option<ScanStatus>,
        pagination: Pagination,
    ) -> Result<Page<GradedCardScan>> {
        Ok(self.scans.find_many_by_status(status, pagination).await?)
    }

    pub async fn get_stitched(&self, stitched_id: Uuid) -> Result<StitchedLabel> {
        self.load_stitched(stitched_id).await
    }

    pub async fn list_stitched(
        &self,
        status: Option<StitchStatus>,
        pagination: Pagination,
    ) -> Result<Page<StitchedLabel>> {
        Ok(self.stitched.find_many_by_status(status, pagination).await?)
    }

    pub async fn status_summary(&self) -> Result<StatusSummary> {
        let scan_counts = self.scans.count_by_status().await?;
        let stitched_counts = self.stitched.count_by_status().await?;

        Ok(StatusSummary {
            total_scans: scan_counts.iter().map(|(_, n)| n).sum(),
            total_stitched: stitched_counts.iter().map(|(_, n)| n).sum(),
            scans: scan_counts
                .into_iter()
                .map(|(status, n)| (status.to_string(), n))
                .collect(),
            stitched: stitched_counts
                .into_iter()
                .map(|(status, n)| (status.to_string(), n))
                .collect(),
        })
    }

    async fn load_scan(&self, id: Uuid) -> Result<GradedCardScan> {
        self.scans
            .find_by_id(id)
            .await?
            .ok_or_else(|| IcrError::NotFound(format!("scan {id}")))
    }

    async fn load_stitched(&self, id: Uuid) -> Result<StitchedLabel> {
        self.stitched
            .find_by_id(id)
            .await?
            .ok_or_else(|| IcrError::NotFound(format!("stitched label {id}")))
    }
}

/// Builds an [`IcrPipeline`]. Only the OCR provider is required; every other
/// collaborator defaults to its in-memory implementation.
#[derive(Default)]
pub struct IcrPipelineBuilder {
    config: PipelineConfig,
    scans: Option<Arc<dyn ScanRepository>>,
    stitched: Option<Arc<dyn StitchedLabelRepository>>,
    storage: Option<Arc<dyn FileStorage>>,
    ocr: Option<Arc<dyn OcrProvider>>,
    limiter: Option<Arc<dyn RateLimiter>>,
    catalog: Option<Arc<dyn CardCatalog>>,
    collection: Option<Arc<dyn GradedCardSink>>,
    matcher: CardMatcher,
    parser: PsaLabelParser,
}

impl IcrPipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn scan_repository(mut self, repo: Arc<dyn ScanRepository>) -> Self {
        self.scans = Some(repo);
        self
    }

    pub fn stitched_repository(mut self, repo: Arc<dyn StitchedLabelRepository>) -> Self {
        self.stitched = Some(repo);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn FileStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn ocr_provider(mut self, provider: Arc<dyn OcrProvider>) -> Self {
        self.ocr = Some(provider);
        self
    }

    /// Share one limiter between pipelines to keep the rate process-wide.
    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CardCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn collection(mut self, collection: Arc<dyn GradedCardSink>) -> Self {
        self.collection = Some(collection);
        self
    }

    pub fn matcher(mut self, matcher: CardMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn parser(mut self, parser: PsaLabelParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn build(self) -> Result<IcrPipeline> {
        let ocr = self
            .ocr
            .ok_or_else(|| IcrError::Validation("an OCR provider is required".into()))?;
        if self.config.max_labels_per_stitch == 0 {
            return Err(IcrError::Validation(
                "max_labels_per_stitch must be at least 1".into(),
            ));
        }

        Ok(IcrPipeline {
            scans: self
                .scans
                .unwrap_or_else(|| Arc::new(InMemoryScanRepository::new())),
            stitched: self
                .stitched
                .unwrap_or_else(|| Arc::new(InMemoryStitchedLabelRepository::new())),
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(InMemoryFileStorage::new())),
            ocr,
            limiter: self.limiter.unwrap_or_else(|| {
                Arc::new(SlidingWindowLimiter::per_minute(DEFAULT_OCR_CALLS_PER_MINUTE))
            }),
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(InMemoryCatalog::default())),
            collection: self
                .collection
                .unwrap_or_else(|| Arc::new(InMemoryCollection::new())),
            extractor: LabelExtractor::new(self.config.label_region)?,
            stitcher: StitchingEngine::new(self.config.stitch.clone()),
            parser: self.parser,
            matcher: self.matcher,
            locks: KeyedLocks::new(),
            config: self.config,
        })
    }
}

/// Batch ids end up in storage paths, so keep them to a safe alphabet.
pub fn validate_batch_id(batch_id: &str) -> Result<()> {
    let valid_chars = batch_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if batch_id.is_empty() || batch_id.len() > MAX_BATCH_ID_LEN || !valid_chars {
        return Err(IcrError::Validation(format!(
            "batch id must be 1-{MAX_BATCH_ID_LEN} characters of [A-Za-z0-9_-], got '{batch_id}'"
        )));
    }
    Ok(())
}

pub fn new_batch_id() -> String {
    format!("batch_{}", Uuid::new_v4().simple())
}

fn resolve_batch_id(batch_id: Option<&str>) -> Result<String> {
    match batch_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => {
            validate_batch_id(id)?;
            Ok(id.to_string())
        }
        None => Ok(new_batch_id()),
    }
}

fn scan_key(id: Uuid) -> String {
    format!("scan:{id}")
}

fn has_left_ocr(status: ScanStatus) -> bool {
    matches!(
        status,
        ScanStatus::Matched
            | ScanStatus::Confirmed
            | ScanStatus::CardCreated
            | ScanStatus::Denied
            | ScanStatus::NoMatch
    )
}

/// Reject an empty list and drop repeated ids, keeping first-seen order.
fn unique_ids(scan_ids: &[Uuid]) -> Result<Vec<Uuid>> {
    if scan_ids.is_empty() {
        return Err(IcrError::Validation("no scan ids provided".into()));
    }
    let mut seen = HashSet::with_capacity(scan_ids.len());
    Ok(scan_ids.iter().copied().filter(|id| seen.insert(*id)).collect())
}

fn collect_batch<T>(ids: &[Uuid], outcomes: Vec<Result<T>>, message: &str) -> BatchResult<T> {
    let mut result = BatchResult::new();
    for (id, outcome) in ids.iter().zip(outcomes) {
        if let Err(err) = &outcome {
            warn!(scan_id = %id, kind = err.kind(), error = %err, "{message}");
        }
        result.push(id.to_string(), outcome);
    }
    result
}

/// Image decoding and encoding are CPU-bound; keep them off the async
/// workers.
async fn run_blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| IcrError::Internal(format!("image worker failed: {e}")))?
}
