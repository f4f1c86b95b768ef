//! End-to-end pipeline scenarios over in-memory collaborators.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use icr_core::{
    CatalogCard, GradedCardScan, IcrError, IcrPipeline, InMemoryCatalog, InMemoryCollection,
    InMemoryScanRepository, InMemoryStitchedLabelRepository, LabelPosition, MatchingStatus,
    MockOcrProvider, OcrCapabilities, OcrProvider, OcrResponse, Pagination, PipelineConfig,
    ScanStatus, SlidingWindowLimiter, StitchStatus, TextAnnotation, UploadImage,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use uuid::Uuid;

/// OCR provider whose response is set after stitching, once the composite
/// geometry is known.
#[derive(Default)]
struct ScriptedOcr {
    response: Mutex<OcrResponse>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    fn respond_with(&self, response: OcrResponse) {
        *self.response.lock().unwrap() = response;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OcrProvider for ScriptedOcr {
    async fn extract_text(&self, _image: &[u8]) -> icr_core::Result<OcrResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.lock().unwrap().clone())
    }

    fn capabilities(&self) -> OcrCapabilities {
        OcrCapabilities {
            provider: "scripted",
            leading_full_text_block: true,
        }
    }
}

struct Harness {
    pipeline: IcrPipeline,
    scans: Arc<InMemoryScanRepository>,
    stitched: Arc<InMemoryStitchedLabelRepository>,
    collection: Arc<InMemoryCollection>,
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::new(vec![
        CatalogCard {
            id: "e-series-4".into(),
            name: "Charizard".into(),
            number: "4".into(),
            set_name: "Japanese Expedition".into(),
            year: Some(2002),
            modifiers: vec!["HOLO".into()],
        },
        CatalogCard {
            id: "jungle-60".into(),
            name: "Pikachu".into(),
            number: "60".into(),
            set_name: "Jungle".into(),
            year: Some(1999),
            modifiers: vec![],
        },
    ])
}

fn harness_with(
    ocr: Arc<dyn OcrProvider>,
    config: PipelineConfig,
    limiter: Option<SlidingWindowLimiter>,
) -> Harness {
    let scans = Arc::new(InMemoryScanRepository::new());
    let stitched = Arc::new(InMemoryStitchedLabelRepository::new());
    let collection = Arc::new(InMemoryCollection::new());

    let mut builder = IcrPipeline::builder()
        .config(config)
        .scan_repository(scans.clone())
        .stitched_repository(stitched.clone())
        .collection(collection.clone())
        .catalog(Arc::new(catalog()))
        .ocr_provider(ocr);
    if let Some(limiter) = limiter {
        builder = builder.rate_limiter(Arc::new(limiter));
    }
    let pipeline = builder.build().unwrap();

    Harness {
        pipeline,
        scans,
        stitched,
        collection,
    }
}

fn harness(ocr: Arc<dyn OcrProvider>) -> Harness {
    harness_with(ocr, PipelineConfig::default(), None)
}

/// A synthetic slab photo; `shade` makes each one (and its label) distinct.
fn slab(shade: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(120, 200, |x, y| {
        Rgb([shade, (x % 7) as u8 * 30, (y % 5) as u8 * 40])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

async fn upload_and_extract(h: &Harness, shades: &[u8]) -> Vec<GradedCardScan> {
    let images = shades
        .iter()
        .map(|&s| UploadImage::new(slab(s), Some(format!("slab-{s}.png"))))
        .collect();
    let batch = h.pipeline.upload_batch(images, Some("batch_test")).await.unwrap();
    assert!(batch.result.failed.is_empty());

    let ids: Vec<Uuid> = batch.result.successful.iter().map(|u| u.scan.id).collect();
    let extracted = h.pipeline.extract_labels(&ids).await.unwrap();
    assert!(extracted.failed.is_empty(), "{:?}", extracted.failed);
    extracted.successful
}

/// Annotations laid out as text lines inside a label band.
fn label_lines(position: &LabelPosition, lines: &[&str]) -> Vec<TextAnnotation> {
    lines
        .iter()
        .enumerate()
        .map(|(i, text)| {
            TextAnnotation::rect(
                *text,
                0.9,
                position.x_offset as f32 + 2.0,
                position.y_offset as f32 + 1.0 + i as f32 * 10.0,
                60.0,
                8.0,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_duplicate_upload_creates_one_record() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let bytes = slab(10);

    let first = h
        .pipeline
        .upload(UploadImage::new(bytes.clone(), None), None)
        .await
        .unwrap();
    let second = h
        .pipeline
        .upload(UploadImage::new(bytes, None), None)
        .await
        .unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.scan.id, first.scan.id);
    assert_eq!(h.scans.len(), 1);
}

#[tokio::test]
async fn test_duplicate_inside_one_batch() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let bytes = slab(20);

    let batch = h
        .pipeline
        .upload_batch(
            vec![
                UploadImage::new(bytes.clone(), Some("a.png".into())),
                UploadImage::new(bytes, Some("b.png".into())),
            ],
            None,
        )
        .await
        .unwrap();

    assert!(batch.batch_id.starts_with("batch_"));
    assert_eq!(batch.result.successful.len(), 2);
    assert_eq!(
        batch.result.successful.iter().filter(|u| u.duplicate).count(),
        1
    );
    assert_eq!(h.scans.len(), 1);
}

#[tokio::test]
async fn test_one_corrupt_image_does_not_abort_extraction() {
    let h = harness(Arc::new(MockOcrProvider::empty()));

    let mut images: Vec<UploadImage> = (0..4)
        .map(|i| UploadImage::new(slab(40 + i * 10), None))
        .collect();
    images.push(UploadImage::new(
        b"definitely not an image".to_vec(),
        Some("corrupt.jpg".into()),
    ));

    let batch = h.pipeline.upload_batch(images, None).await.unwrap();
    assert_eq!(batch.result.successful.len(), 5, "upload does not decode");

    let ids: Vec<Uuid> = batch.result.successful.iter().map(|u| u.scan.id).collect();
    let corrupt_id = batch
        .result
        .successful
        .iter()
        .find(|u| u.scan.original_filename.as_deref() == Some("corrupt.jpg"))
        .map(|u| u.scan.id)
        .unwrap();

    let result = h.pipeline.extract_labels(&ids).await.unwrap();

    assert_eq!(result.successful.len(), 4);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].id, corrupt_id.to_string());
    assert_eq!(result.failed[0].kind, "image_decode");
    assert!(result
        .successful
        .iter()
        .all(|s| s.processing_status == ScanStatus::Extracted && s.label_hash.is_some()));

    let corrupt = h.pipeline.get_scan(corrupt_id).await.unwrap();
    assert_eq!(corrupt.processing_status, ScanStatus::Uploaded);
}

#[tokio::test]
async fn test_stitch_keeps_order_and_dedups_label_set() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let scans = upload_and_extract(&h, &[60, 70, 80]).await;
    let ids: Vec<Uuid> = scans.iter().map(|s| s.id).collect();
    let hashes: Vec<String> = scans.iter().map(|s| s.label_hash.clone().unwrap()).collect();

    let first = h.pipeline.stitch(&ids).await.unwrap();
    assert!(!first.duplicate);
    assert_eq!(first.stitched.label_hashes(), hashes.as_slice());
    assert_eq!(first.stitched.scan_ids(), ids.as_slice());

    let positions = first.stitched.positions();
    assert_eq!(positions.len(), 3);
    for (i, pair) in positions.windows(2).enumerate() {
        assert_eq!(pair[0].index, i);
        assert!(pair[0].band_end() <= pair[1].y_offset, "bands overlap");
    }

    let again = h.pipeline.stitch(&ids).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(again.stitched.id(), first.stitched.id());
    assert_eq!(h.stitched.len(), 1);

    for id in &ids {
        let scan = h.pipeline.get_scan(*id).await.unwrap();
        assert_eq!(scan.processing_status, ScanStatus::Stitched);
        assert_eq!(scan.stitched_label_id, Some(first.stitched.id()));
    }
}

#[tokio::test]
async fn test_concurrent_stitch_of_same_set_creates_one_composite() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let scans = upload_and_extract(&h, &[90, 100]).await;
    let ids: Vec<Uuid> = scans.iter().map(|s| s.id).collect();

    let (a, b) = tokio::join!(h.pipeline.stitch(&ids), h.pipeline.stitch(&ids));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.stitched.id(), b.stitched.id());
    assert_eq!([a.duplicate, b.duplicate].iter().filter(|d| **d).count(), 1);
    assert_eq!(h.stitched.len(), 1);
}

#[tokio::test]
async fn test_restitched_set_reclaims_its_scans_before_ocr() {
    let ocr = Arc::new(ScriptedOcr::default());
    let h = harness(ocr.clone());
    let scans = upload_and_extract(&h, &[62, 72]).await;
    let (a, b) = (scans[0].id, scans[1].id);

    let forward = h.pipeline.stitch(&[a, b]).await.unwrap();
    let reversed = h.pipeline.stitch(&[b, a]).await.unwrap();
    assert!(!reversed.duplicate);
    assert_ne!(reversed.stitched.id(), forward.stitched.id());
    for id in [a, b] {
        let scan = h.pipeline.get_scan(id).await.unwrap();
        assert_eq!(scan.stitched_label_id, Some(reversed.stitched.id()));
    }

    let again = h.pipeline.stitch(&[a, b]).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(again.stitched.id(), forward.stitched.id());
    for id in [a, b] {
        let scan = h.pipeline.get_scan(id).await.unwrap();
        assert_eq!(scan.processing_status, ScanStatus::Stitched);
        assert_eq!(scan.stitched_label_id, Some(forward.stitched.id()));
    }

    let outcome = h.pipeline.run_ocr(forward.stitched.id()).await.unwrap();
    assert_eq!(ocr.calls(), 1);
    assert_eq!(outcome.scans.successful.len(), 2);
    assert!(outcome.scans.failed.is_empty());

    // The abandoned ordering has nobody left to feed, so the provider is
    // not called for it.
    let err = h.pipeline.run_ocr(reversed.stitched.id()).await.unwrap_err();
    assert!(matches!(err, IcrError::Validation(_)), "{err:?}");
    assert_eq!(ocr.calls(), 1);
    let abandoned = h.pipeline.get_stitched(reversed.stitched.id()).await.unwrap();
    assert_eq!(abandoned.status(), StitchStatus::Stitched);
}

#[tokio::test]
async fn test_restitch_after_ocr_returns_existing_composite() {
    let ocr = Arc::new(ScriptedOcr::default());
    let h = harness(ocr.clone());
    let scans = upload_and_extract(&h, &[64, 74, 84]).await;
    let ids: Vec<Uuid> = scans.iter().map(|s| s.id).collect();

    let first = h.pipeline.stitch(&ids).await.unwrap().stitched;
    h.pipeline.run_ocr(first.id()).await.unwrap();

    let again = h.pipeline.stitch(&ids).await.unwrap();
    assert!(again.duplicate);
    assert_eq!(again.stitched.id(), first.id());
    assert_eq!(again.stitched.status(), StitchStatus::OcrComplete);

    h.pipeline.match_scans(&ids).await.unwrap();
    let after_match = h.pipeline.stitch(&ids).await.unwrap();
    assert!(after_match.duplicate);
    assert_eq!(after_match.stitched.id(), first.id());

    assert_eq!(h.stitched.len(), 1);
    assert_eq!(ocr.calls(), 1);
    for id in &ids {
        let scan = h.pipeline.get_scan(*id).await.unwrap();
        assert_eq!(scan.processing_status, ScanStatus::Matched);
        assert_eq!(scan.stitched_label_id, Some(first.id()));
    }
}

#[tokio::test]
async fn test_new_composite_rejected_unless_every_scan_can_join() {
    let h = harness(Arc::new(ScriptedOcr::default()));
    let scans = upload_and_extract(&h, &[66, 76]).await;
    let (fresh, done) = (scans[0].id, scans[1].id);

    let single = h.pipeline.stitch(&[done]).await.unwrap().stitched;
    h.pipeline.run_ocr(single.id()).await.unwrap();

    let err = h.pipeline.stitch(&[fresh, done]).await.unwrap_err();
    assert!(matches!(err, IcrError::StateTransition { .. }), "{err:?}");

    assert_eq!(h.stitched.len(), 1);
    let fresh = h.pipeline.get_scan(fresh).await.unwrap();
    assert_eq!(fresh.processing_status, ScanStatus::Extracted);
    assert!(fresh.stitched_label_id.is_none());
}

#[tokio::test]
async fn test_stitch_requires_extracted_scans() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let uploaded = h
        .pipeline
        .upload(UploadImage::new(slab(110), None), None)
        .await
        .unwrap();

    let err = h.pipeline.stitch(&[uploaded.scan.id]).await.unwrap_err();
    match err {
        IcrError::StateTransition {
            entity,
            current,
            attempted,
        } => {
            assert_eq!(entity, "GradedCardScan");
            assert_eq!(current, "uploaded");
            assert_eq!(attempted, "stitched");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(h.stitched.is_empty());
}

#[tokio::test]
async fn test_full_flow_distributes_parses_and_matches() {
    let ocr = Arc::new(ScriptedOcr::default());
    let h = harness(ocr.clone());
    let scans = upload_and_extract(&h, &[120, 130, 140]).await;
    let ids: Vec<Uuid> = scans.iter().map(|s| s.id).collect();

    let stitched = h.pipeline.stitch(&ids).await.unwrap().stitched;
    let positions = stitched.positions();
    let (width, height) = stitched.dimensions();

    let mut annotations = vec![TextAnnotation::rect(
        "whole page",
        0.5,
        0.0,
        0.0,
        width as f32,
        height as f32,
    )];
    annotations.extend(label_lines(
        &positions[0],
        &["2002 POKEMON JAPANESE", "CHARIZARD HOLO", "#4 NM-MT 8", "12345678"],
    ));
    ocr.respond_with(OcrResponse {
        raw_annotations: annotations,
        full_text: "2002 POKEMON JAPANESE ...".into(),
        processing_time_ms: 12,
    });

    let outcome = h.pipeline.run_ocr(stitched.id()).await.unwrap();
    assert_eq!(ocr.calls(), 1);
    assert!(outcome.scans.failed.is_empty());
    assert_eq!(outcome.stitched.status(), StitchStatus::OcrComplete);

    let metrics = outcome.stitched.ocr().unwrap().metrics;
    assert_eq!(metrics.total_annotations, 4, "leading full-text block dropped");
    assert_eq!(metrics.distributed_annotations, 4);
    assert_eq!(metrics.skipped_annotations, 0);
    assert_eq!(metrics.processing_time_ms, 12);

    let first = h.pipeline.get_scan(ids[0]).await.unwrap();
    assert_eq!(first.processing_status, ScanStatus::OcrComplete);
    let fields = first.extracted.as_ref().unwrap();
    assert_eq!(fields.year, Some(2002));
    assert_eq!(fields.cert_number.as_deref(), Some("12345678"));
    assert_eq!(first.ocr_segments.len(), 4);

    for id in &ids[1..] {
        let scan = h.pipeline.get_scan(*id).await.unwrap();
        assert_eq!(scan.ocr_text.as_deref(), Some(""));
        assert_eq!(scan.ocr_confidence, Some(0.0));
    }

    // OCR runs exactly once per composite.
    assert!(matches!(
        h.pipeline.run_ocr(stitched.id()).await,
        Err(IcrError::StateTransition { .. })
    ));
    assert_eq!(ocr.calls(), 1);

    let matched = h.pipeline.match_scans(&ids).await.unwrap();
    assert_eq!(matched.successful.len(), 3);

    let first = h.pipeline.get_scan(ids[0]).await.unwrap();
    assert_eq!(first.processing_status, ScanStatus::Matched);
    assert_eq!(first.matching_status, MatchingStatus::Matched);
    assert_eq!(first.candidates[0].card_id, "e-series-4");
    assert!(first.candidates[0].scores.year > 0.0);

    let empty = h.pipeline.get_scan(ids[1]).await.unwrap();
    assert_eq!(empty.processing_status, ScanStatus::Matched);
    assert_eq!(empty.matching_status, MatchingStatus::NoMatch);
    assert!(empty.candidates.is_empty());

    let composite = h.pipeline.get_stitched(stitched.id()).await.unwrap();
    assert_eq!(composite.status(), StitchStatus::Matched);

    let approved = h.pipeline.approve(ids[0]).await.unwrap();
    assert_eq!(approved.processing_status, ScanStatus::CardCreated);
    assert!(approved.graded_card_id.is_some());
    let (_, draft) = h.collection.get_by_scan(ids[0]).unwrap();
    assert_eq!(draft.card_id, "e-series-4");
    assert_eq!(draft.cert_number.as_deref(), Some("12345678"));

    let no_match = h.pipeline.mark_no_match(ids[1]).await.unwrap();
    assert_eq!(no_match.processing_status, ScanStatus::NoMatch);

    let manual = h.pipeline.select_match(ids[2], "jungle-60").await.unwrap();
    assert_eq!(manual.processing_status, ScanStatus::Confirmed);
    assert_eq!(manual.matching_status, MatchingStatus::ManualOverride);
    let denied = h.pipeline.deny(ids[2]).await.unwrap();
    assert_eq!(denied.processing_status, ScanStatus::Denied);

    let summary = h.pipeline.status_summary().await.unwrap();
    assert_eq!(summary.scans["card_created"], 1);
    assert_eq!(summary.scans["no_match"], 1);
    assert_eq!(summary.scans["denied"], 1);
    assert_eq!(summary.stitched["matched"], 1);
}

#[tokio::test]
async fn test_out_of_order_steps_are_rejected() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let scans = upload_and_extract(&h, &[150]).await;
    let id = scans[0].id;

    let matched = h.pipeline.match_scans(&[id]).await.unwrap();
    assert_eq!(matched.failed.len(), 1);
    assert_eq!(matched.failed[0].kind, "state_transition");

    assert!(matches!(
        h.pipeline.approve(id).await,
        Err(IcrError::StateTransition { .. })
    ));
    let again = h.pipeline.extract_labels(&[id]).await.unwrap();
    assert_eq!(again.failed[0].kind, "state_transition");
    assert_eq!(
        h.pipeline.get_scan(id).await.unwrap().processing_status,
        ScanStatus::Extracted
    );
}

#[tokio::test]
async fn test_ocr_timeout_is_a_hard_failure() {
    let slow = MockOcrProvider::empty().with_delay(Duration::from_secs(30));
    let h = harness_with(
        Arc::new(slow),
        PipelineConfig {
            ocr_timeout: Duration::from_millis(50),
            ..Default::default()
        },
        None,
    );
    let scans = upload_and_extract(&h, &[160, 170]).await;
    let ids: Vec<Uuid> = scans.iter().map(|s| s.id).collect();
    let stitched = h.pipeline.stitch(&ids).await.unwrap().stitched;

    let err = h.pipeline.run_ocr(stitched.id()).await.unwrap_err();
    assert!(matches!(err, IcrError::ExternalProvider(_)), "{err:?}");

    let composite = h.pipeline.get_stitched(stitched.id()).await.unwrap();
    assert_eq!(composite.status(), StitchStatus::Stitched);
    assert!(composite.ocr().is_none());
    for id in &ids {
        let scan = h.pipeline.get_scan(*id).await.unwrap();
        assert_eq!(scan.processing_status, ScanStatus::Stitched);
        assert!(scan.ocr_text.is_none());
    }
}

#[tokio::test]
async fn test_provider_error_surfaces() {
    let h = harness(Arc::new(MockOcrProvider::failing("quota exhausted")));
    let scans = upload_and_extract(&h, &[180]).await;
    let stitched = h.pipeline.stitch(&[scans[0].id]).await.unwrap().stitched;

    match h.pipeline.run_ocr(stitched.id()).await {
        Err(IcrError::ExternalProvider(msg)) => assert!(msg.contains("quota")),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_rate_limit_wait_expires() {
    let h = harness_with(
        Arc::new(MockOcrProvider::empty()),
        PipelineConfig {
            rate_limit_max_wait: Duration::from_millis(20),
            ..Default::default()
        },
        Some(SlidingWindowLimiter::with_window(1, Duration::from_secs(60))),
    );

    let first = upload_and_extract(&h, &[190]).await;
    let second = upload_and_extract(&h, &[200]).await;
    let a = h.pipeline.stitch(&[first[0].id]).await.unwrap().stitched;
    let b = h.pipeline.stitch(&[second[0].id]).await.unwrap().stitched;

    h.pipeline.run_ocr(a.id()).await.unwrap();
    let err = h.pipeline.run_ocr(b.id()).await.unwrap_err();
    assert!(matches!(err, IcrError::ExternalProvider(_)));
}

#[tokio::test]
async fn test_delete_scan_removes_record_and_files() {
    let h = harness(Arc::new(MockOcrProvider::empty()));
    let scans = upload_and_extract(&h, &[210]).await;
    let id = scans[0].id;

    h.pipeline.delete_scan(id).await.unwrap();
    assert!(matches!(
        h.pipeline.get_scan(id).await,
        Err(IcrError::NotFound(_))
    ));
    assert!(matches!(
        h.pipeline.delete_scan(id).await,
        Err(IcrError::NotFound(_))
    ));

    let page = h
        .pipeline
        .list_scans(None, Pagination::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
}
