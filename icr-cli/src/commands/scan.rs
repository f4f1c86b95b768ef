//! Scan command implementation.
//!
//! Runs upload → extract → stitch → OCR → match entirely in memory and
//! prints one row per distinct slab photo.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use icr_core::{
    BatchFailure, GoogleVisionConfig, GoogleVisionProvider, GradedCardScan, IcrPipeline,
    InMemoryCatalog, LabelRegion, MockOcrProvider, OcrProvider, OcrResponse, PipelineConfig,
    UploadImage,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::utils::{display_name, read_file, read_text};
use crate::OutputFormat;

pub struct ScanOptions {
    pub catalog: PathBuf,
    pub mock_ocr: Option<PathBuf>,
    pub batch_id: Option<String>,
    pub region: Option<LabelRegion>,
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Execute the scan command.
pub async fn execute(files: Vec<PathBuf>, options: ScanOptions) -> Result<()> {
    let catalog_json = read_text(Some(&options.catalog))?;
    let catalog = InMemoryCatalog::from_json(&catalog_json)
        .with_context(|| format!("Invalid catalog {}", options.catalog.display()))?;
    info!(cards = catalog.len(), "Catalog loaded");

    let mut config = PipelineConfig::default();
    if let Some(region) = options.region {
        config.label_region = region;
    }

    let pipeline = IcrPipeline::builder()
        .config(config)
        .ocr_provider(ocr_provider(options.mock_ocr.as_deref())?)
        .catalog(Arc::new(catalog))
        .build()?;

    let mut images = Vec::with_capacity(files.len());
    for file in &files {
        images.push(UploadImage::new(read_file(file)?, Some(display_name(file))));
    }

    let batch = pipeline
        .upload_batch(images, options.batch_id.as_deref())
        .await?;
    report_failures("upload", &batch.result.failed, options.quiet);

    let mut scan_ids: Vec<Uuid> = Vec::new();
    for outcome in &batch.result.successful {
        if !scan_ids.contains(&outcome.scan.id) {
            scan_ids.push(outcome.scan.id);
        }
    }
    if scan_ids.is_empty() {
        bail!("No image could be uploaded");
    }

    let extracted = pipeline.extract_labels(&scan_ids).await?;
    report_failures("extract", &extracted.failed, options.quiet);

    let ready: Vec<Uuid> = extracted.successful.iter().map(|s| s.id).collect();
    if ready.is_empty() {
        bail!("No label could be extracted");
    }

    for chunk in ready.chunks(pipeline.config().max_labels_per_stitch) {
        let stitched = pipeline.stitch(chunk).await.context("Cannot stitch labels")?;
        let outcome = pipeline
            .run_ocr(stitched.stitched.id())
            .await
            .context("OCR failed")?;
        report_failures("ocr", &outcome.scans.failed, options.quiet);
    }

    let matched = pipeline.match_scans(&ready).await?;
    report_failures("match", &matched.failed, options.quiet);

    let mut scans = Vec::with_capacity(scan_ids.len());
    for id in scan_ids {
        scans.push(pipeline.get_scan(id).await?);
    }

    match options.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&scans)?),
        OutputFormat::Text => print_scans(&scans, options.quiet),
    }

    Ok(())
}

fn ocr_provider(mock_ocr: Option<&Path>) -> Result<Arc<dyn OcrProvider>> {
    if let Some(path) = mock_ocr {
        let json = read_text(Some(path))?;
        let response: OcrResponse = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse OCR response: {}", path.display()))?;

        // Recorded Vision responses open with the whole-page block.
        let leading_block = response.raw_annotations.len() > 1
            && response.raw_annotations[0].text.trim() == response.full_text.trim();

        warn!(path = %path.display(), "Using recorded OCR response");
        return Ok(Arc::new(
            MockOcrProvider::new(response).with_full_text_block(leading_block),
        ));
    }

    match std::env::var("GOOGLE_VISION_API_KEY") {
        Ok(key) if !key.trim().is_empty() => {
            info!("OCR provider: Google Vision");
            let provider = GoogleVisionProvider::new(GoogleVisionConfig::new(key))?;
            Ok(Arc::new(provider))
        }
        _ => bail!("No OCR provider: set GOOGLE_VISION_API_KEY or pass --mock-ocr"),
    }
}

fn report_failures(stage: &str, failures: &[BatchFailure], quiet: bool) {
    for failure in failures {
        warn!(
            stage,
            id = %failure.id,
            kind = %failure.kind,
            error = %failure.error,
            "Item failed"
        );
        if !quiet {
            eprintln!(
                "{} {} {}: {}",
                format!("[{stage}]").yellow(),
                failure.id,
                failure.kind,
                failure.error
            );
        }
    }
}

fn print_scans(scans: &[GradedCardScan], quiet: bool) {
    if !quiet {
        println!(
            "{:<24} {:<13} {:>4} {:>10} {:>5}  {}",
            "FILE", "STATUS", "YEAR", "CERT", "GRADE", "BEST MATCH"
        );
    }

    for scan in scans {
        let fields = scan.extracted.clone().unwrap_or_default();
        let best = scan.candidates.first().map_or_else(
            || "-".dimmed().to_string(),
            |m| {
                format!(
                    "{} {} ({:.0}%)",
                    m.card_id.green(),
                    m.name,
                    m.confidence * 100.0
                )
            },
        );

        println!(
            "{:<24} {:<13} {:>4} {:>10} {:>5}  {}",
            scan.original_filename.as_deref().unwrap_or("-"),
            scan.processing_status.as_str(),
            fields.year.map_or_else(|| "-".to_string(), |y| y.to_string()),
            fields.cert_number.as_deref().unwrap_or("-"),
            fields.grade.as_deref().unwrap_or("-"),
            best
        );
    }

    if !quiet {
        let matched = scans.iter().filter(|s| !s.candidates.is_empty()).count();
        println!();
        println!(
            "{} {} of {} scans have a catalog match",
            "Done.".green().bold(),
            matched,
            scans.len()
        );
    }
}
