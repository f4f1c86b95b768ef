//! Stitch command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use icr_core::{content_hash, label_set_hash, LabelExtractor, LabelRegion, StitchingEngine};
use serde_json::json;
use tracing::info;

use crate::utils::{display_name, read_file, short_hash, write_file};
use crate::OutputFormat;

/// Execute the stitch command.
///
/// Slab photos are cropped to their labels first unless `labels_only` is
/// set, then stacked in argument order.
pub fn execute(
    files: Vec<PathBuf>,
    output: PathBuf,
    labels_only: bool,
    region: Option<LabelRegion>,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let extractor = LabelExtractor::new(region.unwrap_or_default())?;

    let mut labels = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = read_file(file)?;
        let label = if labels_only {
            bytes
        } else {
            extractor
                .extract(&bytes)
                .with_context(|| format!("Cannot extract label from {}", file.display()))?
                .bytes
        };
        labels.push(label);
    }

    let label_hashes = labels
        .iter()
        .map(|label| content_hash(label))
        .collect::<icr_core::Result<Vec<_>>>()?;

    let stitched = StitchingEngine::default()
        .stitch(&labels)
        .context("Cannot stitch labels")?;
    let composite_hash = content_hash(&stitched.bytes)?;
    write_file(&output, &stitched.bytes)?;

    info!(
        path = %output.display(),
        label_count = stitched.label_count,
        width = stitched.width,
        height = stitched.height,
        "Composite written"
    );

    match format {
        OutputFormat::Json => {
            let positions: Vec<_> = stitched
                .positions
                .iter()
                .map(|p| {
                    json!({
                        "index": p.index,
                        "file": files[p.index].display().to_string(),
                        "y_offset": p.y_offset,
                        "height": p.height,
                        "x_offset": p.x_offset,
                        "width": p.width,
                    })
                })
                .collect();
            let report = json!({
                "output": output.display().to_string(),
                "image_hash": composite_hash,
                "label_set_hash": label_set_hash(&label_hashes),
                "width": stitched.width,
                "height": stitched.height,
                "positions": positions,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text if !quiet => {
            println!("{}", "Labels stitched".green().bold());
            println!("   {} {}", "Saved:".dimmed(), output.display());
            println!(
                "   {} {}x{}",
                "Size:".dimmed(),
                stitched.width,
                stitched.height
            );
            println!("   {} {}", "Image hash:".dimmed(), short_hash(&composite_hash));
            println!();
            println!(
                "   {:>5}  {:>8}  {:>6}  {:>8}  {:>5}  {}",
                "INDEX", "Y", "HEIGHT", "X", "WIDTH", "FILE"
            );
            for p in &stitched.positions {
                println!(
                    "   {:>5}  {:>8}  {:>6}  {:>8}  {:>5}  {}",
                    p.index,
                    p.y_offset,
                    p.height,
                    p.x_offset,
                    p.width,
                    display_name(&files[p.index])
                );
            }
        }
        OutputFormat::Text => {}
    }

    Ok(())
}
