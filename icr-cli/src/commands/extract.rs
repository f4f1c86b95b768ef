//! Extract command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use icr_core::{LabelExtractor, LabelRegion};
use tracing::info;

use crate::utils::{label_output_path, read_file, short_hash, write_file};

/// Execute the extract command.
pub fn execute(
    file: PathBuf,
    output: Option<PathBuf>,
    region: Option<LabelRegion>,
    quiet: bool,
) -> Result<()> {
    let bytes = read_file(&file)?;
    let extractor = LabelExtractor::new(region.unwrap_or_default())?;

    let label = extractor
        .extract(&bytes)
        .with_context(|| format!("Cannot extract label from {}", file.display()))?;

    let output = output.unwrap_or_else(|| label_output_path(&file));
    write_file(&output, &label.bytes)?;

    info!(
        path = %output.display(),
        width = label.width,
        height = label.height,
        "Label extracted"
    );

    if !quiet {
        println!("{}", "Label extracted".green().bold());
        println!("   {} {}", "Saved:".dimmed(), output.display());
        println!("   {} {}x{}", "Size:".dimmed(), label.width, label.height);
        println!("   {} {}", "Label hash:".dimmed(), short_hash(&label.hash));
    }

    Ok(())
}
