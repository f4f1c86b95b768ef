//! Hash command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use icr_core::content_hash;
use serde_json::json;

use crate::utils::read_file;
use crate::OutputFormat;

/// Execute the hash command.
///
/// Text output follows `sha256sum`: `<hash>  <path>` per line.
pub fn execute(files: Vec<PathBuf>, format: OutputFormat) -> Result<()> {
    let mut entries = Vec::with_capacity(files.len());
    for file in &files {
        let bytes = read_file(file)?;
        let hash = content_hash(&bytes)
            .with_context(|| format!("Cannot hash {}", file.display()))?;
        entries.push((file, hash));
    }

    match format {
        OutputFormat::Text => {
            for (file, hash) in &entries {
                println!("{}  {}", hash, file.display());
            }
        }
        OutputFormat::Json => {
            let items: Vec<_> = entries
                .iter()
                .map(|(file, hash)| json!({ "file": file.display().to_string(), "hash": hash }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
    }

    Ok(())
}
