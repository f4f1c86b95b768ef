//! Common utility functions shared across CLI commands.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// Read a whole input file.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Read file");
    Ok(bytes)
}

/// Read a text file, or stdin when `path` is `None`.
pub fn read_text(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)
        .with_context(|| format!("Failed to write file: {}", path.display()))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote file");
    Ok(())
}

/// Build the label output path from the slab photo path.
///
/// Transforms `dir/slab.jpg` into `dir/slab.label.png`.
pub fn label_output_path(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("label");
    file.with_file_name(format!("{stem}.label.png"))
}

/// File name for display, falling back to the full path.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// First 16 hex characters of a digest.
pub fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(16)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_output_path() {
        assert_eq!(
            label_output_path(Path::new("scans/slab.jpg")),
            PathBuf::from("scans/slab.label.png")
        );
        assert_eq!(
            label_output_path(Path::new("noext")),
            PathBuf::from("noext.label.png")
        );
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/tmp/a/slab-1.png")), "slab-1.png");
    }

    #[test]
    fn test_short_hash() {
        assert_eq!(short_hash(&"ab".repeat(32)), "abababababababab");
        assert_eq!(short_hash("abc"), "abc");
    }
}
