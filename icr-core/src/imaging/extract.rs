//! Label-region extraction from full slab photos.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{decode, encode_png};
use crate::error::{IcrError, Result};
use crate::hashing::content_hash;

/// A sub-rectangle of an image in relative coordinates (0.0..=1.0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabelRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for LabelRegion {
    /// The PSA label occupies the top strip of a slab photographed upright.
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 0.22,
        }
    }
}

impl LabelRegion {
    /// The whole image (for inputs that are already label crops).
    pub fn full() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !(in_unit(self.x) && in_unit(self.y) && in_unit(self.width) && in_unit(self.height)) {
            return Err(IcrError::Validation(format!(
                "label region values must be within 0..=1, got {self:?}"
            )));
        }
        if self.width == 0.0 || self.height == 0.0 {
            return Err(IcrError::Validation(
                "label region must have a non-zero size".into(),
            ));
        }
        Ok(())
    }

    /// Convert to absolute pixel coordinates, clamped to the image bounds.
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = ((self.x * width as f32).round() as u32).min(width);
        let y0 = ((self.y * height as f32).round() as u32).min(height);
        let rw = ((self.width * width as f32).round() as u32).min(width - x0);
        let rh = ((self.height * height as f32).round() as u32).min(height - y0);
        (x0, y0, rw, rh)
    }
}

impl FromStr for LabelRegion {
    type Err = IcrError;

    /// Parse `"x,y,width,height"`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<f32> = s
            .split(',')
            .map(|p| p.trim().parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| IcrError::Validation(format!("invalid label region '{s}': {e}")))?;

        let [x, y, width, height] = parts[..] else {
            return Err(IcrError::Validation(format!(
                "label region needs 4 comma-separated values, got '{s}'"
            )));
        };

        let region = Self {
            x,
            y,
            width,
            height,
        };
        region.validate()?;
        Ok(region)
    }
}

/// A cropped label, PNG-encoded and content-hashed.
#[derive(Debug, Clone)]
pub struct ExtractedLabel {
    pub bytes: Vec<u8>,
    pub hash: String,
    pub width: u32,
    pub height: u32,
}

/// Crops the configured label region out of full slab images.
#[derive(Debug, Clone, Default)]
pub struct LabelExtractor {
    region: LabelRegion,
}

impl LabelExtractor {
    pub fn new(region: LabelRegion) -> Result<Self> {
        region.validate()?;
        Ok(Self { region })
    }

    pub fn region(&self) -> LabelRegion {
        self.region
    }

    pub fn extract(&self, image_bytes: &[u8]) -> Result<ExtractedLabel> {
        let image = decode(image_bytes, 0)?;
        let (x0, y0, rw, rh) = self.region.to_pixels(image.width(), image.height());

        if rw == 0 || rh == 0 {
            return Err(IcrError::Validation(format!(
                "label region is empty for a {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let label = image.crop_imm(x0, y0, rw, rh);
        let bytes = encode_png(&label)?;
        let hash = content_hash(&bytes)?;

        debug!(x0, y0, width = rw, height = rh, "Extracted label region");

        Ok(ExtractedLabel {
            bytes,
            hash,
            width: rw,
            height: rh,
        })
    }
}
