//! Vertical label stitching.
//!
//! OCR is billed per call, so N extracted labels are composed into one strip
//! and sent once. The position table returned alongside the composite is what
//! lets [`crate::distribute::OcrTextDistributor`] route text back to labels.
//!
//! # Algorithm
//!
//! 1. Decode every input (any failure aborts the whole stitch)
//! 2. `target_width = min(max(width_i), max_width)`
//! 3. Downscale wider labels proportionally, never upscale
//! 4. Sharpen and contrast-normalize each label
//! 5. Center each label horizontally, stack top-to-bottom with fixed padding
//! 6. Encode the composite as PNG

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{decode, enhance, encode_png};
use crate::error::{IcrError, Result};

/// Background colour between and around labels.
const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Debug, Clone)]
pub struct StitchConfig {
    /// Vertical gap between labels, keeps OCR from merging lines across labels.
    pub padding: u32,
    /// Upper bound on composite width; wider labels are downscaled.
    pub max_width: u32,
    /// Unsharp-mask blur radius (0 disables sharpening).
    pub sharpen_sigma: f32,
    /// Unsharp-mask threshold.
    pub sharpen_threshold: i32,
    pub normalize_contrast: bool,
}

impl Default for StitchConfig {
    fn default() -> Self {
        Self {
            padding: 5,
            max_width: 2000,
            sharpen_sigma: 0.6,
            sharpen_threshold: 2,
            normalize_contrast: true,
        }
    }
}

/// Where one input label ended up inside the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelPosition {
    /// Index of the label in the stitch input order.
    pub index: usize,
    pub y_offset: u32,
    pub height: u32,
    pub x_offset: u32,
    pub width: u32,
}

impl LabelPosition {
    /// Exclusive lower edge of the label's vertical band.
    pub fn band_end(&self) -> u32 {
        self.y_offset + self.height
    }

    pub fn band_center(&self) -> f32 {
        self.y_offset as f32 + self.height as f32 / 2.0
    }

    /// Whether `y` falls in `[y_offset, y_offset + height)`.
    pub fn contains(&self, y: f32) -> bool {
        y >= self.y_offset as f32 && y < self.band_end() as f32
    }
}

#[derive(Debug, Clone)]
pub struct StitchedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub positions: Vec<LabelPosition>,
    pub label_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StitchingEngine {
    config: StitchConfig,
}

impl StitchingEngine {
    pub fn new(config: StitchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StitchConfig {
        &self.config
    }

    /// Compose `images` (encoded bytes, in order) into one vertical strip.
    #[instrument(level = "debug", skip_all, fields(label_count = images.len()))]
    pub fn stitch<B: AsRef<[u8]>>(&self, images: &[B]) -> Result<StitchedImage> {
        if images.is_empty() {
            return Err(IcrError::Validation(
                "at least one label image is required to stitch".into(),
            ));
        }

        // Decode everything up front so a bad input never yields a partial composite.
        let decoded = images
            .iter()
            .enumerate()
            .map(|(index, bytes)| decode(bytes.as_ref(), index))
            .collect::<Result<Vec<_>>>()?;

        let widest = decoded.iter().map(DynamicImage::width).max().unwrap_or(0);
        let target_width = widest.min(self.config.max_width).max(1);

        let processed: Vec<RgbImage> = decoded
            .iter()
            .map(|img| self.prepare(img, target_width))
            .collect();

        let total_height = processed
            .iter()
            .map(RgbImage::height)
            .try_fold(0u32, |acc, h| acc.checked_add(h))
            .and_then(|sum| {
                let gaps = self.config.padding.checked_mul(processed.len() as u32 - 1)?;
                sum.checked_add(gaps)
            })
            .ok_or_else(|| IcrError::Validation("stitched composite is too tall".into()))?;

        let mut canvas = RgbImage::from_pixel(target_width, total_height, BACKGROUND);
        let mut positions = Vec::with_capacity(processed.len());
        let mut y_offset = 0u32;

        for (index, label) in processed.iter().enumerate() {
            let x_offset = (target_width - label.width()) / 2;
            imageops::replace(&mut canvas, label, i64::from(x_offset), i64::from(y_offset));

            positions.push(LabelPosition {
                index,
                y_offset,
                height: label.height(),
                x_offset,
                width: label.width(),
            });

            y_offset += label.height() + self.config.padding;
        }

        let bytes = encode_png(&DynamicImage::ImageRgb8(canvas))?;

        debug!(
            width = target_width,
            height = total_height,
            bytes = bytes.len(),
            "Stitched composite encoded"
        );

        Ok(StitchedImage {
            bytes,
            width: target_width,
            height: total_height,
            label_count: positions.len(),
            positions,
        })
    }

    fn prepare(&self, image: &DynamicImage, target_width: u32) -> RgbImage {
        let resized = if image.width() > target_width {
            let scale = f64::from(target_width) / f64::from(image.width());
            let new_height = (f64::from(image.height()) * scale).round().max(1.0) as u32;
            image.resize_exact(target_width, new_height, FilterType::Lanczos3)
        } else {
            image.clone()
        };

        let sharpened = enhance::sharpen(
            &resized,
            self.config.sharpen_sigma,
            self.config.sharpen_threshold,
        );

        let rgb = sharpened.to_rgb8();
        if self.config.normalize_contrast {
            enhance::normalize_contrast(&rgb)
        } else {
            rgb
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::test_images;

    #[test]
    fn test_positions_in_order_without_overlap() {
        let engine = StitchingEngine::default();
        let inputs = vec![
            test_images::png(120, 30, 200),
            test_images::png(80, 40, 210),
            test_images::png(100, 25, 190),
        ];

        let stitched = engine.stitch(&inputs).unwrap();

        assert_eq!(stitched.label_count, 3);
        assert_eq!(stitched.positions.len(), 3);
        assert_eq!(stitched.width, 120);
        assert_eq!(stitched.height, 30 + 40 + 25 + 2 * 5);

        for (i, pos) in stitched.positions.iter().enumerate() {
            assert_eq!(pos.index, i);
        }
        for pair in stitched.positions.windows(2) {
            assert!(pair[0].y_offset <= pair[1].y_offset);
            assert!(pair[0].band_end() <= pair[1].y_offset, "labels overlap");
        }
    }

    #[test]
    fn test_narrow_labels_are_centered_not_upscaled() {
        let engine = StitchingEngine::default();
        let stitched = engine
            .stitch(&[test_images::png(100, 20, 200), test_images::png(60, 20, 200)])
            .unwrap();

        let narrow = stitched.positions[1];
        assert_eq!(narrow.width, 60);
        assert_eq!(narrow.height, 20);
        assert_eq!(narrow.x_offset, 20);
    }

    #[test]
    fn test_wide_labels_are_downscaled_proportionally() {
        let engine = StitchingEngine::new(StitchConfig {
            max_width: 100,
            ..Default::default()
        });
        let stitched = engine.stitch(&[test_images::png(200, 50, 200)]).unwrap();

        assert_eq!(stitched.width, 100);
        assert_eq!(stitched.positions[0].height, 25);
    }

    #[test]
    fn test_corrupt_input_fails_atomically() {
        let engine = StitchingEngine::default();
        let err = engine
            .stitch(&[
                test_images::png(50, 10, 200),
                b"corrupt".to_vec(),
                test_images::png(50, 10, 200),
            ])
            .unwrap_err();

        match err {
            IcrError::ImageDecode { index, .. } => assert_eq!(index, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let engine = StitchingEngine::default();
        let empty: Vec<Vec<u8>> = Vec::new();
        assert!(matches!(
            engine.stitch(&empty),
            Err(IcrError::Validation(_))
        ));
    }

    #[test]
    fn test_composite_decodes_with_reported_size() {
        let engine = StitchingEngine::default();
        let stitched = engine
            .stitch(&[test_images::png(40, 12, 200), test_images::png(40, 12, 180)])
            .unwrap();

        let decoded = image::load_from_memory(&stitched.bytes).unwrap();
        assert_eq!(decoded.width(), stitched.width);
        assert_eq!(decoded.height(), stitched.height);
    }

    #[test]
    fn test_band_helpers() {
        let pos = LabelPosition {
            index: 0,
            y_offset: 10,
            height: 20,
            x_offset: 0,
            width: 5,
        };
        assert!(pos.contains(10.0));
        assert!(pos.contains(29.9));
        assert!(!pos.contains(30.0));
        assert_eq!(pos.band_center(), 20.0);
    }
}
