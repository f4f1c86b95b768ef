//! Image handling for the ICR pipeline.
//!
//! - **extract**: crop the PSA label region out of a full slab photo
//! - **enhance**: sharpen and contrast-normalize label crops before OCR
//! - **stitch**: compose many labels into one vertical strip for a single OCR call

pub mod enhance;
pub mod extract;
pub mod stitch;

pub use extract::{ExtractedLabel, LabelExtractor, LabelRegion};
pub use stitch::{LabelPosition, StitchConfig, StitchedImage, StitchingEngine};

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use crate::error::{IcrError, Result};

/// Decode image bytes, tagging failures with the input position.
pub fn decode(bytes: &[u8], index: usize) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| IcrError::ImageDecode {
        index,
        reason: e.to_string(),
    })
}

/// Encode an image as PNG. Lossless output keeps text edges intact for OCR.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| IcrError::ImageEncode(e.to_string()))?;
    Ok(buffer.into_inner())
}

/// File extension for stored uploads, sniffed from the magic bytes.
pub fn sniff_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => "jpg",
        Ok(ImageFormat::Png) => "png",
        Ok(ImageFormat::WebP) => "webp",
        Ok(ImageFormat::Gif) => "gif",
        _ => "bin",
    }
}

#[cfg(test)]
pub(crate) mod test_images {
    use image::{DynamicImage, Rgb, RgbImage};

    use super::encode_png;

    /// Solid-colour PNG with a dark bar, so contrast normalization has work to do.
    pub fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            if y % 7 == 0 || x % 11 == 0 {
                Rgb([20, 20, 20])
            } else {
                Rgb([shade, shade, shade.saturating_sub(10)])
            }
        });
        encode_png(&DynamicImage::ImageRgb8(img)).expect("encode test png")
    }
}
