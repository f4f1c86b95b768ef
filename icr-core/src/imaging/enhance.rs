//! Pre-OCR enhancement passes.
//!
//! Label crops come from phone photos of slabs: JPEG artifacts and resizing
//! soften text edges, and lighting varies between shots. A mild unsharp mask
//! followed by a percentile contrast stretch gives the OCR provider cleaner
//! glyph boundaries without inventing detail.

use image::{DynamicImage, Rgb, RgbImage};

/// Fraction of pixels clipped at each end of the luminance histogram.
const CLIP_FRACTION: f64 = 0.01;

/// Apply an unsharp mask. `sigma` controls the blur radius, `threshold` the
/// minimum difference that gets sharpened.
pub fn sharpen(image: &DynamicImage, sigma: f32, threshold: i32) -> DynamicImage {
    if sigma <= 0.0 {
        return image.clone();
    }
    image.unsharpen(sigma, threshold)
}

/// Linearly stretch luminance so the 1st..99th percentile covers 0..255.
///
/// Flat images (no usable range) are returned unchanged.
pub fn normalize_contrast(image: &RgbImage) -> RgbImage {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[luma(pixel) as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return image.clone();
    }

    let clip = (total as f64 * CLIP_FRACTION) as u64;
    let low = percentile_bound(&histogram, clip, false);
    let high = percentile_bound(&histogram, clip, true);

    if high <= low {
        return image.clone();
    }

    let scale = 255.0 / f32::from(high - low);
    let low = f32::from(low);

    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            let stretched = (f32::from(*channel) - low) * scale;
            *channel = stretched.round().clamp(0.0, 255.0) as u8;
        }
    }
    output
}

fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    (0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)).round() as u8
}

fn percentile_bound(histogram: &[u64; 256], clip: u64, from_top: bool) -> u8 {
    let mut seen = 0u64;
    let indices: Box<dyn Iterator<Item = usize>> = if from_top {
        Box::new((0..256).rev())
    } else {
        Box::new(0..256)
    };

    for idx in indices {
        seen += histogram[idx];
        if seen > clip {
            return idx as u8;
        }
    }
    if from_top {
        255
    } else {
        0
    }
}
