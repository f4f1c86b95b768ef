//! OCR text distribution.
//!
//! One OCR call covers a whole stitched composite. The distributor maps every
//! token annotation back to the label whose vertical band it falls in, using
//! the position table produced by [`crate::imaging::StitchingEngine`].
//!
//! Every well-formed annotation lands in exactly one label: when no band
//! contains its vertical center (padding, rounding) the nearest band center
//! wins. Annotations with no usable polygon are skipped and counted.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::imaging::LabelPosition;
use crate::ocr::{OcrCapabilities, TextAnnotation, Vertex};

/// Minimum vertical tolerance when grouping segments into reading lines.
const MIN_LINE_TOLERANCE_PX: f32 = 4.0;

/// An annotation assigned to a label, with its precomputed vertical center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrSegment {
    pub text: String,
    pub confidence: f32,
    pub bounding_polygon: Vec<Vertex>,
    pub vertical_center: f32,
}

impl OcrSegment {
    fn from_annotation(annotation: &TextAnnotation, vertical_center: f32) -> Self {
        Self {
            text: annotation.text.clone(),
            confidence: annotation.confidence,
            bounding_polygon: annotation.bounding_polygon.clone(),
            vertical_center,
        }
    }

    pub fn horizontal_center(&self) -> f32 {
        if self.bounding_polygon.is_empty() {
            return 0.0;
        }
        self.bounding_polygon.iter().map(|v| v.x).sum::<f32>() / self.bounding_polygon.len() as f32
    }

    pub fn height(&self) -> f32 {
        let (min, max) = self
            .bounding_polygon
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v.y), hi.max(v.y)));
        if max >= min {
            max - min
        } else {
            0.0
        }
    }
}

/// Text reconstituted for one label position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelText {
    /// Index into the stitch position table.
    pub index: usize,
    /// Segments joined with single spaces in top-to-bottom order.
    pub text: String,
    /// Mean confidence of the assigned segments, 0 when none.
    pub confidence: f32,
    /// Assigned segments sorted by vertical center.
    pub segments: Vec<OcrSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionResult {
    /// Exactly one entry per input position, in position order.
    pub label_texts: Vec<LabelText>,
    /// Mean confidence over all distributed annotations.
    pub overall_confidence: f32,
    /// Annotations considered (after dropping a leading full-text block).
    pub total_annotations: usize,
    pub distributed_annotations: usize,
    /// Annotations with a missing or non-finite polygon.
    pub skipped_annotations: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OcrTextDistributor {
    skip_leading_block: bool,
}

impl OcrTextDistributor {
    /// Distributor configured for a provider's response conventions.
    pub fn for_provider(capabilities: OcrCapabilities) -> Self {
        Self {
            skip_leading_block: capabilities.leading_full_text_block,
        }
    }

    pub fn with_leading_block_skip(skip: bool) -> Self {
        Self {
            skip_leading_block: skip,
        }
    }

    pub fn distribute(
        &self,
        annotations: &[TextAnnotation],
        positions: &[LabelPosition],
    ) -> DistributionResult {
        let tokens = if self.skip_leading_block && !annotations.is_empty() {
            &annotations[1..]
        } else {
            annotations
        };

        let mut buckets: Vec<Vec<OcrSegment>> = vec![Vec::new(); positions.len()];
        let mut malformed = 0usize;
        let mut unplaced = 0usize;
        let mut confidence_sum = 0f32;

        for annotation in tokens {
            let Some(center) = annotation.vertical_center() else {
                malformed += 1;
                continue;
            };
            let Some(slot) = assign(center, positions) else {
                unplaced += 1;
                continue;
            };
            confidence_sum += annotation.confidence;
            buckets[slot].push(OcrSegment::from_annotation(annotation, center));
        }

        if malformed > 0 {
            warn!(
                skipped = malformed,
                "Skipped OCR annotations without a usable bounding polygon"
            );
        }
        if unplaced > 0 {
            warn!(
                skipped = unplaced,
                "Skipped OCR annotations: the composite has no label positions"
            );
        }
        let skipped = malformed + unplaced;

        let distributed = tokens.len() - skipped;
        let label_texts = buckets
            .into_iter()
            .zip(positions)
            .map(|(mut segments, position)| {
                segments.sort_by(|a, b| a.vertical_center.total_cmp(&b.vertical_center));
                let confidence = mean(segments.iter().map(|s| s.confidence), segments.len());
                let text = segments
                    .iter()
                    .map(|s| s.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                LabelText {
                    index: position.index,
                    text,
                    confidence,
                    segments,
                }
            })
            .collect();

        debug!(
            total = tokens.len(),
            distributed,
            skipped,
            labels = positions.len(),
            "Distributed OCR annotations"
        );

        DistributionResult {
            label_texts,
            overall_confidence: if distributed == 0 {
                0.0
            } else {
                confidence_sum / distributed as f32
            },
            total_annotations: tokens.len(),
            distributed_annotations: distributed,
            skipped_annotations: skipped,
        }
    }
}

/// Index of the band containing `center`, else of the nearest band center.
fn assign(center: f32, positions: &[LabelPosition]) -> Option<usize> {
    if let Some(slot) = positions.iter().position(|p| p.contains(center)) {
        return Some(slot);
    }
    positions
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.band_center() - center)
                .abs()
                .total_cmp(&(b.band_center() - center).abs())
        })
        .map(|(slot, _)| slot)
}

fn mean(values: impl Iterator<Item = f32>, count: usize) -> f32 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f32>() / count as f32
}

/// Group segments into reading lines.
///
/// Segments whose vertical centers lie within half the median segment height
/// (at least [`MIN_LINE_TOLERANCE_PX`]) of the line's first segment share a
/// line; each line reads left to right.
pub fn reading_lines(segments: &[OcrSegment]) -> Vec<String> {
    if segments.is_empty() {
        return Vec::new();
    }

    let mut heights: Vec<f32> = segments.iter().map(OcrSegment::height).collect();
    heights.sort_by(f32::total_cmp);
    let tolerance = (heights[heights.len() / 2] / 2.0).max(MIN_LINE_TOLERANCE_PX);

    let mut ordered: Vec<&OcrSegment> = segments.iter().collect();
    ordered.sort_by(|a, b| a.vertical_center.total_cmp(&b.vertical_center));

    let mut lines: Vec<Vec<&OcrSegment>> = Vec::new();
    for segment in ordered {
        match lines.last_mut() {
            Some(line) if segment.vertical_center - line[0].vertical_center <= tolerance => {
                line.push(segment)
            }
            _ => lines.push(vec![segment]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.horizontal_center().total_cmp(&b.horizontal_center()));
            line.iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}
