//! Encode-measure-adjust loop for the output artifact.
//!
//! The baseline contract is manual: encode at the operator's quality, report
//! the size and any overage, and let them turn the quality down. The
//! automatic search is an opt-in on top.

use super::{ImagingError, ImagingResult};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use image::{RgbImage, codecs::jpeg::JpegEncoder};

/// Hard ceiling on the compressed artifact.
pub const DEFAULT_BYTE_BUDGET: usize = 200 * 1024;

/// Quality the studio starts from.
pub const DEFAULT_QUALITY: f32 = 0.85;

/// An encoded avatar candidate. Replaced wholesale on every re-encode.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub bytes: Bytes,
    pub quality: f32,
    pub width: u32,
    pub height: u32,
}

impl OutputArtifact {
    pub const MIME: &'static str = "image/jpeg";

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn exceeds(&self, budget: usize) -> bool {
        self.len() > budget
    }

    /// Inline preview, as handed back to the profile view after a successful upload.
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            Self::MIME,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

/// Map a quality in `(0, 1]` onto the encoder's 1..=100 scale.
pub fn jpeg_quality(quality: f32) -> ImagingResult<u8> {
    if !quality.is_finite() || quality <= 0.0 || quality > 1.0 {
        return Err(ImagingError::InvalidQuality(quality));
    }
    Ok((quality * 100.0).round().clamp(1.0, 100.0) as u8)
}

/// Encode the bitmap as JPEG at `quality`.
pub fn encode(bitmap: &RgbImage, quality: f32) -> ImagingResult<OutputArtifact> {
    let q = jpeg_quality(quality)?;
    let mut encoded = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut encoded, q);
    encoder.encode_image(bitmap).map_err(ImagingError::Encode)?;
    Ok(OutputArtifact {
        bytes: Bytes::from(encoded),
        quality,
        width: bitmap.width(),
        height: bitmap.height(),
    })
}

/// Result of one encode pass: the artifact and how far it is over budget.
#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub artifact: OutputArtifact,
    /// Bytes over the budget, `None` when the artifact fits.
    pub overage: Option<usize>,
}

impl CompressionOutcome {
    pub fn within_budget(&self) -> bool {
        self.overage.is_none()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionController {
    budget: usize,
}

impl Default for CompressionController {
    fn default() -> Self {
        Self::new(DEFAULT_BYTE_BUDGET)
    }
}

impl CompressionController {
    pub fn new(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Encode at the requested quality and measure against the budget.
    /// An oversize artifact is reported, never silently re-encoded.
    pub fn evaluate(&self, bitmap: &RgbImage, quality: f32) -> ImagingResult<CompressionOutcome> {
        let artifact = encode(bitmap, quality)?;
        let overage = artifact.len().checked_sub(self.budget).filter(|over| *over > 0);
        if let Some(over) = overage {
            tracing::warn!(
                size = artifact.len(),
                budget = self.budget,
                quality,
                "artifact is {} bytes over budget",
                over
            );
        } else {
            tracing::debug!(size = artifact.len(), quality, "artifact within budget");
        }
        Ok(CompressionOutcome { artifact, overage })
    }

    /// Highest quality in `[min_quality, max_quality]` whose encode fits the budget.
    ///
    /// Binary search over the encoder's integer quality steps, so at most
    /// seven or eight encodes.
    pub fn search_quality(
        &self,
        bitmap: &RgbImage,
        min_quality: f32,
        max_quality: f32,
    ) -> ImagingResult<OutputArtifact> {
        let mut lo = jpeg_quality(min_quality)?;
        let mut hi = jpeg_quality(max_quality)?;
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }

        let mut best: Option<OutputArtifact> = None;
        let mut smallest = usize::MAX;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            let candidate = encode(bitmap, mid as f32 / 100.0)?;
            smallest = smallest.min(candidate.len());
            // `lo` starts at 1, so `mid - 1` cannot underflow.
            if candidate.exceeds(self.budget) {
                hi = mid - 1;
            } else {
                lo = mid + 1;
                best = Some(candidate);
            }
        }

        match best {
            Some(artifact) => {
                tracing::info!(
                    quality = artifact.quality,
                    size = artifact.len(),
                    "selected quality within budget"
                );
                Ok(artifact)
            }
            None => Err(ImagingError::BudgetUnreachable {
                budget: self.budget,
                smallest,
            }),
        }
    }
}
