//! Client-side imaging: loading the source photo, the crop transform model,
//! rasterizing the visible square and compressing it under a byte budget.
//!
//! Nothing here touches the network or a UI toolkit; every step is a plain
//! function or value that the capture studio drives.

pub mod compress;
pub mod crop;
pub mod raster;
pub mod source;

use thiserror::Error;

pub use compress::{CompressionController, CompressionOutcome, OutputArtifact};
pub use crop::{CropInput, CropModel, CropSettings, CropTransform, StageGeometry};
pub use raster::{RasterSettings, SourceRect};
pub use source::SourceImage;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("source is {size} bytes, limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },
    #[error("declared type `{0}` is not supported (use JPEG, PNG or WebP)")]
    UnsupportedType(String),
    #[error("file contents are not a supported image")]
    SignatureMismatch,
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("quality {0} outside (0, 1]")]
    InvalidQuality(f32),
    #[error("no quality fits the {budget} byte budget (smallest encode was {smallest} bytes)")]
    BudgetUnreachable { budget: usize, smallest: usize },
    #[error("failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode artifact: {0}")]
    Encode(#[source] image::ImageError),
}

pub type ImagingResult<T> = Result<T, ImagingError>;
