//! The capture studio: one state value and one transition function.
//!
//! `dispatch` never awaits. Anything slow or fallible outside the process
//! (the upload) comes back as a [`Command`] for the driver to run, and its
//! outcome is fed back in as another event.

use crate::imaging::{
    CompressionController, CompressionOutcome, CropInput, CropModel, CropSettings, ImagingError,
    OutputArtifact, RasterSettings, SourceImage,
    compress::{DEFAULT_BYTE_BUDGET, DEFAULT_QUALITY},
    raster,
    source::MAX_SOURCE_BYTES,
};
use bytes::Bytes;
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Imaging(#[from] ImagingError),
    #[error("`{event}` is not allowed while {stage}")]
    InvalidTransition {
        event: &'static str,
        stage: &'static str,
    },
    #[error("artifact is {size} bytes, over the {budget} byte budget; lower the quality")]
    OverBudget { size: usize, budget: usize },
    #[error("an upload is already in flight")]
    UploadInFlight,
}

pub type StudioResult<T> = Result<T, StudioError>;

#[derive(Debug, Clone, Copy)]
pub struct StudioSettings {
    pub crop: CropSettings,
    pub raster: RasterSettings,
    pub byte_budget: usize,
    pub max_source_bytes: usize,
    pub default_quality: f32,
}

impl Default for StudioSettings {
    fn default() -> Self {
        Self {
            crop: CropSettings::default(),
            raster: RasterSettings::default(),
            byte_budget: DEFAULT_BYTE_BUDGET,
            max_source_bytes: MAX_SOURCE_BYTES,
            default_quality: DEFAULT_QUALITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadStatus {
    Idle,
    InFlight { progress: f64 },
    Failed { message: String },
}

/// Everything the preview stage owns. The bitmap is kept so quality changes
/// re-encode without re-rasterizing.
#[derive(Debug, Clone)]
pub struct Preview {
    pub source: Arc<SourceImage>,
    pub crop: CropModel,
    pub bitmap: RgbImage,
    pub outcome: CompressionOutcome,
    pub upload: UploadStatus,
}

impl Preview {
    pub fn artifact(&self) -> &OutputArtifact {
        &self.outcome.artifact
    }
}

#[derive(Debug, Clone)]
pub enum Stage {
    Selecting,
    Cropping {
        source: Arc<SourceImage>,
        crop: CropModel,
    },
    Previewing(Box<Preview>),
}

impl Stage {
    fn name(&self) -> &'static str {
        match self {
            Stage::Selecting => "selecting",
            Stage::Cropping { .. } => "cropping",
            Stage::Previewing(p) if matches!(p.upload, UploadStatus::InFlight { .. }) => "uploading",
            Stage::Previewing(_) => "previewing",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StudioEvent {
    FileSelected {
        bytes: Bytes,
        declared_mime: String,
        file_name: String,
    },
    Crop(CropInput),
    CommitCrop,
    QualityChanged(f32),
    BackToCrop,
    Reset,
    RequestUpload,
    UploadProgress(f64),
    UploadSucceeded { avatar_url: Option<String> },
    UploadFailed { message: String },
    UploadCancelled,
    Retry,
}

impl StudioEvent {
    fn name(&self) -> &'static str {
        match self {
            StudioEvent::FileSelected { .. } => "FileSelected",
            StudioEvent::Crop(_) => "Crop",
            StudioEvent::CommitCrop => "CommitCrop",
            StudioEvent::QualityChanged(_) => "QualityChanged",
            StudioEvent::BackToCrop => "BackToCrop",
            StudioEvent::Reset => "Reset",
            StudioEvent::RequestUpload => "RequestUpload",
            StudioEvent::UploadProgress(_) => "UploadProgress",
            StudioEvent::UploadSucceeded { .. } => "UploadSucceeded",
            StudioEvent::UploadFailed { .. } => "UploadFailed",
            StudioEvent::UploadCancelled => "UploadCancelled",
            StudioEvent::Retry => "Retry",
        }
    }
}

/// Work the driver must perform on the studio's behalf.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Upload { artifact: OutputArtifact },
}

/// What the profile view gets after a successful upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedUpload {
    /// Server path of the stored avatar, when the response carried one.
    pub avatar_url: Option<String>,
    /// Inline copy of the uploaded artifact.
    pub preview_data_url: String,
}

#[derive(Debug)]
pub struct Studio {
    settings: StudioSettings,
    compressor: CompressionController,
    quality: f32,
    stage: Stage,
    last_upload: Option<CompletedUpload>,
}

impl Default for Studio {
    fn default() -> Self {
        Self::new(StudioSettings::default())
    }
}

impl Studio {
    pub fn new(settings: StudioSettings) -> Self {
        Self {
            compressor: CompressionController::new(settings.byte_budget),
            quality: settings.default_quality,
            settings,
            stage: Stage::Selecting,
            last_upload: None,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn settings(&self) -> &StudioSettings {
        &self.settings
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn preview(&self) -> Option<&Preview> {
        match &self.stage {
            Stage::Previewing(preview) => Some(preview),
            _ => None,
        }
    }

    pub fn last_upload(&self) -> Option<&CompletedUpload> {
        self.last_upload.as_ref()
    }

    /// Overage warning for the current artifact, if any.
    pub fn budget_warning(&self) -> Option<String> {
        let preview = self.preview()?;
        preview.outcome.overage.map(|over| {
            format!(
                "avatar is {} bytes, {} over the {} byte limit; lower the quality",
                preview.artifact().len(),
                over,
                self.settings.byte_budget
            )
        })
    }

    /// Whether `RequestUpload` would currently produce a command.
    pub fn can_upload(&self) -> bool {
        self.preview().is_some_and(|p| {
            p.outcome.within_budget() && !matches!(p.upload, UploadStatus::InFlight { .. })
        })
    }

    fn uploading(&self) -> bool {
        matches!(&self.stage, Stage::Previewing(p) if matches!(p.upload, UploadStatus::InFlight { .. }))
    }

    /// Apply one event. On error the studio is left exactly as it was.
    pub fn dispatch(&mut self, event: StudioEvent) -> StudioResult<Option<Command>> {
        // While a request is out only its own outcome may change the studio.
        if self.uploading()
            && !matches!(
                event,
                StudioEvent::UploadProgress(_)
                    | StudioEvent::UploadSucceeded { .. }
                    | StudioEvent::UploadFailed { .. }
                    | StudioEvent::UploadCancelled
            )
        {
            return Err(StudioError::UploadInFlight);
        }

        match event {
            StudioEvent::FileSelected {
                bytes,
                declared_mime,
                file_name,
            } => {
                let source = SourceImage::load(
                    bytes,
                    &declared_mime,
                    &file_name,
                    self.settings.max_source_bytes,
                )?;
                let (w, h) = source.natural_size();
                let crop = CropModel::new(w, h, self.settings.crop)?;
                tracing::info!(file = %file_name, width = w, height = h, kind = %source.kind, "source loaded");
                self.stage = Stage::Cropping {
                    source: Arc::new(source),
                    crop,
                };
                Ok(None)
            }

            StudioEvent::Crop(input) => match &mut self.stage {
                Stage::Cropping { crop, .. } => {
                    crop.apply(input);
                    Ok(None)
                }
                stage => Err(invalid(&StudioEvent::Crop(input), stage)),
            },

            StudioEvent::CommitCrop => {
                let Stage::Cropping { source, crop } = &self.stage else {
                    return Err(invalid(&StudioEvent::CommitCrop, &self.stage));
                };
                let bitmap = raster::rasterize(
                    &source.pixels,
                    crop.geometry(),
                    &crop.transform(),
                    &self.settings.raster,
                )?;
                let outcome = self.compressor.evaluate(&bitmap, self.quality)?;
                let source = source.clone();
                let mut crop = crop.clone();
                crop.apply(CropInput::DragEnd);
                self.stage = Stage::Previewing(Box::new(Preview {
                    source,
                    crop,
                    bitmap,
                    outcome,
                    upload: UploadStatus::Idle,
                }));
                Ok(None)
            }

            StudioEvent::QualityChanged(quality) => {
                crate::imaging::compress::jpeg_quality(quality)?;
                if let Stage::Previewing(preview) = &mut self.stage {
                    preview.outcome = self.compressor.evaluate(&preview.bitmap, quality)?;
                    // A new artifact clears a stale failure; the retry would
                    // otherwise send bytes the user is no longer looking at.
                    preview.upload = UploadStatus::Idle;
                }
                self.quality = quality;
                Ok(None)
            }

            StudioEvent::BackToCrop => {
                let Stage::Previewing(preview) = &self.stage else {
                    return Err(invalid(&StudioEvent::BackToCrop, &self.stage));
                };
                let (source, crop) = (preview.source.clone(), preview.crop.clone());
                self.stage = Stage::Cropping { source, crop };
                Ok(None)
            }

            StudioEvent::Reset => {
                self.reset();
                Ok(None)
            }

            StudioEvent::RequestUpload => self.start_upload(&StudioEvent::RequestUpload),

            StudioEvent::Retry => {
                let failed = self
                    .preview()
                    .is_some_and(|p| matches!(p.upload, UploadStatus::Failed { .. }));
                if !failed {
                    return Err(invalid(&StudioEvent::Retry, &self.stage));
                }
                self.start_upload(&StudioEvent::Retry)
            }

            StudioEvent::UploadProgress(fraction) => match &mut self.stage {
                Stage::Previewing(p) if matches!(p.upload, UploadStatus::InFlight { .. }) => {
                    if fraction.is_finite() {
                        p.upload = UploadStatus::InFlight {
                            progress: fraction.clamp(0.0, 1.0),
                        };
                    }
                    Ok(None)
                }
                stage => Err(invalid(&StudioEvent::UploadProgress(fraction), stage)),
            },

            StudioEvent::UploadSucceeded { avatar_url } => {
                let Some(preview) = self.preview().filter(|_| self.uploading()) else {
                    return Err(invalid(
                        &StudioEvent::UploadSucceeded { avatar_url },
                        &self.stage,
                    ));
                };
                let completed = CompletedUpload {
                    avatar_url,
                    preview_data_url: preview.artifact().to_data_url(),
                };
                tracing::info!(avatar_url = ?completed.avatar_url, "avatar updated");
                self.reset();
                self.last_upload = Some(completed);
                Ok(None)
            }

            StudioEvent::UploadFailed { message } => match &mut self.stage {
                Stage::Previewing(p) if matches!(p.upload, UploadStatus::InFlight { .. }) => {
                    tracing::warn!("upload failed: {}", message);
                    p.upload = UploadStatus::Failed { message };
                    Ok(None)
                }
                stage => Err(invalid(&StudioEvent::UploadFailed { message }, stage)),
            },

            StudioEvent::UploadCancelled => match &mut self.stage {
                Stage::Previewing(p) if matches!(p.upload, UploadStatus::InFlight { .. }) => {
                    tracing::info!("upload cancelled");
                    p.upload = UploadStatus::Idle;
                    Ok(None)
                }
                stage => Err(invalid(&StudioEvent::UploadCancelled, stage)),
            },
        }
    }

    fn start_upload(&mut self, event: &StudioEvent) -> StudioResult<Option<Command>> {
        let budget = self.settings.byte_budget;
        let Stage::Previewing(preview) = &mut self.stage else {
            return Err(invalid(event, &self.stage));
        };
        if matches!(preview.upload, UploadStatus::InFlight { .. }) {
            return Err(StudioError::UploadInFlight);
        }
        let artifact = preview.artifact();
        if artifact.exceeds(budget) {
            return Err(StudioError::OverBudget {
                size: artifact.len(),
                budget,
            });
        }
        let artifact = artifact.clone();
        preview.upload = UploadStatus::InFlight { progress: 0.0 };
        tracing::debug!(size = artifact.len(), quality = artifact.quality, "upload requested");
        Ok(Some(Command::Upload { artifact }))
    }

    fn reset(&mut self) {
        self.stage = Stage::Selecting;
        self.quality = self.settings.default_quality;
    }
}

fn invalid(event: &StudioEvent, stage: &Stage) -> StudioError {
    StudioError::InvalidTransition {
        event: event.name(),
        stage: stage.name(),
    }
}
