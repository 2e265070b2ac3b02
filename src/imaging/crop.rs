//! Pan/zoom model for the square crop stage.
//!
//! The displayed image is `natural × base_scale × scale` pixels, translated by
//! `(offset_x, offset_y)` in stage space. Every committed transform keeps the
//! displayed rectangle covering the whole stage:
//! `offset ∈ [min(0, stage − display), 0]` on both axes.

use super::{ImagingError, ImagingResult};

/// Tunables for the crop stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropSettings {
    /// Side of the square stage in display pixels.
    pub stage_size: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for CropSettings {
    fn default() -> Self {
        Self {
            stage_size: 420.0,
            min_zoom: 1.0,
            max_zoom: 3.0,
        }
    }
}

impl CropSettings {
    /// Zoom below 1 would let the short side shrink inside the stage, which the
    /// coverage invariant forbids.
    pub fn validate(&self) -> ImagingResult<()> {
        if !(self.stage_size.is_finite() && self.stage_size > 0.0) {
            return Err(ImagingError::InvalidGeometry(format!(
                "stage size must be positive, got {}",
                self.stage_size
            )));
        }
        if !(self.min_zoom.is_finite() && self.max_zoom.is_finite())
            || self.min_zoom < 1.0
            || self.min_zoom > self.max_zoom
        {
            return Err(ImagingError::InvalidGeometry(format!(
                "zoom range [{}, {}] must satisfy 1 <= min <= max",
                self.min_zoom, self.max_zoom
            )));
        }
        Ok(())
    }
}

/// Fixed at load time: where the image sits relative to the stage at `scale = 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageGeometry {
    pub stage_size: f64,
    pub natural_width: u32,
    pub natural_height: u32,
    /// Factor that makes the shorter natural side exactly fill the stage.
    pub base_scale: f64,
}

impl StageGeometry {
    pub fn new(stage_size: f64, natural_width: u32, natural_height: u32) -> ImagingResult<Self> {
        if natural_width == 0 || natural_height == 0 {
            return Err(ImagingError::InvalidGeometry(format!(
                "image is {natural_width}x{natural_height}"
            )));
        }
        let short_side = natural_width.min(natural_height) as f64;
        Ok(Self {
            stage_size,
            natural_width,
            natural_height,
            base_scale: stage_size / short_side,
        })
    }

    /// Displayed image size in stage pixels at the given zoom.
    pub fn display_size(&self, scale: f64) -> (f64, f64) {
        let factor = self.base_scale * scale;
        (
            self.natural_width as f64 * factor,
            self.natural_height as f64 * factor,
        )
    }
}

/// Translation and zoom of the displayed image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropTransform {
    pub offset_x: f64,
    pub offset_y: f64,
    pub scale: f64,
}

/// Pointer and slider input, already reduced to stage coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CropInput {
    DragStart { x: f64, y: f64 },
    DragMove { x: f64, y: f64 },
    DragEnd,
    /// Absolute slider position.
    Zoom(f64),
    /// Relative step, e.g. from a wheel or +/- buttons.
    ZoomBy(f64),
}

/// Pointer position minus image offset at the moment the drag started.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DragAnchor {
    x: f64,
    y: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CropModel {
    geometry: StageGeometry,
    settings: CropSettings,
    transform: CropTransform,
    drag: Option<DragAnchor>,
}

/// Clamp one axis offset so a `display`-long edge still covers `stage`.
pub fn clamp_offset(value: f64, display: f64, stage: f64) -> f64 {
    let min = (stage - display).min(0.0);
    value.clamp(min, 0.0)
}

impl CropModel {
    /// Enter the cropping stage: base scale fixed, zoom 1, image centered.
    pub fn new(natural_width: u32, natural_height: u32, settings: CropSettings) -> ImagingResult<Self> {
        settings.validate()?;
        let geometry = StageGeometry::new(settings.stage_size, natural_width, natural_height)?;
        let scale = 1.0_f64.clamp(settings.min_zoom, settings.max_zoom);
        let (display_w, display_h) = geometry.display_size(scale);
        let stage = geometry.stage_size;
        let transform = CropTransform {
            offset_x: clamp_offset((stage - display_w) / 2.0, display_w, stage),
            offset_y: clamp_offset((stage - display_h) / 2.0, display_h, stage),
            scale,
        };
        Ok(Self {
            geometry,
            settings,
            transform,
            drag: None,
        })
    }

    pub fn geometry(&self) -> &StageGeometry {
        &self.geometry
    }

    pub fn transform(&self) -> CropTransform {
        self.transform
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Apply one input event. Returns whether the committed transform changed.
    ///
    /// Non-finite coordinates and moves without an active drag are ignored.
    pub fn apply(&mut self, input: CropInput) -> bool {
        let before = self.transform;
        match input {
            CropInput::DragStart { x, y } => {
                if x.is_finite() && y.is_finite() {
                    self.drag = Some(DragAnchor {
                        x: x - self.transform.offset_x,
                        y: y - self.transform.offset_y,
                    });
                }
            }
            CropInput::DragMove { x, y } => {
                if let Some(anchor) = self.drag {
                    if x.is_finite() && y.is_finite() {
                        self.commit(x - anchor.x, y - anchor.y, self.transform.scale);
                    }
                }
            }
            CropInput::DragEnd => self.drag = None,
            CropInput::Zoom(scale) => {
                if scale.is_finite() {
                    self.commit(self.transform.offset_x, self.transform.offset_y, scale);
                }
            }
            CropInput::ZoomBy(delta) => {
                if delta.is_finite() {
                    let scale = self.transform.scale + delta;
                    self.commit(self.transform.offset_x, self.transform.offset_y, scale);
                }
            }
        }
        self.transform != before
    }

    /// The only way a transform is stored: bound the zoom, then re-clamp both
    /// offsets against the display size at that zoom.
    fn commit(&mut self, offset_x: f64, offset_y: f64, scale: f64) {
        let scale = scale.clamp(self.settings.min_zoom, self.settings.max_zoom);
        let (display_w, display_h) = self.geometry.display_size(scale);
        let stage = self.geometry.stage_size;
        self.transform = CropTransform {
            offset_x: clamp_offset(offset_x, display_w, stage),
            offset_y: clamp_offset(offset_y, display_h, stage),
            scale,
        };
    }

    /// Whether the displayed rectangle covers the stage, with float slack.
    pub fn covers_stage(&self) -> bool {
        const EPS: f64 = 1e-6;
        let (display_w, display_h) = self.geometry.display_size(self.transform.scale);
        let stage = self.geometry.stage_size;
        let t = self.transform;
        t.offset_x <= EPS
            && t.offset_y <= EPS
            && t.offset_x + display_w >= stage - EPS
            && t.offset_y + display_h >= stage - EPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(w: u32, h: u32) -> CropModel {
        CropModel::new(w, h, CropSettings::default()).unwrap()
    }

    #[test]
    fn base_scale_fills_short_side() {
        let m = model(1000, 500);
        assert!((m.geometry().base_scale - 420.0 / 500.0).abs() < 1e-12);
        let (w, h) = m.geometry().display_size(1.0);
        assert!((h - 420.0).abs() < 1e-9);
        assert!((w - 840.0).abs() < 1e-9);
    }

    #[test]
    fn starts_centered_on_long_axis() {
        let m = model(1000, 500);
        let t = m.transform();
        assert_eq!(t.scale, 1.0);
        assert!((t.offset_x - (-210.0)).abs() < 1e-9);
        assert_eq!(t.offset_y, 0.0);

        let portrait = model(300, 900);
        assert_eq!(portrait.transform().offset_x, 0.0);
        assert!((portrait.transform().offset_y - (-420.0)).abs() < 1e-9);
    }

    #[test]
    fn drag_moves_by_pointer_delta() {
        let mut m = model(1000, 500);
        m.apply(CropInput::DragStart { x: 100.0, y: 100.0 });
        assert!(m.apply(CropInput::DragMove { x: 150.0, y: 100.0 }));
        assert!((m.transform().offset_x - (-160.0)).abs() < 1e-9);
        m.apply(CropInput::DragEnd);
        assert!(!m.apply(CropInput::DragMove { x: 0.0, y: 0.0 }));
    }

    #[test]
    fn drag_is_clamped_to_cover_stage() {
        let mut m = model(1000, 500);
        m.apply(CropInput::DragStart { x: 0.0, y: 0.0 });
        m.apply(CropInput::DragMove { x: 5000.0, y: 5000.0 });
        assert_eq!(m.transform().offset_x, 0.0);
        assert_eq!(m.transform().offset_y, 0.0);
        m.apply(CropInput::DragMove { x: -5000.0, y: -5000.0 });
        assert!((m.transform().offset_x - (420.0 - 840.0)).abs() < 1e-9);
        assert_eq!(m.transform().offset_y, 0.0);
        assert!(m.covers_stage());
    }

    #[test]
    fn zoom_is_bounded_and_reclamps_offsets() {
        let mut m = model(800, 800);
        m.apply(CropInput::Zoom(3.0));
        m.apply(CropInput::DragStart { x: 0.0, y: 0.0 });
        m.apply(CropInput::DragMove { x: -10_000.0, y: -10_000.0 });
        m.apply(CropInput::DragEnd);
        assert!((m.transform().offset_x - (420.0 - 1260.0)).abs() < 1e-9);

        // Zooming back out must pull the image back over the stage.
        m.apply(CropInput::Zoom(1.0));
        assert_eq!(m.transform().offset_x, 0.0);
        assert_eq!(m.transform().offset_y, 0.0);
        assert!(m.covers_stage());

        m.apply(CropInput::Zoom(99.0));
        assert_eq!(m.transform().scale, 3.0);
        m.apply(CropInput::ZoomBy(-99.0));
        assert_eq!(m.transform().scale, 1.0);
    }

    #[test]
    fn non_finite_input_is_ignored() {
        let mut m = model(640, 480);
        let before = m.transform();
        assert!(!m.apply(CropInput::Zoom(f64::NAN)));
        m.apply(CropInput::DragStart { x: f64::INFINITY, y: 0.0 });
        assert!(!m.is_dragging());
        assert_eq!(m.transform(), before);
    }

    #[test]
    fn every_input_sequence_keeps_coverage() {
        // Deterministic pseudo-random walk over drags and zooms.
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            (seed % 10_000) as f64 / 10_000.0
        };
        for (w, h) in [(1, 1), (3000, 200), (200, 3000), (1024, 768), (421, 420)] {
            let mut m = model(w, h);
            assert!(m.covers_stage());
            for _ in 0..500 {
                let input = match (next() * 4.0) as u32 {
                    0 => CropInput::DragStart { x: next() * 420.0, y: next() * 420.0 },
                    1 => CropInput::DragMove {
                        x: next() * 4000.0 - 2000.0,
                        y: next() * 4000.0 - 2000.0,
                    },
                    2 => CropInput::Zoom(next() * 5.0 - 1.0),
                    _ => CropInput::ZoomBy(next() - 0.5),
                };
                m.apply(input);
                assert!(m.covers_stage(), "{w}x{h} after {input:?}: {:?}", m.transform());
            }
        }
    }

    #[test]
    fn rejects_zoom_range_below_one() {
        let settings = CropSettings {
            min_zoom: 0.6,
            ..CropSettings::default()
        };
        assert!(CropModel::new(100, 100, settings).is_err());
        assert!(CropModel::new(0, 100, CropSettings::default()).is_err());
    }
}
