//! Maps the visible stage region back to source pixels and renders the
//! fixed-size square output.

use super::crop::{CropTransform, StageGeometry};
use super::{ImagingError, ImagingResult};
use image::{DynamicImage, RgbImage, imageops::FilterType};

#[derive(Debug, Clone, Copy)]
pub struct RasterSettings {
    /// Side of the square output bitmap.
    pub output_size: u32,
    pub filter: FilterType,
}

impl Default for RasterSettings {
    fn default() -> Self {
        Self {
            output_size: 512,
            filter: FilterType::Triangle,
        }
    }
}

/// Visible square in source-pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Invert the display transform.
///
/// `visible = stage / (base_scale × scale)`, and the origin is
/// `−offset / (base_scale × scale)` clamped into `[0, natural − visible]`.
pub fn source_rect(geometry: &StageGeometry, transform: &CropTransform) -> SourceRect {
    let factor = geometry.base_scale * transform.scale;
    let visible = geometry.stage_size / factor;
    let natural_w = geometry.natural_width as f64;
    let natural_h = geometry.natural_height as f64;
    SourceRect {
        x: (-transform.offset_x / factor).min(natural_w - visible).max(0.0),
        y: (-transform.offset_y / factor).min(natural_h - visible).max(0.0),
        width: visible,
        height: visible,
    }
}

/// Snap a fractional rect to whole pixels that stay inside the source.
fn pixel_rect(rect: &SourceRect, natural_w: u32, natural_h: u32) -> (u32, u32, u32) {
    let short = natural_w.min(natural_h);
    let side = (rect.width.round() as u32).clamp(1, short);
    let x = (rect.x.round() as u32).min(natural_w - side);
    let y = (rect.y.round() as u32).min(natural_h - side);
    (x, y, side)
}

/// Render the visible region of `source` into an `output_size²` RGB bitmap.
///
/// The stage is only a display convenience; the source rectangle is recomputed
/// here every time, so the export always matches what the stage shows.
pub fn rasterize(
    source: &DynamicImage,
    geometry: &StageGeometry,
    transform: &CropTransform,
    settings: &RasterSettings,
) -> ImagingResult<RgbImage> {
    if settings.output_size == 0 {
        return Err(ImagingError::InvalidGeometry("output size must be positive".into()));
    }
    if (source.width(), source.height()) != (geometry.natural_width, geometry.natural_height) {
        return Err(ImagingError::InvalidGeometry(format!(
            "geometry is for {}x{} but source is {}x{}",
            geometry.natural_width,
            geometry.natural_height,
            source.width(),
            source.height()
        )));
    }

    let rect = source_rect(geometry, transform);
    let (x, y, side) = pixel_rect(&rect, geometry.natural_width, geometry.natural_height);
    tracing::debug!(x, y, side, output = settings.output_size, "rasterizing crop");

    let out = settings.output_size;
    let rendered = source
        .crop_imm(x, y, side, side)
        .resize_exact(out, out, settings.filter)
        .to_rgb8();
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::crop::{CropInput, CropModel, CropSettings};
    use image::{Rgb, RgbImage};

    fn halves(w: u32, h: u32) -> DynamicImage {
        // Left half red, right half blue.
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, _| {
            if x < w / 2 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        }))
    }

    #[test]
    fn centered_rect_for_landscape() {
        let m = CropModel::new(1000, 500, CropSettings::default()).unwrap();
        let rect = source_rect(m.geometry(), &m.transform());
        assert!((rect.width - 500.0).abs() < 1e-9);
        assert!((rect.x - 250.0).abs() < 1e-9);
        assert_eq!(rect.y, 0.0);
    }

    #[test]
    fn zoom_shrinks_visible_region() {
        let mut m = CropModel::new(800, 800, CropSettings::default()).unwrap();
        m.apply(CropInput::Zoom(2.0));
        let rect = source_rect(m.geometry(), &m.transform());
        assert!((rect.width - 400.0).abs() < 1e-9);
        assert!(rect.x >= 0.0 && rect.x + rect.width <= 800.0 + 1e-9);
    }

    #[test]
    fn rect_is_clamped_inside_source() {
        let m = CropModel::new(600, 400, CropSettings::default()).unwrap();
        let wild = CropTransform {
            offset_x: -1.0e6,
            offset_y: 50.0,
            scale: 1.0,
        };
        let rect = source_rect(m.geometry(), &wild);
        assert!((rect.x - 200.0).abs() < 1e-9);
        assert_eq!(rect.y, 0.0);
    }

    #[test]
    fn output_is_always_square_and_fixed() {
        let settings = RasterSettings {
            output_size: 64,
            ..RasterSettings::default()
        };
        for (w, h) in [(1, 1), (7, 300), (300, 7), (640, 480), (513, 512)] {
            for zoom in [1.0, 1.7, 3.0] {
                let mut m = CropModel::new(w, h, CropSettings::default()).unwrap();
                m.apply(CropInput::Zoom(zoom));
                let img = halves(w, h);
                let out = rasterize(&img, m.geometry(), &m.transform(), &settings).unwrap();
                assert_eq!(out.dimensions(), (64, 64), "{w}x{h} at {zoom}");
            }
        }
    }

    #[test]
    fn export_follows_pan() {
        let settings = RasterSettings {
            output_size: 32,
            filter: FilterType::Nearest,
        };
        let img = halves(400, 200);
        let mut m = CropModel::new(400, 200, CropSettings::default()).unwrap();

        // Pan fully right: the left edge of the image, all red.
        m.apply(CropInput::DragStart { x: 0.0, y: 0.0 });
        m.apply(CropInput::DragMove { x: 10_000.0, y: 0.0 });
        let left = rasterize(&img, m.geometry(), &m.transform(), &settings).unwrap();
        assert_eq!(left.get_pixel(16, 16), &Rgb([255, 0, 0]));

        // Pan fully left: all blue.
        m.apply(CropInput::DragMove { x: -10_000.0, y: 0.0 });
        let right = rasterize(&img, m.geometry(), &m.transform(), &settings).unwrap();
        assert_eq!(right.get_pixel(16, 16), &Rgb([0, 0, 255]));
    }

    #[test]
    fn stage_size_does_not_change_export_region() {
        let small = CropModel::new(900, 600, CropSettings { stage_size: 200.0, ..CropSettings::default() }).unwrap();
        let large = CropModel::new(900, 600, CropSettings { stage_size: 800.0, ..CropSettings::default() }).unwrap();
        let a = source_rect(small.geometry(), &small.transform());
        let b = source_rect(large.geometry(), &large.transform());
        assert!((a.x - b.x).abs() < 1e-9 && (a.width - b.width).abs() < 1e-9);
    }

    #[test]
    fn mismatched_geometry_is_rejected() {
        let m = CropModel::new(10, 10, CropSettings::default()).unwrap();
        let err = rasterize(&halves(20, 10), m.geometry(), &m.transform(), &RasterSettings::default());
        assert!(err.is_err());
    }
}
