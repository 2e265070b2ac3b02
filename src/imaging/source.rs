//! Loading a user-supplied photo after the client pre-flight checks.

use super::{ImagingError, ImagingResult};
use crate::format::{self, ImageKind};
use bytes::Bytes;
use image::DynamicImage;

/// Ceiling on the raw source file, checked before anything is decoded.
pub const MAX_SOURCE_BYTES: usize = 15 * 1024 * 1024;

/// A decoded photo plus the metadata it arrived with. Never mutated after load.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub file_name: String,
    pub declared_mime: String,
    pub kind: ImageKind,
    pub raw: Bytes,
    pub pixels: DynamicImage,
}

impl SourceImage {
    /// Run the pre-flight checks (size, declared type, magic number) and decode.
    ///
    /// The checks run cheapest first and the decode only happens once the
    /// signature has been confirmed. Decoding uses the sniffed format, not the
    /// declared one.
    pub fn load(
        raw: impl Into<Bytes>,
        declared_mime: &str,
        file_name: &str,
        max_bytes: usize,
    ) -> ImagingResult<Self> {
        let raw = raw.into();
        if raw.len() > max_bytes {
            return Err(ImagingError::SourceTooLarge {
                size: raw.len(),
                limit: max_bytes,
            });
        }
        if ImageKind::from_mime(declared_mime).is_none() {
            return Err(ImagingError::UnsupportedType(declared_mime.to_string()));
        }
        let head = &raw[..raw.len().min(format::SNIFF_LEN)];
        let kind = format::sniff(head).ok_or(ImagingError::SignatureMismatch)?;

        let pixels = image::load_from_memory_with_format(&raw, kind.image_format())
            .map_err(ImagingError::Decode)?;
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(ImagingError::InvalidGeometry("source has no pixels".into()));
        }

        Ok(Self {
            file_name: file_name.to_string(),
            declared_mime: declared_mime.to_string(),
            kind,
            raw,
            pixels,
        })
    }

    pub fn natural_size(&self) -> (u32, u32) {
        (self.pixels.width(), self.pixels.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{jpeg_bytes, png_bytes, webp_bytes};

    #[test]
    fn loads_genuine_png() {
        let src = SourceImage::load(png_bytes(40, 30), "image/png", "a.png", MAX_SOURCE_BYTES)
            .unwrap();
        assert_eq!(src.kind, ImageKind::Png);
        assert_eq!(src.natural_size(), (40, 30));
    }

    #[test]
    fn loads_genuine_webp() {
        let src = SourceImage::load(webp_bytes(36, 20), "image/webp", "a.webp", MAX_SOURCE_BYTES)
            .unwrap();
        assert_eq!(src.kind, ImageKind::WebP);
        assert_eq!(src.natural_size(), (36, 20));
    }

    #[test]
    fn decodes_with_sniffed_format_when_declared_differs() {
        // A PNG saved with a .jpg name still loads; the server is where the
        // declared type has to match.
        let src = SourceImage::load(png_bytes(10, 12), "image/jpeg", "a.jpg", MAX_SOURCE_BYTES)
            .unwrap();
        assert_eq!(src.kind, ImageKind::Png);
    }

    #[test]
    fn rejects_oversize_before_decoding() {
        let err = SourceImage::load(jpeg_bytes(64, 64, 0.9), "image/jpeg", "a.jpg", 100)
            .unwrap_err();
        assert!(matches!(err, ImagingError::SourceTooLarge { limit: 100, .. }));
    }

    #[test]
    fn rejects_unlisted_declared_type() {
        let err = SourceImage::load(png_bytes(4, 4), "image/gif", "a.gif", MAX_SOURCE_BYTES)
            .unwrap_err();
        assert!(matches!(err, ImagingError::UnsupportedType(_)));
    }

    #[test]
    fn rejects_disguised_file() {
        let err = SourceImage::load(
            b"#!/bin/sh\necho not an image\n".to_vec(),
            "image/png",
            "evil.png",
            MAX_SOURCE_BYTES,
        )
        .unwrap_err();
        assert!(matches!(err, ImagingError::SignatureMismatch));
    }

    #[test]
    fn truncated_body_fails_decode() {
        let mut bytes = jpeg_bytes(32, 32, 0.9);
        bytes.truncate(20);
        let err = SourceImage::load(bytes, "image/jpeg", "a.jpg", MAX_SOURCE_BYTES).unwrap_err();
        assert!(matches!(err, ImagingError::Decode(_)));
    }
}
