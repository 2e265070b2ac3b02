//! Magic-number sniffing shared by the capture client and the ingest server.
//!
//! Declared MIME types and file extensions are never trusted on their own:
//! the allowlist is a cheap pre-filter, the leading bytes are the binding check.

use serde::Serialize;
use std::fmt;

/// Number of leading bytes needed to recognise every supported format.
pub const SNIFF_LEN: usize = 12;

/// Raster formats the pipeline accepts as input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    WebP,
}

impl ImageKind {
    pub fn mime(self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
            ImageKind::WebP => "image/webp",
        }
    }

    /// Canonical extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageKind::Jpeg => ".jpg",
            ImageKind::Png => ".png",
            ImageKind::WebP => ".webp",
        }
    }

    /// Resolve a declared MIME type against the allowlist.
    ///
    /// Parameters such as `; charset=binary` are ignored; the comparison is
    /// case-insensitive.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            "image/webp" => Some(ImageKind::WebP),
            _ => None,
        }
    }

    /// Best-effort guess from a file name, used only to fill in a declared
    /// type when the caller did not supply one.
    pub fn from_extension(name: &str) -> Option<Self> {
        let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(ImageKind::Jpeg),
            "png" => Some(ImageKind::Png),
            "webp" => Some(ImageKind::WebP),
            _ => None,
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Png => image::ImageFormat::Png,
            ImageKind::WebP => image::ImageFormat::WebP,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Identify the format from the leading bytes. Inputs shorter than a
/// signature never match it.
pub fn sniff(bytes: &[u8]) -> Option<ImageKind> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(ImageKind::Jpeg),
        [0x89, 0x50, 0x4E, 0x47, ..] => Some(ImageKind::Png),
        [0x52, 0x49, 0x46, 0x46, _, _, _, _, 0x57, 0x45, 0x42, 0x50, ..] => Some(ImageKind::WebP),
        _ => None,
    }
}

/// True when the bytes carry one of the supported signatures.
pub fn is_supported_image(bytes: &[u8]) -> bool {
    sniff(bytes).is_some()
}

/// True when the declared type is allowlisted and the bytes really are that format.
pub fn matches_declared(declared_mime: &str, bytes: &[u8]) -> bool {
    match (ImageKind::from_mime(declared_mime), sniff(bytes)) {
        (Some(declared), Some(actual)) => declared == actual,
        _ => false,
    }
}
