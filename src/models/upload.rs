//! Wire shapes for `POST /upload`.

use serde::{Deserialize, Serialize};

/// Multipart field that carries the image.
pub const AVATAR_FIELD: &str = "avatar";

/// Basic metadata about the stored file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileInfo {
    pub filename: String,
    pub size: u64,
    pub mimetype: String,
    pub width: u32,
    pub height: u32,
}

/// Success body: `{ ok, tempUrl, fileInfo }`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub ok: bool,
    pub temp_url: String,
    pub file_info: FileInfo,
}

/// Failure body: `{ code, message }`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
