//! Represents an avatar file that survived ingest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata row for a persisted avatar.
///
/// A row only exists for files that passed post-write validation; the file
/// and the row are removed together if anything after the insert fails.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Owner, as resolved from the uploading session.
    pub user_id: String,

    /// Stored name, `{epoch-millis}_{basename}{ext}`.
    pub filename: String,

    /// Location on disk.
    pub path: String,

    /// URL the file is served under.
    pub public_url: String,

    /// MIME type the client declared.
    pub declared_mime: String,

    /// MIME type the leading bytes identify.
    pub actual_mime: String,

    pub size_bytes: i64,

    /// Hex MD5 of the stored bytes.
    pub checksum: String,

    pub width: i64,
    pub height: i64,

    pub created_at: DateTime<Utc>,
}
