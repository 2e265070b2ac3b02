//! Shared fixtures for unit and router tests.
//!
//! Images are generated in memory so tests never depend on files in the repo.

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Deterministic high-entropy bitmap; compresses poorly, which is what the
/// budget tests need.
pub fn noisy_rgb(width: u32, height: u32) -> RgbImage {
    let mut state: u32 = 0x9E37_79B9;
    RgbImage::from_fn(width, height, |x, y| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [a, b, c, _] = state.to_le_bytes();
        // Mix in a gradient so the image is not pure noise.
        Rgb([
            a / 2 + (x * 255 / width.max(1)) as u8 / 2,
            b / 2 + (y * 255 / height.max(1)) as u8 / 2,
            c,
        ])
    })
}

/// A genuine JPEG file of the given size.
pub fn jpeg_bytes(width: u32, height: u32, quality: f32) -> Vec<u8> {
    crate::imaging::compress::encode(&noisy_rgb(width, height), quality)
        .expect("encode fixture")
        .bytes
        .to_vec()
}

/// A genuine PNG file of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(noisy_rgb(width, height))
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png fixture");
    out.into_inner()
}

/// A genuine (lossless) WebP file of the given size.
pub fn webp_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(noisy_rgb(width, height))
        .write_to(&mut out, ImageFormat::WebP)
        .expect("encode webp fixture");
    out.into_inner()
}

/// Ingest service over a private in-memory SQLite database and `dir`.
pub async fn ingest_service(
    dir: &std::path::Path,
    max_bytes: u64,
) -> crate::services::ingest_service::IngestService {
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    // One connection that never recycles, so the in-memory database lives
    // as long as the pool.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    crate::services::ingest_service::run_migrations(&pool)
        .await
        .expect("apply schema");
    crate::services::ingest_service::IngestService::new(Arc::new(pool), dir, "/uploads", max_bytes)
}

/// Encode a single-file `multipart/form-data` body.
///
/// Returns the `Content-Type` header value (with boundary) and the body.
pub fn multipart_body(
    field: &str,
    filename: &str,
    content_type: &str,
    bytes: &[u8],
) -> (String, Vec<u8>) {
    let boundary = "----avatar-studio-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    (format!("multipart/form-data; boundary={boundary}"), body)
}

/// A fully wired application over a temp directory and in-memory stores.
pub struct TestApp {
    pub dir: tempfile::TempDir,
    pub state: crate::state::AppState,
    pub sessions: std::sync::Arc<crate::services::session_store::InMemorySessionStore>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_limit(crate::config::DEFAULT_MAX_UPLOAD_BYTES).await
    }

    pub async fn with_limit(max_bytes: u64) -> Self {
        use crate::services::{auth_service::StaticAuthenticator, session_store::InMemorySessionStore};
        use std::sync::Arc;

        let dir = tempfile::TempDir::new().expect("temp dir");
        let ingest = ingest_service(dir.path(), max_bytes).await;
        let sessions = Arc::new(InMemorySessionStore::new());
        let state = crate::state::AppState {
            ingest,
            sessions: sessions.clone(),
            auth: Arc::new(StaticAuthenticator::new("admin", "password")),
        };
        Self {
            dir,
            state,
            sessions,
        }
    }

    pub fn router(&self) -> axum::Router {
        self.router_with_timeout(std::time::Duration::from_secs(30))
    }

    pub fn router_with_timeout(&self, request_timeout: std::time::Duration) -> axum::Router {
        crate::routes::routes::app(self.state.clone(), request_timeout)
    }

    /// Issue a session for the configured account and return its token.
    pub fn login(&self) -> String {
        let account = self
            .state
            .auth
            .verify("admin", "password")
            .expect("configured account");
        crate::services::auth_service::issue_session(self.sessions.as_ref(), &account)
    }

    /// Names in the storage directory, temp files included.
    pub fn stored_files(&self) -> Vec<String> {
        std::fs::read_dir(self.dir.path())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
