//! `POST /upload`: the avatar ingest gate.
//!
//! Order matters: the session is resolved by the extractor before the body is
//! touched, the declared type and advertised length are checked before
//! anything is written, and the file part is streamed straight to disk.

use crate::{
    errors::AppError,
    handlers::auth_handlers::AuthSession,
    models::upload::{AVATAR_FIELD, FileInfo, UploadResponse},
    services::ingest_service::{IncomingFile, IngestError, IngestService},
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartError},
    http::{HeaderMap, StatusCode, header},
};

impl From<MultipartError> for IngestError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            IngestError::BodyLimit(err.body_text())
        } else {
            IngestError::MalformedBody(err.body_text())
        }
    }
}

/// Upload a new avatar for the calling session.
pub async fn upload_avatar(
    State(state): State<AppState>,
    auth: AuthSession,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    state.ingest.check_content_length(content_length)?;

    while let Some(field) = multipart.next_field().await.map_err(IngestError::from)? {
        if field.name() != Some(AVATAR_FIELD) {
            tracing::debug!(field = ?field.name(), "skipping multipart field");
            continue;
        }

        let declared = IngestService::check_declared_type(field.content_type()).map_err(|err| {
            tracing::warn!(user_id = %auth.session.user_id, "upload rejected: {}", err);
            err
        })?;
        let incoming = IncomingFile {
            original_name: field.file_name().unwrap_or(AVATAR_FIELD).to_string(),
            declared,
        };

        let outcome = state
            .ingest
            .ingest(
                state.sessions.clone(),
                &auth.token,
                &auth.session.user_id,
                incoming,
                field,
            )
            .await?;

        let record = outcome.record;
        return Ok(Json(UploadResponse {
            ok: true,
            temp_url: record.public_url,
            file_info: FileInfo {
                filename: record.filename,
                size: record.size_bytes as u64,
                mimetype: record.actual_mime,
                width: record.width as u32,
                height: record.height as u32,
            },
        }));
    }

    Err(IngestError::MissingFile.into())
}
