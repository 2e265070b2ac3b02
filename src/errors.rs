use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crate::services::ingest_service::IngestError;
use serde_json::json;
use std::fmt;

/// Machine-readable error codes returned in the `code` field.
pub mod codes {
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const FILE_TOO_LARGE: &str = "FILE_TOO_LARGE";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const INVALID_SESSION: &str = "INVALID_SESSION";
    pub const INVALID_CREDENTIALS: &str = "INVALID_CREDENTIALS";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
}

/// An HTTP-facing error: status, stable code and a human message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// 400 `VALIDATION_ERROR`
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION_ERROR, msg)
    }

    /// 413 `FILE_TOO_LARGE`
    pub fn file_too_large(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, codes::FILE_TOO_LARGE, msg)
    }

    /// 401 `UNAUTHORIZED`, no token presented.
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, msg)
    }

    /// 401 `INVALID_SESSION`, token presented but unknown.
    pub fn invalid_session(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::INVALID_SESSION, msg)
    }

    /// 500 `SERVER_ERROR`
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::SERVER_ERROR, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, "{}", self.message);
        }
        let body = Json(json!({
            "code": self.code,
            "message": self.message,
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnsupportedType(_)
            | IngestError::SignatureMismatch { .. }
            | IngestError::Undecodable(_)
            | IngestError::MissingFile
            | IngestError::MalformedBody(_) => AppError::validation(err.to_string()),
            IngestError::TooLarge { .. } | IngestError::BodyLimit(_) => {
                AppError::file_too_large(err.to_string())
            }
            IngestError::SessionGone => AppError::invalid_session(err.to_string()),
            IngestError::NameExhausted(_) | IngestError::Sqlx(_) | IngestError::Io(_) => {
                // Details go to the log, not to the client.
                tracing::error!("ingest failed: {}", err);
                AppError::internal("internal server error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn renders_code_and_message() {
        let response = AppError::validation("bad bytes").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "VALIDATION_ERROR");
        assert_eq!(json["message"], "bad bytes");
    }

    #[test]
    fn taxonomy_statuses() {
        assert_eq!(AppError::file_too_large("x").status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(AppError::unauthorized("x").status, StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::invalid_session("x").status, StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::from(anyhow::anyhow!("disk on fire")).code,
            codes::SERVER_ERROR
        );
    }

    #[test]
    fn ingest_errors_map_onto_taxonomy() {
        let mismatch = AppError::from(IngestError::SignatureMismatch {
            declared: "image/jpeg".into(),
        });
        assert_eq!(mismatch.status, StatusCode::BAD_REQUEST);
        assert_eq!(mismatch.code, codes::VALIDATION_ERROR);

        let big = AppError::from(IngestError::TooLarge { limit: 10 });
        assert_eq!(big.code, codes::FILE_TOO_LARGE);

        let io = AppError::from(IngestError::Io(std::io::Error::other("secret path")));
        assert_eq!(io.code, codes::SERVER_ERROR);
        assert!(!io.message.contains("secret"));
    }
}
