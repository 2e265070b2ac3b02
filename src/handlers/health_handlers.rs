//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks DB connectivity and disk I/O

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tokio::fs;
use uuid::Uuid;

/// `GET /healthz`
///
/// Liveness probe. Always 200, never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Writes, reads back and deletes a probe file in the avatar directory.
///
/// HTTP 200 when both pass, 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.ingest;

    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*service.db)
        .await
    {
        Ok(1) => (true, None::<String>),
        Ok(v) => (false, Some(format!("unexpected result: {}", v))),
        Err(e) => (false, Some(format!("error: {}", e))),
    };

    // Dot-prefixed so it can never collide with a stored avatar name.
    let tmp_path = service.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => {
            let read_back = fs::read(&tmp_path).await;
            let removed = fs::remove_file(&tmp_path).await;
            match (read_back, removed) {
                (Ok(bytes), Ok(_)) if bytes == b"readyz" => (true, None::<String>),
                (Ok(bytes), Err(e)) if bytes == b"readyz" => {
                    (true, Some(format!("could not remove tmp file: {}", e)))
                }
                (Ok(_), _) => (false, Some("file content mismatch".to_string())),
                (Err(e), _) => (false, Some(format!("could not read tmp file: {}", e))),
            }
        }
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    let overall_ok = sqlite_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "sqlite",
        CheckStatus {
            ok: sqlite_check.0,
            error: sqlite_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
