//! Defines the HTTP surface of the avatar service.
//!
//! ## Structure
//! - **Probes**
//!   - `GET  /healthz` : liveness
//!   - `GET  /readyz`  : SQLite + storage directory checks
//!
//! - **Session capability**
//!   - `POST /auth/login`  : exchange credentials for a session token
//!   - `POST /auth/logout` : drop the session named by `x-session-token`
//!   - `GET  /auth/me`     : profile of the current session
//!
//! - **Ingest**
//!   - `POST /upload` : multipart field `avatar`, header `x-session-token`
//!
//! Stored avatars are served as static files under the configured public prefix.

use crate::{
    handlers::{
        auth_handlers::{login, logout, me},
        health_handlers::{healthz, readyz},
        upload_handlers::upload_avatar,
    },
    services::ingest_service::MULTIPART_OVERHEAD,
    state::AppState,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer};

/// Build the router for all API routes, carrying `AppState` to the handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/upload", post(upload_avatar))
}

/// Scratch files in the storage directory are dot-prefixed. No path segment
/// starting with a dot, literal or percent-encoded, reaches a handler.
async fn hide_dotfiles(request: Request, next: Next) -> Response {
    let hidden = request.uri().path().split('/').any(|segment| {
        segment.starts_with('.')
            || segment
                .get(..3)
                .is_some_and(|head| head.eq_ignore_ascii_case("%2e"))
    });
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// The complete application: routes, static avatar serving and middleware.
///
/// The body limit sits a little above the file ceiling so multipart framing
/// fits; the ingest service enforces the exact ceiling on the file bytes.
pub fn app(state: AppState, request_timeout: Duration) -> Router {
    let body_limit = (state.ingest.max_bytes + MULTIPART_OVERHEAD) as usize;
    let static_dir = ServeDir::new(&state.ingest.base_path);
    let prefix = state.ingest.public_prefix.clone();

    routes()
        .nest_service(&prefix, static_dir)
        .layer(middleware::from_fn(hide_dotfiles))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
