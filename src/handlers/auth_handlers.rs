//! Session capability: the token extractor and the thin login/logout/me routes.

use crate::{
    errors::{AppError, codes},
    models::session::{LoginRequest, LoginResponse, ProfileResponse, SESSION_HEADER, UploadSession},
    services::auth_service::issue_session,
    state::AppState,
};
use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{HeaderMap, StatusCode, request::Parts},
};
use serde::Serialize;

/// A request that presented a live session token.
///
/// Extraction fails with `UNAUTHORIZED` when the header is missing and
/// `INVALID_SESSION` when the token is unknown. It runs before any body
/// extractor, so a rejected request never has its body read.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub session: UploadSession,
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers)
            .ok_or_else(|| AppError::unauthorized("missing session token"))?;

        let session = state.sessions.get(token).ok_or_else(|| {
            tracing::debug!("rejected unknown session token");
            AppError::invalid_session("session is invalid or has expired")
        })?;

        Ok(AuthSession {
            token: token.to_string(),
            session,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::validation("username and password are required"));
    }

    let account = state
        .auth
        .verify(&req.username, &req.password)
        .ok_or_else(|| {
            tracing::warn!(username = %req.username, "login rejected");
            AppError::new(
                StatusCode::UNAUTHORIZED,
                codes::INVALID_CREDENTIALS,
                "invalid username or password",
            )
        })?;

    let token = issue_session(state.sessions.as_ref(), &account);
    Ok(Json(LoginResponse {
        ok: true,
        user: account,
        session_token: token,
    }))
}

/// `POST /auth/logout`. Idempotent; an unknown token is not an error.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Json<OkResponse> {
    if let Some(token) = session_token(&headers) {
        if state.sessions.remove(token).is_some() {
            tracing::info!("session closed");
        }
    }
    Json(OkResponse { ok: true })
}

/// `GET /auth/me`
pub async fn me(auth: AuthSession) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        ok: true,
        user: auth.session.profile(),
    })
}
