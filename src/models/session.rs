//! Server-held session state and the user view derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a session token unlocks.
///
/// Possession of the token is the only authorization needed to replace
/// `avatar_path`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub user_id: String,
    pub username: String,
    pub avatar_path: String,
    pub created_at: DateTime<Utc>,
}

/// An account the authenticator vouches for.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserAccount {
    pub id: String,
    pub username: String,
    pub avatar: String,
}

impl UploadSession {
    pub fn for_account(account: &UserAccount) -> Self {
        Self {
            user_id: account.id.clone(),
            username: account.username.clone(),
            avatar_path: account.avatar.clone(),
            created_at: Utc::now(),
        }
    }

    /// Public profile view, as returned by `/auth/me`.
    pub fn profile(&self) -> UserAccount {
        UserAccount {
            id: self.user_id.clone(),
            username: self.username.clone(),
            avatar: self.avatar_path.clone(),
        }
    }
}

/// Header carrying the session token.
pub const SESSION_HEADER: &str = "x-session-token";

/// Body of `POST /auth/login`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub ok: bool,
    pub user: UserAccount,
    pub session_token: String,
}

/// Body of `GET /auth/me`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProfileResponse {
    pub ok: bool,
    pub user: UserAccount,
}
