//! Credential check and session issuance.
//!
//! The ingest path only relies on the session store; how tokens come into
//! existence is behind the `Authenticator` trait so a real identity provider
//! can replace the single configured account.

use crate::{
    models::session::{UploadSession, UserAccount},
    services::session_store::SessionStore,
};
use uuid::Uuid;

/// Avatar a fresh account starts with.
pub const DEFAULT_AVATAR: &str = "/uploads/default-avatar.png";

pub trait Authenticator: Send + Sync {
    /// Return the account when the credentials are valid.
    fn verify(&self, username: &str, password: &str) -> Option<UserAccount>;
}

/// One account whose credentials come from configuration.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    account: UserAccount,
    password: String,
}

impl StaticAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            account: UserAccount {
                id: "1".into(),
                username: username.into(),
                avatar: DEFAULT_AVATAR.into(),
            },
            password: password.into(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn verify(&self, username: &str, password: &str) -> Option<UserAccount> {
        let user_ok = self.account.username.as_bytes() == username.as_bytes();
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        (user_ok && pass_ok).then(|| self.account.clone())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Start a session for a verified account and return its token.
pub fn issue_session(store: &dyn SessionStore, account: &UserAccount) -> String {
    let token = Uuid::new_v4().to_string();
    store.insert(token.clone(), UploadSession::for_account(account));
    tracing::info!(user_id = %account.id, "session issued");
    token
}
