//! Token → session mapping shared by every request.
//!
//! Sessions are independent of one another, so a single map behind one lock
//! is enough: each operation touches one key inside one critical section.

use crate::models::session::UploadSession;
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// Storage for upload sessions, injected into the router state.
pub trait SessionStore: Send + Sync {
    fn get(&self, token: &str) -> Option<UploadSession>;

    fn insert(&self, token: String, session: UploadSession);

    fn remove(&self, token: &str) -> Option<UploadSession>;

    /// Replace the avatar of an existing session in one atomic step.
    ///
    /// Returns the updated session, or `None` if the token is no longer known
    /// (for example after a concurrent logout).
    fn update_avatar(&self, token: &str, avatar_path: &str) -> Option<UploadSession>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, UploadSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, token: &str) -> Option<UploadSession> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
    }

    fn insert(&self, token: String, session: UploadSession) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, session);
    }

    fn remove(&self, token: &str) -> Option<UploadSession> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
    }

    fn update_avatar(&self, token: &str, avatar_path: &str) -> Option<UploadSession> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let session = sessions.get_mut(token)?;
        session.avatar_path = avatar_path.to_string();
        Some(session.clone())
    }
}
