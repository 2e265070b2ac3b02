use crate::services::{
    auth_service::Authenticator, ingest_service::IngestService, session_store::SessionStore,
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub sessions: Arc<dyn SessionStore>,
    pub auth: Arc<dyn Authenticator>,
}
