//! Data models shared by the ingest server and the capture client.
//!
//! `FileRecord` maps to the SQLite table via `sqlx::FromRow`; the rest are
//! session state and JSON wire shapes serialized with `serde`.

pub mod file_record;
pub mod session;
pub mod upload;
