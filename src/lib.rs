//! Avatar capture and ingest.
//!
//! The [`client`] side loads a photo, lets the user pan and zoom it inside a
//! square stage, renders the visible square and compresses it under a byte
//! budget before uploading. The server side ([`routes`], [`handlers`],
//! [`services`]) authenticates the session, streams the file to disk,
//! validates it and points the session's avatar at the stored copy.

pub mod client;
pub mod config;
pub mod errors;
pub mod format;
pub mod handlers;
pub mod imaging;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(test)]
mod test_helpers;
