//! s3lite — a minimal S3-compatible object storage server.
//!
//! This crate provides the core components for running the server:
//! request handling, SigV4 authentication, and the filesystem storage
//! engine. See `main.rs` for the process entry point.

use std::sync::Arc;

pub mod auth;
pub mod chunked;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod hash;
pub mod primitives;
pub mod server;
pub mod storage;
pub mod xml;

use crate::config::Config;
use crate::storage::Storage;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration, including the single configured credential pair.
    pub config: Config,
    /// The filesystem storage engine.
    pub storage: Storage,
}

impl AppState {
    pub fn new(config: Config) -> std::io::Result<Arc<Self>> {
        let storage = Storage::new(&config.data_dir)?;
        Ok(Arc::new(Self { config, storage }))
    }
}
