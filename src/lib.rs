//! LabStore library: a small S3-compatible object store.
//!
//! Requests are authenticated with AWS Signature V4 (including the
//! streaming `aws-chunked` variant), checked against a per-access-key
//! policy, and served from buckets that are plain directories on the local
//! filesystem.

use std::sync::Arc;

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod iam;
pub mod metrics;
pub mod redact;
pub mod server;
pub mod storage;
pub mod xml;

#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::iam::Iam;
use crate::storage::backend::StorageBackend;

/// Shared application state passed to all handlers via `axum::extract::State`.
///
/// Read-only once the server is running.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Credentials and policies.
    pub iam: Iam,
    /// Bucket and object storage.
    pub storage: Arc<dyn StorageBackend>,
}
