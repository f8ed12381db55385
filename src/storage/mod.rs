//! Bucket and object storage.
//!
//! [`backend::StorageBackend`] is the async contract the handlers depend
//! on; [`local::LocalBackend`] implements it on the local filesystem, and
//! [`listing`] holds the prefix/delimiter enumeration it uses for
//! `ListObjects`.

pub mod backend;
pub mod listing;
pub mod local;

use std::path::{Component, Path};

use thiserror::Error;

/// Longest object key accepted, in bytes.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Expected storage failures plus a catch-all for I/O.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket {0} does not exist")]
    NoSuchBucket(String),

    #[error("key {0} does not exist")]
    NoSuchKey(String),

    #[error("bucket {0} already exists")]
    BucketAlreadyExists(String),

    #[error("bucket {0} is not empty")]
    BucketNotEmpty(String),

    #[error("invalid bucket name {0}")]
    InvalidBucketName(String),

    #[error("invalid object key {0}")]
    InvalidKey(String),

    #[error("object key exceeds {MAX_KEY_LENGTH} bytes")]
    KeyTooLong,

    #[error("unsupported delimiter {0:?}")]
    UnsupportedDelimiter(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Check that `bucket` names exactly one visible directory under the root.
pub fn check_bucket_segment(bucket: &str) -> Result<(), StorageError> {
    let mut components = Path::new(bucket).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !bucket.starts_with('.') && !bucket.contains('/') => {
            Ok(())
        }
        _ => Err(StorageError::InvalidBucketName(bucket.to_string())),
    }
}

/// Check that `key` is a relative path that stays inside its bucket.
///
/// Every `/`-separated segment must be a plain name: empty, `.` and `..`
/// segments are rejected before the filesystem is touched.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(StorageError::KeyTooLong);
    }
    let plain_segments = key
        .split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    let plain_components = Path::new(key)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if key.is_empty() || !plain_segments || !plain_components {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Check that a listing prefix cannot climb out of the bucket.
pub fn validate_prefix(prefix: &str) -> Result<(), StorageError> {
    let escapes = prefix
        .split('/')
        .any(|segment| segment == "." || segment == "..")
        || prefix.starts_with('/');
    if escapes {
        return Err(StorageError::InvalidKey(prefix.to_string()));
    }
    Ok(())
}
