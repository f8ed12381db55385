//! Abstract storage backend trait.
//!
//! Handlers only see [`StorageBackend`]; they never build filesystem paths
//! themselves.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use super::listing::{ListPage, ListQuery};
use super::StorageError;

/// Boxed future returned by every backend method.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// A bucket as reported by `ListBuckets`.
#[derive(Debug, Clone)]
pub struct BucketInfo {
    pub name: String,
    pub created: SystemTime,
}

/// Metadata of a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: SystemTime,
    /// Quoted hex MD5 of the content.
    pub etag: String,
}

/// A stored object's data plus its metadata.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub meta: ObjectMeta,
}

/// Async bucket/object storage contract.
pub trait StorageBackend: Send + Sync + 'static {
    /// All buckets, sorted by name.
    fn list_buckets(&self) -> StorageFuture<'_, Vec<BucketInfo>>;

    /// Create `bucket`; an existing bucket is an error.
    fn create_bucket(&self, bucket: &str) -> StorageFuture<'_, ()>;

    /// Remove an empty `bucket`.
    fn delete_bucket(&self, bucket: &str) -> StorageFuture<'_, ()>;

    /// Whether `bucket` exists.
    fn bucket_exists(&self, bucket: &str) -> StorageFuture<'_, bool>;

    /// Write `data` at `key`, replacing any existing object, returning the ETag.
    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StorageFuture<'_, String>;

    /// Read the full object at `key`.
    fn get_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, StoredObject>;

    /// Metadata of the object at `key`, without its body.
    fn head_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ObjectMeta>;

    /// Delete the object at `key`.
    fn delete_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ()>;

    /// One page of a prefix/delimiter listing.
    fn list_objects(&self, bucket: &str, query: ListQuery) -> StorageFuture<'_, ListPage>;
}
