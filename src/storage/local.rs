//! Local filesystem storage backend.
//!
//! Buckets are the immediate subdirectories of the root and object keys are
//! relative file paths inside them.  Writes go to a temp file under
//! `.labstore-tmp/`, are fsynced, then renamed into place, so readers never
//! observe a partially written object and concurrent writers to one key
//! resolve as last-writer-wins.

use bytes::Bytes;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::backend::{BucketInfo, ObjectMeta, StorageBackend, StorageFuture, StoredObject};
use super::listing::{list_directory, ListPage, ListQuery};
use super::{check_bucket_segment, validate_key, StorageError};

/// Directory under the root holding in-flight writes.
pub const TEMP_DIR: &str = ".labstore-tmp";

/// Quoted hex MD5 of `data`.
pub fn etag_of(data: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Md5::digest(data)))
}

/// Size, modification time and ETag of the file at `path`.
pub(crate) async fn object_meta(path: &Path) -> std::io::Result<ObjectMeta> {
    let metadata = tokio::fs::metadata(path).await?;
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(ObjectMeta {
        size: metadata.len(),
        last_modified: metadata.modified()?,
        etag: format!("\"{}\"", hex::encode(hasher.finalize())),
    })
}

/// Map a failed `remove_dir` of a bucket directory.
fn remove_bucket_error(bucket: String, e: std::io::Error) -> StorageError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::DirectoryNotEmpty => StorageError::BucketNotEmpty(bucket),
        ErrorKind::NotFound | ErrorKind::NotADirectory => StorageError::NoSuchBucket(bucket),
        _ => StorageError::Io(e),
    }
}

/// Stores buckets and objects on the local filesystem.
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new `LocalBackend` rooted at `root`.
    ///
    /// The root and its temp directory are created if missing.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(TEMP_DIR))?;
        tracing::info!(root = %root.display(), "local storage ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> Result<PathBuf, StorageError> {
        check_bucket_segment(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let bucket_path = self.bucket_path(bucket)?;
        validate_key(key)?;
        Ok(bucket_path.join(key))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(TEMP_DIR)
            .join(format!("tmp-{}", uuid::Uuid::new_v4()))
    }

    async fn is_dir(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    /// Path of an existing regular file, or `NoSuchKey`.
    async fn existing_object(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        let path = self.object_path(bucket, key)?;
        // Directories and paths through a file (`a.txt/b`) are not objects.
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(StorageError::NoSuchKey(key.to_string())),
        }
    }
}

impl StorageBackend for LocalBackend {
    fn list_buckets(&self) -> StorageFuture<'_, Vec<BucketInfo>> {
        Box::pin(async move {
            let mut buckets = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.root).await?;
            while let Some(entry) = entries.next_entry().await? {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                let metadata = entry.metadata().await?;
                if !metadata.is_dir() {
                    continue;
                }
                let created = metadata.created().or_else(|_| metadata.modified())?;
                buckets.push(BucketInfo { name, created });
            }
            buckets.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(buckets)
        })
    }

    fn create_bucket(&self, bucket: &str) -> StorageFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let path = self.bucket_path(&bucket)?;
            // The root exists, so a single `mkdir` both checks and creates.
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    tracing::info!(bucket = %bucket, "bucket created");
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    Err(StorageError::BucketAlreadyExists(bucket))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_bucket(&self, bucket: &str) -> StorageFuture<'_, ()> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let path = self.bucket_path(&bucket)?;
            // Non-recursive: the filesystem refuses to remove a non-empty bucket.
            match tokio::fs::remove_dir(&path).await {
                Ok(()) => {
                    tracing::info!(bucket = %bucket, "bucket deleted");
                    Ok(())
                }
                Err(e) => {
                    tracing::debug!(bucket = %bucket, error = %e, "bucket removal refused");
                    Err(remove_bucket_error(bucket, e))
                }
            }
        })
    }

    fn bucket_exists(&self, bucket: &str) -> StorageFuture<'_, bool> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            match self.bucket_path(&bucket) {
                Ok(path) => Ok(Self::is_dir(&path).await),
                Err(_) => Ok(false),
            }
        })
    }

    fn put_object(&self, bucket: &str, key: &str, data: Bytes) -> StorageFuture<'_, String> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let final_path = self.object_path(&bucket, &key)?;
            if !Self::is_dir(&self.bucket_path(&bucket)?).await {
                return Err(StorageError::NoSuchBucket(bucket));
            }
            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let etag = etag_of(&data);

            let tmp_path = self.temp_path();
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            let written = async {
                file.write_all(&data).await?;
                file.sync_all().await?;
                drop(file);
                tokio::fs::rename(&tmp_path, &final_path).await
            }
            .await;
            if let Err(e) = written {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }

            tracing::debug!(bucket = %bucket, key = %key, size = data.len(), "object written");
            Ok(etag)
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, StoredObject> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let path = self.existing_object(&bucket, &key).await?;
            let data = Bytes::from(tokio::fs::read(&path).await?);
            let metadata = tokio::fs::metadata(&path).await?;
            let meta = ObjectMeta {
                size: data.len() as u64,
                last_modified: metadata.modified()?,
                etag: etag_of(&data),
            };
            Ok(StoredObject { data, meta })
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ObjectMeta> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let path = self.existing_object(&bucket, &key).await?;
            Ok(object_meta(&path).await?)
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> StorageFuture<'_, ()> {
        let bucket = bucket.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let path = self.object_path(&bucket, &key)?;
            if tokio::fs::remove_file(&path).await.is_err() {
                return Err(StorageError::NoSuchKey(key));
            }
            tracing::debug!(bucket = %bucket, key = %key, "object deleted");
            Ok(())
        })
    }

    fn list_objects(&self, bucket: &str, query: ListQuery) -> StorageFuture<'_, ListPage> {
        let bucket = bucket.to_string();
        Box::pin(async move {
            let path = self.bucket_path(&bucket)?;
            if !Self::is_dir(&path).await {
                return Err(StorageError::NoSuchBucket(bucket));
            }
            list_directory(&path, &query).await
        })
    }
}
