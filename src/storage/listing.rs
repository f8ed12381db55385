//! Prefix/delimiter enumeration of a bucket directory.
//!
//! Only the directory named by the prefix is read, never the whole tree:
//! a prefix ending in `/` lists that directory, otherwise the prefix's last
//! segment is matched against the names in its parent directory.
//! Subdirectories become common prefixes and files become objects.
//!
//! Candidates are ordered by key, anything at or before the marker is
//! skipped, and the first `max_keys` entries are emitted.  Objects and
//! common prefixes share that budget in key order, and the page is
//! truncated exactly when an eligible entry was left out.

use std::path::{Path, PathBuf};

use super::backend::ObjectMeta;
use super::local::object_meta;
use super::{validate_prefix, StorageError};

/// The only delimiter the filesystem layout can answer.
pub const DELIMITER: &str = "/";

/// Default and upper bound for `max-keys`.
pub const MAX_KEYS: usize = 1000;

/// Input of one listing call.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub prefix: String,
    pub delimiter: String,
    pub max_keys: usize,
    /// Exclusive lower bound on returned keys (`marker`, `start-after`,
    /// or a decoded continuation token).
    pub start_after: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            delimiter: DELIMITER.to_string(),
            max_keys: MAX_KEYS,
            start_after: None,
        }
    }
}

/// An object in a listing page.
#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub meta: ObjectMeta,
}

/// One page of results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub contents: Vec<ObjectSummary>,
    pub common_prefixes: Vec<String>,
    pub is_truncated: bool,
    /// Key of the last emitted entry when truncated.
    pub next_key: Option<String>,
}

impl ListPage {
    /// Contents plus common prefixes.
    pub fn key_count(&self) -> usize {
        self.contents.len() + self.common_prefixes.len()
    }
}

enum Candidate {
    Prefix(String),
    File { key: String, path: PathBuf },
}

impl Candidate {
    fn key(&self) -> &str {
        match self {
            Candidate::Prefix(key) | Candidate::File { key, .. } => key,
        }
    }
}

/// Split `img/a` into the directory part `img/` and the name prefix `a`.
fn split_prefix(prefix: &str) -> (&str, &str) {
    match prefix.rfind('/') {
        Some(idx) => prefix.split_at(idx + 1),
        None => ("", prefix),
    }
}

/// Immediate entries of `dir` whose names start with `name_prefix`.
async fn scan(dir: &Path, dir_key: &str, name_prefix: &str) -> Result<Vec<Candidate>, StorageError> {
    match tokio::fs::metadata(dir).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => return Ok(Vec::new()),
        // A prefix running through an object names nothing.
        Err(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
            ) =>
        {
            return Ok(Vec::new())
        }
        Err(e) => return Err(e.into()),
    }

    let mut candidates = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if !name.starts_with(name_prefix) {
            continue;
        }
        let file_type = entry.file_type().await?;
        let key = format!("{dir_key}{name}");
        if file_type.is_dir() {
            candidates.push(Candidate::Prefix(format!("{key}{DELIMITER}")));
        } else if file_type.is_file() {
            candidates.push(Candidate::File {
                key,
                path: entry.path(),
            });
        }
    }
    Ok(candidates)
}

/// List one page of `bucket_dir`.
pub async fn list_directory(bucket_dir: &Path, query: &ListQuery) -> Result<ListPage, StorageError> {
    if query.delimiter != DELIMITER {
        return Err(StorageError::UnsupportedDelimiter(query.delimiter.clone()));
    }
    validate_prefix(&query.prefix)?;

    let (dir_key, name_prefix) = split_prefix(&query.prefix);
    let mut candidates = scan(&bucket_dir.join(dir_key), dir_key, name_prefix).await?;
    candidates.sort_by(|a, b| a.key().cmp(b.key()));
    if let Some(marker) = query.start_after.as_deref() {
        candidates.retain(|c| c.key() > marker);
    }

    // A zero-sized page has no next marker, so it never reports truncation.
    let is_truncated = query.max_keys > 0 && candidates.len() > query.max_keys;
    candidates.truncate(query.max_keys);

    let mut page = ListPage {
        is_truncated,
        next_key: is_truncated
            .then(|| candidates.last().map(|c| c.key().to_string()))
            .flatten(),
        ..ListPage::default()
    };

    for candidate in candidates {
        match candidate {
            Candidate::Prefix(prefix) => page.common_prefixes.push(prefix),
            Candidate::File { key, path } => match object_meta(&path).await {
                Ok(meta) => page.contents.push(ObjectSummary { key, meta }),
                // Deleted since the scan.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
    }

    tracing::debug!(
        prefix = %query.prefix,
        objects = page.contents.len(),
        prefixes = page.common_prefixes.len(),
        truncated = page.is_truncated,
        "listed bucket directory"
    );
    Ok(page)
}
