//! Bucket-level S3 API handlers.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::auth::AuthenticatedRequest;
use crate::errors::S3Error;
use crate::metrics::record_operation;
use crate::xml;
use crate::AppState;

// -- Bucket name validation ---------------------------------------------------

/// Validate that a bucket name conforms to S3 naming rules.
///
/// Rules:
/// - 3-63 characters long
/// - Only lowercase letters, numbers, hyphens, and periods
/// - Must begin and end with a letter or number
/// - Cannot be formatted as an IP address (e.g., 192.168.5.4)
/// - Must not start with `xn--` or end with `-s3alias` or `--ol-s3`
pub fn validate_bucket_name(name: &str) -> Result<(), S3Error> {
    let invalid = || S3Error::InvalidBucketName {
        name: name.to_string(),
    };

    if !(3..=63).contains(&name.len()) {
        return Err(invalid());
    }

    if !name
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '.')
    {
        return Err(invalid());
    }

    let alphanumeric = |ch: char| ch.is_ascii_lowercase() || ch.is_ascii_digit();
    if !name.starts_with(alphanumeric) || !name.ends_with(alphanumeric) {
        return Err(invalid());
    }

    if looks_like_ip(name)
        || name.starts_with("xn--")
        || name.ends_with("-s3alias")
        || name.ends_with("--ol-s3")
    {
        return Err(invalid());
    }

    Ok(())
}

/// Check whether a string looks like an IPv4 address (e.g., "192.168.5.4").
fn looks_like_ip(s: &str) -> bool {
    let parts: Vec<&str> = s.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u8>().is_ok())
}

// -- Handlers -----------------------------------------------------------------

/// `GET /` -- List all buckets.
///
/// The caller's access key is reported as the owner.
pub async fn list_buckets(
    state: Arc<AppState>,
    auth: &AuthenticatedRequest,
) -> Result<Response, S3Error> {
    let buckets = state.storage.list_buckets().await?;

    let dates: Vec<String> = buckets.iter().map(|b| xml::iso8601(b.created)).collect();
    let bucket_refs: Vec<(&str, &str)> = buckets
        .iter()
        .zip(&dates)
        .map(|(b, created)| (b.name.as_str(), created.as_str()))
        .collect();

    let body = xml::render_list_buckets_result(&auth.access_key, &bucket_refs);
    record_operation("ListBuckets", true);

    Ok((StatusCode::OK, [("content-type", "application/xml")], body).into_response())
}

/// `PUT /{bucket}` -- Create a new bucket.
///
/// Not idempotent: an existing bucket yields `BucketAlreadyExists`.
pub async fn create_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    validate_bucket_name(bucket)?;

    let result = state.storage.create_bucket(bucket).await;
    record_operation("CreateBucket", result.is_ok());
    result?;

    let mut response = StatusCode::OK.into_response();
    if let Ok(location) = HeaderValue::from_str(&format!("/{bucket}")) {
        response.headers_mut().insert("location", location);
    }
    Ok(response)
}

/// `DELETE /{bucket}` -- Delete an existing bucket (must be empty).
pub async fn delete_bucket(state: Arc<AppState>, bucket: &str) -> Result<Response, S3Error> {
    let result = state.storage.delete_bucket(bucket).await;
    record_operation("DeleteBucket", result.is_ok());
    result?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// `HEAD /{bucket}` -- Check whether a bucket exists.
///
/// HEAD responses have no body, so failures are reported by status alone.
pub async fn head_bucket(state: Arc<AppState>, bucket: &str) -> Response {
    match state.storage.bucket_exists(bucket).await {
        Ok(true) => {
            let mut response = StatusCode::OK.into_response();
            response.headers_mut().insert(
                "x-amz-bucket-region",
                HeaderValue::from_str(&state.config.server.region)
                    .unwrap_or_else(|_| HeaderValue::from_static("us-east-1")),
            );
            response
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => S3Error::from(e).status_code().into_response(),
    }
}
