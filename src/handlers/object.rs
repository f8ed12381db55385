//! Object-level S3 API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::auth::chunked::decode_streaming_body;
use crate::auth::AuthenticatedRequest;
use crate::errors::S3Error;
use crate::metrics::{record_bytes_received, record_bytes_sent, record_operation};
use crate::storage::backend::ObjectMeta;
use crate::storage::listing::{ListQuery, DELIMITER, MAX_KEYS};
use crate::xml::{self, ListObjectsView, ListVersion};
use crate::AppState;

// -- Helpers ------------------------------------------------------------------

/// Headers shared by GET and HEAD object responses.
fn object_headers(key: &str, meta: &ObjectMeta) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let content_type = mime_guess::from_path(key).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(content_type.essence_str()) {
        headers.insert("content-type", value);
    }
    headers.insert("content-length", HeaderValue::from(meta.size));
    if let Ok(value) = HeaderValue::from_str(&httpdate::fmt_http_date(meta.last_modified)) {
        headers.insert("last-modified", value);
    }
    if let Ok(value) = HeaderValue::from_str(&meta.etag) {
        headers.insert("etag", value);
    }
    headers
}

/// Length the client declared for a streaming body, if any.
fn decoded_content_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get("x-amz-decoded-content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

// -- Object handlers ----------------------------------------------------------

/// `PUT /{bucket}/{key}` -- Store an object.
///
/// Streaming (`aws-chunked`) bodies are verified chunk by chunk and fully
/// decoded before anything is written.
pub async fn put_object(
    state: Arc<AppState>,
    auth: &AuthenticatedRequest,
    bucket: &str,
    key: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let data = if auth.is_streaming {
        let decoded = decode_streaming_body(body, auth)?;
        if let Some(declared) = decoded_content_length(headers) {
            if declared != decoded.len() {
                tracing::debug!(
                    declared,
                    decoded = decoded.len(),
                    "decoded length differs from x-amz-decoded-content-length"
                );
                return Err(S3Error::IncompleteBody);
            }
        }
        decoded
    } else {
        body
    };

    let size = data.len() as u64;
    let result = state.storage.put_object(bucket, key, data).await;
    record_operation("PutObject", result.is_ok());
    let etag = result?;
    record_bytes_received(size);

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert("etag", value);
    }
    Ok(response)
}

/// `GET /{bucket}/{key}` -- Return an object's content.
pub async fn get_object(state: Arc<AppState>, bucket: &str, key: &str) -> Result<Response, S3Error> {
    let result = state.storage.get_object(bucket, key).await;
    record_operation("GetObject", result.is_ok());
    let object = result?;
    record_bytes_sent(object.meta.size);

    let headers = object_headers(key, &object.meta);
    Ok((StatusCode::OK, headers, Body::from(object.data)).into_response())
}

/// `HEAD /{bucket}/{key}` -- Object metadata without a body.
pub async fn head_object(state: Arc<AppState>, bucket: &str, key: &str) -> Response {
    match state.storage.head_object(bucket, key).await {
        Ok(meta) => (StatusCode::OK, object_headers(key, &meta)).into_response(),
        Err(e) => S3Error::from(e).status_code().into_response(),
    }
}

/// `DELETE /{bucket}/{key}` -- Delete an object.
pub async fn delete_object(state: Arc<AppState>, bucket: &str, key: &str) -> Result<Response, S3Error> {
    let result = state.storage.delete_object(bucket, key).await;
    record_operation("DeleteObject", result.is_ok());
    result?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// -- Listing ------------------------------------------------------------------

/// Query parameters common to both listing versions.
fn list_query(query: &HashMap<String, String>) -> ListQuery {
    let delimiter = query
        .get("delimiter")
        .filter(|d| !d.is_empty())
        .cloned()
        .unwrap_or_else(|| DELIMITER.to_string());
    let max_keys = query
        .get("max-keys")
        .or_else(|| query.get("maxKeys"))
        .and_then(|v| v.parse::<usize>().ok())
        .map_or(MAX_KEYS, |n| n.min(MAX_KEYS));

    ListQuery {
        prefix: query.get("prefix").cloned().unwrap_or_default(),
        delimiter,
        max_keys,
        start_after: None,
    }
}

fn decode_continuation_token(token: &str) -> Result<String, S3Error> {
    BASE64
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| S3Error::InvalidArgument {
            message: "The continuation token provided is incorrect".to_string(),
        })
}

fn xml_response(body: String) -> Response {
    (StatusCode::OK, [("content-type", "application/xml")], body).into_response()
}

/// `GET /{bucket}?list-type=2` -- ListObjectsV2.
pub async fn list_objects_v2(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let continuation_token = query.get("continuation-token").map(String::as_str);
    let start_after = query.get("start-after").map(String::as_str);

    let mut list = list_query(query);
    list.start_after = match continuation_token {
        Some(token) => Some(decode_continuation_token(token)?),
        None => start_after.filter(|s| !s.is_empty()).map(str::to_string),
    };
    let prefix = list.prefix.clone();
    let delimiter = list.delimiter.clone();
    let max_keys = list.max_keys;

    let result = state.storage.list_objects(bucket, list).await;
    record_operation("ListObjectsV2", result.is_ok());
    let page = result?;

    let next_token = page.next_key.as_deref().map(|key| BASE64.encode(key));
    let body = xml::render_list_objects_result(&ListObjectsView {
        bucket,
        prefix: &prefix,
        delimiter: &delimiter,
        max_keys,
        page: &page,
        version: ListVersion::V2 {
            continuation_token,
            next_continuation_token: next_token.as_deref(),
            start_after,
        },
    });
    Ok(xml_response(body))
}

/// `GET /{bucket}` -- ListObjects (v1).
pub async fn list_objects_v1(
    state: Arc<AppState>,
    bucket: &str,
    query: &HashMap<String, String>,
) -> Result<Response, S3Error> {
    let marker = query.get("marker").map(String::as_str).unwrap_or("");

    let mut list = list_query(query);
    list.start_after = (!marker.is_empty()).then(|| marker.to_string());
    let prefix = list.prefix.clone();
    let delimiter = list.delimiter.clone();
    let max_keys = list.max_keys;

    let result = state.storage.list_objects(bucket, list).await;
    record_operation("ListObjects", result.is_ok());
    let page = result?;

    let body = xml::render_list_objects_result(&ListObjectsView {
        bucket,
        prefix: &prefix,
        delimiter: &delimiter,
        max_keys,
        page: &page,
        version: ListVersion::V1 {
            marker,
            next_marker: page.next_key.as_deref(),
        },
    });
    Ok(xml_response(body))
}
