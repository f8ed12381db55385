//! Prometheus metrics for LabStore.
//!
//! A global recorder from `metrics-exporter-prometheus` backs the
//! `metrics` macros; [`metrics_middleware`] records HTTP RED metrics and
//! [`metrics_handler`] serves the exposition text at `/_labstore/metrics`.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use crate::server::{HEALTH_PATH, METRICS_PATH};

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "labstore_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "labstore_http_request_duration_seconds";

/// Total S3 operations (counter). Labels: operation, outcome.
pub const S3_OPERATIONS_TOTAL: &str = "labstore_s3_operations_total";

/// Object bytes written by PutObject (counter).
pub const BYTES_RECEIVED_TOTAL: &str = "labstore_bytes_received_total";

/// Object bytes returned by GetObject (counter).
pub const BYTES_SENT_TOTAL: &str = "labstore_bytes_sent_total";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder.  Idempotent, so tests may call
/// it repeatedly.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("no other metrics recorder is installed");
        describe_metrics();
        handle
    })
}

fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(S3_OPERATIONS_TOTAL, "Total S3 operations by type and outcome");
    describe_counter!(BYTES_RECEIVED_TOTAL, "Object bytes written");
    describe_counter!(BYTES_SENT_TOTAL, "Object bytes read");
}

/// Count one S3 operation.
pub fn record_operation(operation: &'static str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(S3_OPERATIONS_TOTAL, "operation" => operation, "outcome" => outcome).increment(1);
}

pub fn record_bytes_received(bytes: u64) {
    counter!(BYTES_RECEIVED_TOTAL).increment(bytes);
}

pub fn record_bytes_sent(bytes: u64) {
    counter!(BYTES_SENT_TOTAL).increment(bytes);
}

/// Axum middleware that records HTTP RED metrics for every request.
///
/// The scrape endpoint itself is not instrumented.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == METRICS_PATH {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path, "status" => status)
        .increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

/// Collapse a request path to its route shape so labels stay low-cardinality.
fn normalize_path(path: &str) -> &'static str {
    match path {
        "/" => "/",
        HEALTH_PATH => HEALTH_PATH,
        METRICS_PATH => METRICS_PATH,
        _ => match path.trim_start_matches('/').split_once('/') {
            None => "/{bucket}",
            Some((_, "")) => "/{bucket}",
            Some(_) => "/{bucket}/{key}",
        },
    }
}

/// `GET /_labstore/metrics`: Prometheus exposition text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(HEALTH_PATH), HEALTH_PATH);
        assert_eq!(normalize_path("/health"), "/{bucket}");
        assert_eq!(normalize_path("/photos"), "/{bucket}");
        assert_eq!(normalize_path("/photos/"), "/{bucket}");
        assert_eq!(normalize_path("/photos/img/a.png"), "/{bucket}/{key}");
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_operations() {
        init_metrics();
        record_operation("PutObject", true);
        let resp = metrics_handler().await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(S3_OPERATIONS_TOTAL));
    }
}
