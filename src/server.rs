//! Axum router construction and S3 route mapping.
//!
//! The [`app`] function wires every S3 endpoint to its handler and returns
//! a ready-to-serve [`axum::Router`].
//!
//! S3 distinguishes operations by query parameters, not just path+method
//! (`GET /:bucket?list-type=2` is ListObjectsV2, plain `GET /:bucket` is
//! ListObjects v1), so there is a single handler per method+path that
//! dispatches internally.

use axum::{
    extract::{DefaultBodyLimit, Path, RawQuery, Request, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Extension, Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{self, AuthenticatedRequest};
use crate::errors::{generate_request_id, S3Error, SERVER_NAME};
use crate::iam::Action;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Liveness probe. `_` is not a legal bucket name, so the path never
/// shadows a bucket.
pub const HEALTH_PATH: &str = "/_labstore/health";

/// Prometheus scrape endpoint, outside the bucket namespace as well.
pub const METRICS_PATH: &str = "/_labstore/metrics";

/// Build the axum [`Router`] with all S3 routes.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        // Not part of the S3 API; both bypass authentication.
        .route(HEALTH_PATH, get(health_check))
        .route(METRICS_PATH, get(metrics_handler))
        .route("/", get(handle_get_service).fallback(not_implemented))
        .route(
            "/:bucket",
            get(handle_get_bucket)
                .put(handle_put_bucket)
                .delete(handle_delete_bucket)
                .head(handle_head_bucket)
                .fallback(not_implemented),
        )
        // The wildcard key captures slashes.
        .route(
            "/:bucket/*key",
            get(handle_get_object)
                .put(handle_put_object)
                .delete(handle_delete_object)
                .head(handle_head_object)
                .fallback(not_implemented),
        )
        .fallback(not_implemented)
        .with_state(state.clone())
        // Layers listed innermost first.
        .layer(middleware::from_fn_with_state(state, auth_middleware))
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(RequestDecompressionLayer::new().pass_through_unaccepted(true))
        .layer(TraceLayer::new_for_http())
        // Objects can be large.
        .layer(DefaultBodyLimit::disable())
}

// -- Common headers middleware -----------------------------------------------

/// Adds `x-amz-request-id`, `Date` and `Server` to every response.
async fn common_headers_middleware(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Error responses already carry the id that appears in their body.
    if !headers.contains_key("x-amz-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-amz-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static(SERVER_NAME));

    response
}

// -- Auth middleware ---------------------------------------------------------

/// Paths that bypass authentication.
const AUTH_SKIP_PATHS: &[&str] = &[HEALTH_PATH, METRICS_PATH];

/// Render an error; HEAD responses carry the status only.
fn error_response(method: &Method, err: S3Error) -> Response {
    if *method == Method::HEAD {
        err.status_code().into_response()
    } else {
        err.into_response()
    }
}

/// SigV4 authentication middleware.
///
/// Verifies the request signature and stores the resulting
/// [`AuthenticatedRequest`] in the request extensions for the handlers.
async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    if AUTH_SKIP_PATHS.contains(&req.uri().path()) {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    match auth::authenticate(&state.iam, req).await {
        Ok((mut req, authenticated)) => {
            req.extensions_mut().insert(authenticated);
            next.run(req).await
        }
        Err(e) => {
            warn!(method = %method, path = %path, error = %e, "authentication failed");
            error_response(&method, S3Error::from(e))
        }
    }
}

/// Policy gate for one operation on `resource`.
fn authorize(
    state: &AppState,
    auth: &AuthenticatedRequest,
    resource: &str,
    action: Action,
) -> Result<(), S3Error> {
    if state.iam.authorize(&auth.access_key, resource, action) {
        Ok(())
    } else {
        warn!(access_key = %auth.access_key, resource, action = %action, "access denied by policy");
        Err(S3Error::access_denied())
    }
}

/// Any method or path outside the supported operations.
async fn not_implemented(method: Method) -> Response {
    error_response(&method, S3Error::NotImplemented)
}

// -- Health check ------------------------------------------------------------

async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap. A repeated key keeps its last
/// value; valueless params (`?location`) map to an empty string.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    auth::canonical::parse_query(raw.as_deref().unwrap_or(""))
        .into_iter()
        .filter_map(|(key, mut values)| values.pop().map(|value| (key, value)))
        .collect()
}

// -- Service-level dispatch --------------------------------------------------

/// `GET /` -- ListBuckets
async fn handle_get_service(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, "", Action::ListAllMyBuckets)?;
    crate::handlers::bucket::list_buckets(state, &auth).await
}

// -- Bucket-level dispatch ---------------------------------------------------

/// `GET /:bucket` -- `?list-type=2` selects ListObjectsV2, otherwise v1.
async fn handle_get_bucket(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path(bucket): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, &bucket, Action::ListBucket)?;
    let query = parse_query(raw_query);

    if query.get("list-type").is_some_and(|v| v == "2") {
        crate::handlers::object::list_objects_v2(state, &bucket, &query).await
    } else {
        crate::handlers::object::list_objects_v1(state, &bucket, &query).await
    }
}

/// `PUT /:bucket` -- CreateBucket
async fn handle_put_bucket(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, &bucket, Action::CreateBucket)?;
    crate::handlers::bucket::create_bucket(state, &bucket).await
}

/// `DELETE /:bucket` -- DeleteBucket
async fn handle_delete_bucket(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path(bucket): Path<String>,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, &bucket, Action::DeleteBucket)?;
    crate::handlers::bucket::delete_bucket(state, &bucket).await
}

/// `HEAD /:bucket` -- HeadBucket
async fn handle_head_bucket(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path(bucket): Path<String>,
) -> Response {
    if let Err(e) = authorize(&state, &auth, &bucket, Action::ListBucket) {
        return error_response(&Method::HEAD, e);
    }
    crate::handlers::bucket::head_bucket(state, &bucket).await
}

// -- Object-level dispatch ---------------------------------------------------

/// `GET /:bucket/*key` -- GetObject
async fn handle_get_object(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, &bucket, Action::GetObject)?;
    crate::handlers::object::get_object(state, &bucket, &key).await
}

/// `PUT /:bucket/*key` -- PutObject
async fn handle_put_object(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, &bucket, Action::PutObject)?;
    crate::handlers::object::put_object(state, &auth, &bucket, &key, &headers, body).await
}

/// `DELETE /:bucket/*key` -- DeleteObject
async fn handle_delete_object(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, S3Error> {
    authorize(&state, &auth, &bucket, Action::DeleteObject)?;
    crate::handlers::object::delete_object(state, &bucket, &key).await
}

/// `HEAD /:bucket/*key` -- HeadObject
async fn handle_head_object(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthenticatedRequest>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    if let Err(e) = authorize(&state, &auth, &bucket, Action::GetObject) {
        return error_response(&Method::HEAD, e);
    }
    crate::handlers::object::head_object(state, &bucket, &key).await
}
