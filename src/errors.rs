//! S3-compatible error types.
//!
//! Every variant maps to a well-known S3 error code.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(S3Error::NoSuchBucket { .. })`.  Lower layers
//! ([`crate::auth::AuthError`], [`crate::auth::chunked::ChunkError`],
//! [`crate::storage::StorageError`]) convert into it via `From`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::chunked::ChunkError;
use crate::auth::AuthError;
use crate::storage::StorageError;
use crate::xml::render_error;

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str = "LabStore";

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Generate an opaque host ID for error bodies.
fn generate_host_id() -> String {
    let bytes: [u8; 24] = rand::random();
    hex::encode(bytes)
}

/// S3 error codes expressed as a Rust enum.
#[derive(Debug, Error)]
pub enum S3Error {
    /// The specified bucket does not exist.
    #[error("The specified bucket does not exist")]
    NoSuchBucket { bucket: String },

    /// The specified key does not exist.
    #[error("The specified key does not exist.")]
    NoSuchKey { key: String },

    /// A bucket with the requested name already exists.
    #[error("The requested bucket name is not available. The bucket namespace is shared by all users of the system. Please select a different name and try again.")]
    BucketAlreadyExists { bucket: String },

    /// The bucket you tried to delete is not empty.
    #[error("The bucket you tried to delete is not empty")]
    BucketNotEmpty { bucket: String },

    /// Access denied.
    #[error("{message}")]
    AccessDenied { message: String },

    /// A request argument is invalid.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The request is structurally invalid (e.g. malformed chunk framing).
    #[error("{message}")]
    InvalidRequest { message: String },

    /// The body ended before the declared payload was delivered.
    #[error("You did not provide the number of bytes specified by the Content-Length HTTP header.")]
    IncompleteBody,

    /// The request signature does not match.
    #[error("The request signature we calculated does not match the signature you provided. Check your key and signing method.")]
    SignatureDoesNotMatch,

    /// An invalid bucket name was provided.
    #[error("The specified bucket is not valid.")]
    InvalidBucketName { name: String },

    /// The object key is too long (> 1024 bytes).
    #[error("Your key is too long")]
    KeyTooLongError,

    /// Invalid access key ID.
    #[error("The AWS Access Key Id you provided does not exist in our records.")]
    InvalidAccessKeyId,

    /// Feature not implemented.
    #[error("A header you provided implies functionality that is not implemented")]
    NotImplemented,

    /// Catch-all for unexpected internal errors.
    #[error("We encountered an internal error, please try again.")]
    InternalError(#[from] anyhow::Error),
}

impl S3Error {
    /// Return the S3 XML error code string.
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket { .. } => "NoSuchBucket",
            S3Error::NoSuchKey { .. } => "NoSuchKey",
            S3Error::BucketAlreadyExists { .. } => "BucketAlreadyExists",
            S3Error::BucketNotEmpty { .. } => "BucketNotEmpty",
            S3Error::AccessDenied { .. } => "AccessDenied",
            S3Error::InvalidArgument { .. } => "InvalidArgument",
            S3Error::InvalidRequest { .. } => "InvalidRequest",
            S3Error::IncompleteBody => "IncompleteBody",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::InvalidBucketName { .. } => "InvalidBucketName",
            S3Error::KeyTooLongError => "KeyTooLongError",
            S3Error::InvalidAccessKeyId => "InvalidAccessKeyId",
            S3Error::NotImplemented => "NotImplemented",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket { .. } | S3Error::NoSuchKey { .. } => StatusCode::NOT_FOUND,
            S3Error::BucketAlreadyExists { .. } | S3Error::BucketNotEmpty { .. } => {
                StatusCode::CONFLICT
            }
            S3Error::AccessDenied { .. }
            | S3Error::SignatureDoesNotMatch
            | S3Error::InvalidAccessKeyId => StatusCode::FORBIDDEN,
            S3Error::InvalidArgument { .. }
            | S3Error::InvalidRequest { .. }
            | S3Error::IncompleteBody
            | S3Error::InvalidBucketName { .. }
            | S3Error::KeyTooLongError => StatusCode::BAD_REQUEST,
            S3Error::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The resource an error refers to, used in log lines.
    fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchBucket { bucket }
            | S3Error::BucketAlreadyExists { bucket }
            | S3Error::BucketNotEmpty { bucket } => bucket,
            S3Error::NoSuchKey { key } => key,
            S3Error::InvalidBucketName { name } => name,
            _ => "",
        }
    }

    /// Shorthand for a policy denial.
    pub fn access_denied() -> Self {
        S3Error::AccessDenied {
            message: "Access Denied".to_string(),
        }
    }
}

impl From<AuthError> for S3Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UnknownAccessKey => S3Error::InvalidAccessKeyId,
            AuthError::SignatureMismatch => S3Error::SignatureDoesNotMatch,
            AuthError::UnreadableBody(e) => {
                S3Error::InternalError(anyhow::anyhow!("reading request body: {e}"))
            }
            other => S3Error::AccessDenied {
                message: other.to_string(),
            },
        }
    }
}

impl From<ChunkError> for S3Error {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::SignatureMismatch { .. } => S3Error::SignatureDoesNotMatch,
            ChunkError::UnexpectedEof => S3Error::IncompleteBody,
            ChunkError::Io(e) => S3Error::InternalError(anyhow::Error::new(e)),
            other => S3Error::InvalidRequest {
                message: other.to_string(),
            },
        }
    }
}

impl From<StorageError> for S3Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NoSuchBucket(bucket) => S3Error::NoSuchBucket { bucket },
            StorageError::NoSuchKey(key) => S3Error::NoSuchKey { key },
            StorageError::BucketAlreadyExists(bucket) => S3Error::BucketAlreadyExists { bucket },
            StorageError::BucketNotEmpty(bucket) => S3Error::BucketNotEmpty { bucket },
            StorageError::InvalidBucketName(name) => S3Error::InvalidBucketName { name },
            StorageError::InvalidKey(key) => S3Error::InvalidArgument {
                message: format!("Invalid object key: {key}"),
            },
            StorageError::KeyTooLong => S3Error::KeyTooLongError,
            StorageError::UnsupportedDelimiter(d) => S3Error::InvalidArgument {
                message: format!("Unsupported delimiter: {d:?}. Only \"/\" is supported."),
            },
            StorageError::Io(e) => S3Error::InternalError(anyhow::Error::new(e)),
        }
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        match &self {
            S3Error::InternalError(cause) => {
                tracing::error!(request_id = %request_id, "internal error: {cause:#}");
            }
            other => {
                tracing::debug!(
                    request_id = %request_id,
                    code = other.code(),
                    resource = other.resource(),
                    "request failed"
                );
            }
        }

        let body = render_error(
            self.code(),
            &self.to_string(),
            &request_id,
            &generate_host_id(),
        );

        (
            status,
            [
                ("content-type", "application/xml".to_string()),
                ("x-amz-request-id", request_id),
                ("date", date),
                ("server", SERVER_NAME.to_string()),
            ],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_shape() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            S3Error::NoSuchBucket { bucket: "b".into() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            S3Error::BucketAlreadyExists { bucket: "b".into() }.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(S3Error::SignatureDoesNotMatch.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(S3Error::InvalidAccessKeyId.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(S3Error::KeyTooLongError.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(S3Error::NotImplemented.status_code(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            S3Error::InternalError(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_auth_error_mapping() {
        assert_eq!(S3Error::from(AuthError::UnknownAccessKey).code(), "InvalidAccessKeyId");
        assert_eq!(
            S3Error::from(AuthError::SignatureMismatch).code(),
            "SignatureDoesNotMatch"
        );
        assert_eq!(S3Error::from(AuthError::MissingCredential).code(), "AccessDenied");
        assert_eq!(S3Error::from(AuthError::MalformedScope).code(), "AccessDenied");
    }

    #[test]
    fn test_chunk_error_mapping() {
        let err = ChunkError::SignatureMismatch { chunk: 0 };
        assert_eq!(S3Error::from(err).code(), "SignatureDoesNotMatch");
        assert_eq!(S3Error::from(ChunkError::MissingTrailingCrlf).code(), "InvalidRequest");
        assert_eq!(S3Error::from(ChunkError::UnexpectedEof).code(), "IncompleteBody");
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let err = S3Error::from(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "/secret/path denied",
        )));
        assert_eq!(err.code(), "InternalError");
        assert!(!err.to_string().contains("/secret/path"));
    }

    #[tokio::test]
    async fn test_into_response_body_and_headers() {
        let resp = S3Error::NoSuchKey { key: "a.txt".into() }.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.headers().get("server").unwrap(), "LabStore");
        let request_id = resp
            .headers()
            .get("x-amz-request-id")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("<Code>NoSuchKey</Code>"));
        assert!(body.contains(&format!("<RequestId>{request_id}</RequestId>")));
        assert!(body.contains("<HostId>"));
    }
}
