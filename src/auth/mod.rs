//! AWS Signature Version 4 request authentication.
//!
//! [`authenticate`] turns an inbound request into an
//! [`AuthenticatedRequest`] or an [`AuthError`].  When the payload hash has
//! to be computed from the body, the body is buffered, hashed and put back
//! on the request so handlers can still read it.
//!
//! - [`canonical`]: canonical request construction.
//! - [`signing`]: key derivation and signature comparison.
//! - [`chunked`]: verification of `STREAMING-AWS4-HMAC-SHA256-PAYLOAD` bodies.

pub mod canonical;
pub mod chunked;
pub mod signing;

use std::fmt;

use axum::body::Body;
use axum::extract::Request;
use axum::http::request::Parts;
use thiserror::Error;
use tracing::debug;

use crate::iam::Iam;
use crate::redact;

/// `x-amz-content-sha256` value announcing a chunk-signed body.
pub const STREAMING_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";

/// `x-amz-content-sha256` value for a body excluded from the signature.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Reasons a request fails authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization header must start with AWS4-HMAC-SHA256")]
    MissingAlgorithm,

    #[error("Authorization header is missing Credential")]
    MissingCredential,

    #[error("Authorization header is missing SignedHeaders")]
    MissingSignedHeaders,

    #[error("Authorization header is missing Signature")]
    MissingSignature,

    #[error("unknown access key")]
    UnknownAccessKey,

    #[error("credential scope must have exactly four parts")]
    MalformedScope,

    #[error("signature does not match")]
    SignatureMismatch,

    #[error("could not read request body: {0}")]
    UnreadableBody(String),
}

/// The components of an `Authorization: AWS4-HMAC-SHA256 ...` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAuthorization {
    pub access_key: String,
    /// Everything after the access key in `Credential`.
    pub scope: String,
    /// Header names in the order the client declared them.
    pub signed_headers: Vec<String>,
    pub signature: String,
}

/// Parse the `Authorization` header value.
///
/// ```text
/// AWS4-HMAC-SHA256 Credential=AKID/20130524/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature=abcdef...
/// ```
pub fn parse_authorization_header(header: &str) -> Result<ParsedAuthorization, AuthError> {
    let rest = header
        .trim()
        .strip_prefix(signing::ALGORITHM)
        .filter(|rest| rest.starts_with(' '))
        .ok_or(AuthError::MissingAlgorithm)?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for part in rest.split(',') {
        let part = part.trim();
        if let Some(val) = part.strip_prefix("Credential=") {
            credential = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("SignedHeaders=") {
            signed_headers = Some(val.trim());
        } else if let Some(val) = part.strip_prefix("Signature=") {
            signature = Some(val.trim());
        }
    }

    let credential = credential
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::MissingCredential)?;
    let signed_headers = signed_headers
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingSignedHeaders)?;
    let signature = signature
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::MissingSignature)?;

    let (access_key, scope) = credential.split_once('/').unwrap_or((credential, ""));

    Ok(ParsedAuthorization {
        access_key: access_key.to_string(),
        scope: scope.to_string(),
        signed_headers: signed_headers.split(';').map(str::to_string).collect(),
        signature: signature.to_string(),
    })
}

/// A request whose signature has been verified.
///
/// Stored in the request extensions by the auth middleware.
#[derive(Clone)]
pub struct AuthenticatedRequest {
    pub access_key: String,
    pub secret_key: String,
    /// The verified request signature; seeds the chunk chain.
    pub signature: String,
    pub timestamp: String,
    pub scope: String,
    pub is_streaming: bool,
}

impl fmt::Debug for AuthenticatedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedRequest")
            .field("access_key", &self.access_key)
            .field("secret_key", &redact::redact_secret(&self.secret_key))
            .field("signature", &redact::truncate(&self.signature))
            .field("timestamp", &self.timestamp)
            .field("scope", &self.scope)
            .field("is_streaming", &self.is_streaming)
            .finish()
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> &'a str {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Host the request was addressed to.
fn effective_host(parts: &Parts) -> String {
    parts
        .uri
        .authority()
        .map(|a| a.as_str().to_string())
        .unwrap_or_else(|| header_str(parts, "host").to_string())
}

/// Resolve each signed header to its value, in declared order.
///
/// Repeated headers are joined with `,`; a header that is absent
/// contributes an empty value.
fn signed_header_values(parts: &Parts, signed_headers: &[String]) -> Vec<(String, String)> {
    signed_headers
        .iter()
        .map(|name| {
            let lower = name.to_ascii_lowercase();
            let value = if lower == "host" {
                effective_host(parts)
            } else {
                parts
                    .headers
                    .get_all(lower.as_str())
                    .iter()
                    .map(|v| v.to_str().unwrap_or("").trim())
                    .collect::<Vec<_>>()
                    .join(",")
            };
            (name.clone(), value)
        })
        .collect()
}

/// Verify the SigV4 signature of `request`.
///
/// On success the request is handed back, with its body restored if it
/// had to be read for hashing.
pub async fn authenticate(
    iam: &Iam,
    request: Request,
) -> Result<(Request, AuthenticatedRequest), AuthError> {
    let (parts, body) = request.into_parts();

    let authorization = header_str(&parts, "authorization");
    debug!(
        authorization = %redact::truncate_param(authorization, "Signature"),
        "processing SigV4 request"
    );
    let parsed = parse_authorization_header(authorization)?;

    let secret_key = iam
        .secret_key(&parsed.access_key)
        .ok_or(AuthError::UnknownAccessKey)?;

    let declared_hash = header_str(&parts, "x-amz-content-sha256");
    let (payload_hash, body) = match declared_hash {
        UNSIGNED_PAYLOAD | STREAMING_PAYLOAD => (declared_hash.to_string(), body),
        _ => {
            let bytes = axum::body::to_bytes(body, usize::MAX)
                .await
                .map_err(|e| AuthError::UnreadableBody(e.to_string()))?;
            let hash = signing::sha256_hex(&bytes);
            debug!(length = bytes.len(), sha256 = %redact::truncate(&hash), "hashed request body");
            (hash, Body::from(bytes))
        }
    };

    let headers = signed_header_values(&parts, &parsed.signed_headers);
    let canonical_request = canonical::build_canonical_request(
        parts.method.as_str(),
        parts.uri.path(),
        parts.uri.query().unwrap_or(""),
        &headers,
        &payload_hash,
    );
    debug!(canonical_request = %redact::truncate_last_line(&canonical_request), "built canonical request");

    let timestamp = header_str(&parts, "x-amz-date").to_string();
    let string_to_sign = signing::build_string_to_sign(&timestamp, &parsed.scope, &canonical_request);
    let expected = signing::compute_signature(secret_key, &parsed.scope, &string_to_sign)?;

    if !signing::signatures_match(&parsed.signature, &expected) {
        debug!(
            provided = %redact::truncate(&parsed.signature),
            recomputed = %redact::truncate(&expected),
            "signatures differ"
        );
        return Err(AuthError::SignatureMismatch);
    }

    let auth = AuthenticatedRequest {
        access_key: parsed.access_key,
        secret_key: secret_key.to_string(),
        signature: expected,
        timestamp,
        scope: parsed.scope,
        is_streaming: payload_hash == STREAMING_PAYLOAD,
    };
    debug!(access_key = %auth.access_key, streaming = auth.is_streaming, "request authenticated");

    Ok((Request::from_parts(parts, body), auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::test_support::{self, ACCESS_KEY, SECRET_KEY};

    fn iam() -> Iam {
        Iam::from_config(&AuthConfig {
            access_key: ACCESS_KEY.into(),
            secret_key: SECRET_KEY.into(),
            users: vec![],
        })
        .unwrap()
    }

    // ── Header parsing ───────────────────────────────────────────────

    #[test]
    fn test_parse_authorization_header() {
        let header = "AWS4-HMAC-SHA256 Credential=AKID/20130524/us-east-1/s3/aws4_request, \
                      SignedHeaders=host;x-amz-date, Signature=abcd";
        let parsed = parse_authorization_header(header).unwrap();
        assert_eq!(parsed.access_key, "AKID");
        assert_eq!(parsed.scope, "20130524/us-east-1/s3/aws4_request");
        assert_eq!(parsed.signed_headers, vec!["host", "x-amz-date"]);
        assert_eq!(parsed.signature, "abcd");
    }

    #[test]
    fn test_parse_missing_parts() {
        assert!(matches!(
            parse_authorization_header("Basic dXNlcjpwYXNz"),
            Err(AuthError::MissingAlgorithm)
        ));
        assert!(matches!(
            parse_authorization_header("AWS4-HMAC-SHA256X Credential=a/b"),
            Err(AuthError::MissingAlgorithm)
        ));
        assert!(matches!(
            parse_authorization_header("AWS4-HMAC-SHA256 SignedHeaders=host, Signature=ab"),
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            parse_authorization_header("AWS4-HMAC-SHA256 Credential=a/b/c/d/e, Signature=ab"),
            Err(AuthError::MissingSignedHeaders)
        ));
        assert!(matches!(
            parse_authorization_header("AWS4-HMAC-SHA256 Credential=a/b/c/d/e, SignedHeaders=host"),
            Err(AuthError::MissingSignature)
        ));
    }

    // ── Verification ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_roundtrip_list_objects_v2() {
        let req = test_support::signed_request("GET", "/bucket?list-type=2", Vec::new());
        let (_, auth) = authenticate(&iam(), req).await.unwrap();
        assert_eq!(auth.access_key, ACCESS_KEY);
        assert_eq!(auth.secret_key, SECRET_KEY);
        assert_eq!(auth.scope, test_support::SCOPE);
        assert_eq!(auth.timestamp, test_support::TIMESTAMP);
        assert!(!auth.is_streaming);
    }

    /// Fixed signature for `GET /bucket?list-type=2` by `admin`/`admin-secret`
    /// at 2024-01-01T00:00:00Z in us-east-1, signing host, payload hash and date.
    const GOLDEN_SIGNATURE: &str =
        "b0fe073c3bb47cd2b25317c4d222dbbd90f9321756afca6e9957250481cf8620";

    fn golden_request(uri: &str, host_header: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder()
            .method("GET")
            .uri(uri)
            .header("x-amz-content-sha256", signing::EMPTY_SHA256)
            .header("x-amz-date", "20240101T000000Z")
            .header(
                "authorization",
                format!(
                    "AWS4-HMAC-SHA256 Credential=admin/20240101/us-east-1/s3/aws4_request, \
                     SignedHeaders=host;x-amz-content-sha256;x-amz-date, \
                     Signature={GOLDEN_SIGNATURE}"
                ),
            );
        if let Some(host) = host_header {
            builder = builder.header("host", host);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_golden_vector_list_objects_v2() {
        let req = golden_request("/bucket?list-type=2", Some("localhost:6789"));
        let (_, auth) = authenticate(&iam(), req).await.unwrap();
        assert_eq!(auth.access_key, "admin");
        assert_eq!(auth.scope, "20240101/us-east-1/s3/aws4_request");

        // An absolute request target supplies the host instead of the header.
        let req = golden_request("http://localhost:6789/bucket?list-type=2", None);
        assert!(authenticate(&iam(), req).await.is_ok());

        let req = golden_request("/bucket?list-type=2", Some("localhost:6790"));
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_body_restored_after_hashing() {
        let req = test_support::signed_request("PUT", "/bucket/key.txt", b"payload".to_vec());
        let (req, _) = authenticate(&iam(), req).await.unwrap();
        let body = axum::body::to_bytes(req.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"payload");
    }

    #[tokio::test]
    async fn test_unsigned_payload_skips_body() {
        let req = test_support::signed_request_with_hash(
            ACCESS_KEY,
            SECRET_KEY,
            "PUT",
            "/bucket/key.txt",
            b"anything".to_vec(),
            UNSIGNED_PAYLOAD,
        );
        assert!(authenticate(&iam(), req).await.is_ok());
    }

    #[tokio::test]
    async fn test_declared_hash_must_match_body() {
        let mut req = test_support::signed_request("PUT", "/bucket/key.txt", b"payload".to_vec());
        *req.body_mut() = Body::from("tampered");
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_streaming_flag() {
        let req = test_support::streaming_request("PUT", "/bucket/key.txt", &[b"abc"]);
        let (_, auth) = authenticate(&iam(), req).await.unwrap();
        assert!(auth.is_streaming);
    }

    #[tokio::test]
    async fn test_flipped_signature_rejected() {
        let mut req = test_support::signed_request("GET", "/bucket?list-type=2", Vec::new());
        let header = req.headers()["authorization"].to_str().unwrap().to_string();
        let last = header.chars().last().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        let tampered = format!("{}{}", &header[..header.len() - 1], flipped);
        req.headers_mut()
            .insert("authorization", tampered.parse().unwrap());
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_flipped_signed_header_rejected() {
        let mut req = test_support::signed_request("GET", "/bucket?list-type=2", Vec::new());
        req.headers_mut()
            .insert("x-amz-date", "20240101T000001Z".parse().unwrap());
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_host_header_is_signed() {
        let mut req = test_support::signed_request("GET", "/", Vec::new());
        req.headers_mut().insert("host", "evil.example".parse().unwrap());
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[tokio::test]
    async fn test_unknown_access_key() {
        let req = test_support::signed_request_as("ghost", "nope", "GET", "/", Vec::new());
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::UnknownAccessKey)
        ));
    }

    #[tokio::test]
    async fn test_malformed_scope() {
        let mut req = test_support::signed_request("GET", "/", Vec::new());
        let header = req.headers()["authorization"].to_str().unwrap().to_string();
        let tampered = header.replace("/s3/aws4_request", "/s3");
        req.headers_mut()
            .insert("authorization", tampered.parse().unwrap());
        assert!(matches!(
            authenticate(&iam(), req).await,
            Err(AuthError::MalformedScope)
        ));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let auth = AuthenticatedRequest {
            access_key: "admin".into(),
            secret_key: "super-secret".into(),
            signature: "0123456789abcdef".into(),
            timestamp: "20240101T000000Z".into(),
            scope: "20240101/us-east-1/s3/aws4_request".into(),
            is_streaming: false,
        };
        let rendered = format!("{auth:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
