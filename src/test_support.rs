//! Test-only SigV4 signer.
//!
//! Builds requests carrying genuine signatures so tests go through the same
//! verification path as real clients.

use axum::body::Body;
use axum::http::Request;

use crate::auth::signing::{
    build_chunk_string_to_sign, build_string_to_sign, compute_signature, derive_signing_key,
    sha256_hex, sign, Scope,
};
use crate::auth::{canonical, STREAMING_PAYLOAD};

pub const ACCESS_KEY: &str = "admin";
pub const SECRET_KEY: &str = "admin-secret";
pub const TIMESTAMP: &str = "20240101T000000Z";
pub const SCOPE: &str = "20240101/us-east-1/s3/aws4_request";
pub const HOST: &str = "localhost:6789";

const SIGNED_HEADERS: [&str; 3] = ["host", "x-amz-content-sha256", "x-amz-date"];

/// Compute the request signature for the standard signed header set.
fn request_signature(secret_key: &str, method: &str, uri: &str, payload_hash: &str) -> String {
    let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
    let headers: Vec<(String, String)> = SIGNED_HEADERS
        .iter()
        .zip([HOST, payload_hash, TIMESTAMP])
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    let canonical_request =
        canonical::build_canonical_request(method, path, query, &headers, payload_hash);
    let sts = build_string_to_sign(TIMESTAMP, SCOPE, &canonical_request);
    compute_signature(secret_key, SCOPE, &sts).unwrap()
}

fn build(
    access_key: &str,
    method: &str,
    uri: &str,
    payload_hash: &str,
    signature: &str,
    body: Vec<u8>,
) -> Request<Body> {
    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={access_key}/{SCOPE}, SignedHeaders={}, Signature={signature}",
        SIGNED_HEADERS.join(";")
    );
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", HOST)
        .header("x-amz-content-sha256", payload_hash)
        .header("x-amz-date", TIMESTAMP)
        .header("authorization", authorization)
        .body(Body::from(body))
        .unwrap()
}

/// Request signed by the given identity with an explicit payload hash token.
pub fn signed_request_with_hash(
    access_key: &str,
    secret_key: &str,
    method: &str,
    uri: &str,
    body: Vec<u8>,
    payload_hash: &str,
) -> Request<Body> {
    let signature = request_signature(secret_key, method, uri, payload_hash);
    build(access_key, method, uri, payload_hash, &signature, body)
}

/// Request signed by the given identity over the SHA-256 of `body`.
pub fn signed_request_as(
    access_key: &str,
    secret_key: &str,
    method: &str,
    uri: &str,
    body: Vec<u8>,
) -> Request<Body> {
    let hash = sha256_hex(&body);
    signed_request_with_hash(access_key, secret_key, method, uri, body, &hash)
}

/// Request signed by the admin identity.
pub fn signed_request(method: &str, uri: &str, body: Vec<u8>) -> Request<Body> {
    signed_request_as(ACCESS_KEY, SECRET_KEY, method, uri, body)
}

/// Encode `chunks` as an `aws-chunked` body chained from `seed_signature`.
pub fn encode_chunks<C: AsRef<[u8]>>(
    secret_key: &str,
    timestamp: &str,
    scope: &str,
    seed_signature: &str,
    chunks: &[C],
) -> Vec<u8> {
    let key = derive_signing_key(secret_key, &Scope::parse(scope).unwrap());
    let mut previous = seed_signature.to_string();
    let mut body = Vec::new();

    let mut frames: Vec<&[u8]> = chunks.iter().map(|c| c.as_ref()).collect();
    frames.push(b"");
    for data in frames {
        let sts = build_chunk_string_to_sign(timestamp, scope, &previous, data);
        let signature = sign(&key, &sts);
        body.extend_from_slice(format!("{:x};chunk-signature={signature}\r\n", data.len()).as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
        previous = signature;
    }
    body
}

/// Streaming upload signed by the admin identity.
pub fn streaming_request<C: AsRef<[u8]>>(method: &str, uri: &str, chunks: &[C]) -> Request<Body> {
    let signature = request_signature(SECRET_KEY, method, uri, STREAMING_PAYLOAD);
    let body = encode_chunks(SECRET_KEY, TIMESTAMP, SCOPE, &signature, chunks);
    let decoded_len: usize = chunks.iter().map(|c| c.as_ref().len()).sum();
    let mut req = build(ACCESS_KEY, method, uri, STREAMING_PAYLOAD, &signature, body);
    req.headers_mut()
        .insert("content-encoding", "aws-chunked".parse().unwrap());
    req.headers_mut().insert(
        "x-amz-decoded-content-length",
        decoded_len.to_string().parse().unwrap(),
    );
    req
}
