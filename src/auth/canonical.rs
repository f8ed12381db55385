//! SigV4 canonical request construction.
//!
//! ```text
//! HTTPMethod + '\n' +
//! CanonicalURI + '\n' +
//! CanonicalQueryString + '\n' +
//! CanonicalHeaders + '\n' +
//! SignedHeaders + '\n' +
//! HashedPayload
//! ```

use std::collections::BTreeMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// RFC 3986 unreserved characters stay literal; everything else is encoded.
const S3_QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Encode one path segment or query component with S3's rules.
pub fn s3_uri_encode(input: &str) -> String {
    utf8_percent_encode(input, S3_QUERY).to_string()
}

/// Canonical URI: decode the request path, then re-encode each segment,
/// preserving `/`.  An empty path becomes `/`.
pub fn canonical_uri(raw_path: &str) -> String {
    if raw_path.is_empty() {
        return "/".to_string();
    }
    let decoded = percent_decode_str(raw_path).decode_utf8_lossy();
    let encoded = decoded
        .split('/')
        .map(s3_uri_encode)
        .collect::<Vec<_>>()
        .join("/");
    if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{encoded}")
    }
}

/// Decode a form-style query component (`+` is a space).
fn decode_query_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Parse a raw query string into key → values, tolerating malformed input.
pub fn parse_query(raw_query: &str) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in raw_query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(decode_query_component(key))
            .or_default()
            .push(decode_query_component(value));
    }
    params
}

/// Canonical query string: keys sorted, each key's values sorted, both
/// re-encoded with `%20` for spaces and `~` left as is.
pub fn canonical_query_string(raw_query: &str) -> String {
    let mut pairs = Vec::new();
    for (key, mut values) in parse_query(raw_query) {
        values.sort();
        let key = s3_uri_encode(&key);
        for value in values {
            pairs.push(format!("{key}={}", s3_uri_encode(&value)));
        }
    }
    pairs.join("&")
}

/// Trim a header value and collapse inner runs of whitespace.
pub fn canonical_header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Assemble the canonical request.
///
/// `headers` holds the signed headers in the order the client declared
/// them, already resolved to their values.  The order is kept as given.
pub fn build_canonical_request(
    method: &str,
    path: &str,
    raw_query: &str,
    headers: &[(String, String)],
    payload_hash: &str,
) -> String {
    let mut canonical_headers = String::new();
    for (name, value) in headers {
        canonical_headers.push_str(&name.to_ascii_lowercase());
        canonical_headers.push(':');
        canonical_headers.push_str(&canonical_header_value(value));
        canonical_headers.push('\n');
    }
    let signed_headers = headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    format!(
        "{method}\n{}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        canonical_uri(path),
        canonical_query_string(raw_query),
    )
}
