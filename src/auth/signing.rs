//! SigV4 signature engine: string-to-sign, key derivation, comparison.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm prefix of the `Authorization` header and the string to sign.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Algorithm line of a streaming chunk's string to sign.
pub const CHUNK_ALGORITHM: &str = "AWS4-HMAC-SHA256-PAYLOAD";

/// SHA-256 of the empty string.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// The `date/region/service/terminator` credential scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub date: String,
    pub region: String,
    pub service: String,
    pub terminator: String,
}

impl Scope {
    /// Split a scope string; anything but exactly four parts is rejected.
    pub fn parse(scope: &str) -> Result<Self, AuthError> {
        let parts: Vec<&str> = scope.split('/').collect();
        match parts.as_slice() {
            [date, region, service, terminator] => Ok(Self {
                date: date.to_string(),
                region: region.to_string(),
                service: service.to_string(),
                terminator: terminator.to_string(),
            }),
            _ => Err(AuthError::MalformedScope),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.date, self.region, self.service, self.terminator
        )
    }
}

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Build the string to sign.
///
/// ```text
/// AWS4-HMAC-SHA256 + '\n' +
/// Timestamp + '\n' +
/// CredentialScope + '\n' +
/// HexEncode(SHA256(CanonicalRequest))
/// ```
pub fn build_string_to_sign(timestamp: &str, scope: &str, canonical_request: &str) -> String {
    let hash = sha256_hex(canonical_request.as_bytes());
    format!("{ALGORITHM}\n{timestamp}\n{scope}\n{hash}")
}

/// Build the string to sign for one chunk of a streaming payload.
pub fn build_chunk_string_to_sign(
    timestamp: &str,
    scope: &str,
    previous_signature: &str,
    chunk: &[u8],
) -> String {
    format!(
        "{CHUNK_ALGORITHM}\n{timestamp}\n{scope}\n{previous_signature}\n{EMPTY_SHA256}\n{}",
        sha256_hex(chunk)
    )
}

/// Derive the signing key for a scope.
///
/// ```text
/// kDate    = HMAC-SHA256("AWS4" + secret, date)
/// kRegion  = HMAC-SHA256(kDate, region)
/// kService = HMAC-SHA256(kRegion, service)
/// kSigning = HMAC-SHA256(kService, "aws4_request")
/// ```
pub fn derive_signing_key(secret_key: &str, scope: &Scope) -> Vec<u8> {
    let k_secret = format!("AWS4{secret_key}");
    let k_date = hmac_sha256(k_secret.as_bytes(), scope.date.as_bytes());
    let k_region = hmac_sha256(&k_date, scope.region.as_bytes());
    let k_service = hmac_sha256(&k_region, scope.service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// HexEncode(HMAC-SHA256(SigningKey, StringToSign)).
pub fn sign(signing_key: &[u8], string_to_sign: &str) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

/// Derive the key for `scope` and sign `string_to_sign` with it.
pub fn compute_signature(
    secret_key: &str,
    scope: &str,
    string_to_sign: &str,
) -> Result<String, AuthError> {
    let scope = Scope::parse(scope)?;
    let key = derive_signing_key(secret_key, &scope);
    Ok(sign(&key, string_to_sign))
}

/// Compare two hex signatures in constant time.
///
/// A value that is not valid hex never matches.
pub fn signatures_match(provided: &str, expected: &str) -> bool {
    let (Ok(provided), Ok(expected)) = (hex::decode(provided), hex::decode(expected)) else {
        return false;
    };
    provided.ct_eq(&expected).into()
}
