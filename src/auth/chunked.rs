//! Streaming (`aws-chunked`) payload verification.
//!
//! A streaming body is a sequence of
//! `hex-size;chunk-signature=sig\r\n<data>\r\n` frames ending with a
//! zero-size frame.  Every chunk is signed over the previous chunk's
//! signature, starting from the request's own signature, so chunks are
//! verified strictly in order.
//!
//! [`ChunkedPayloadReader`] exposes the decoded bytes through
//! [`std::io::Read`] and only ever hands out data whose signature has
//! already been checked.

use std::io::{self, BufRead, Read};

use bytes::Bytes;
use thiserror::Error;

use super::signing::{build_chunk_string_to_sign, derive_signing_key, sign, signatures_match, Scope};
use super::{AuthError, AuthenticatedRequest};

const SIGNATURE_PARAM: &str = "chunk-signature=";

/// Failures while decoding or verifying a chunked payload.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("malformed chunk header: {0}")]
    MalformedHeader(String),

    #[error("invalid chunk size: {0}")]
    InvalidSize(String),

    #[error("chunk data is not followed by CRLF")]
    MissingTrailingCrlf,

    #[error("payload ended before the final chunk")]
    UnexpectedEof,

    #[error("signature of chunk {chunk} does not match")]
    SignatureMismatch { chunk: usize },

    #[error("chunked payload already failed")]
    AlreadyFailed,

    #[error("reading chunked payload: {0}")]
    Io(#[source] io::Error),
}

enum State {
    AwaitHeader,
    AwaitData { size: usize, signature: String },
    AwaitTrailingCrlf { data: Vec<u8>, signature: String },
    /// `data[offset..]` is verified and not yet handed to the caller.
    Verified { data: Vec<u8>, offset: usize },
    Done,
    Failed,
}

/// Pull-based decoder for a streaming SigV4 payload.
pub struct ChunkedPayloadReader<R> {
    inner: R,
    state: State,
    signing_key: Vec<u8>,
    timestamp: String,
    scope: String,
    previous_signature: String,
    chunk_index: usize,
}

impl<R: BufRead> ChunkedPayloadReader<R> {
    /// Start a chain rooted at `seed_signature`, the request's signature.
    pub fn new(
        inner: R,
        secret_key: &str,
        timestamp: &str,
        scope: &str,
        seed_signature: &str,
    ) -> Result<Self, AuthError> {
        let signing_key = derive_signing_key(secret_key, &Scope::parse(scope)?);
        Ok(Self {
            inner,
            state: State::AwaitHeader,
            signing_key,
            timestamp: timestamp.to_string(),
            scope: scope.to_string(),
            previous_signature: seed_signature.to_string(),
            chunk_index: 0,
        })
    }

    /// Reader for the body of an authenticated streaming request.
    pub fn for_request(inner: R, auth: &AuthenticatedRequest) -> Result<Self, AuthError> {
        Self::new(
            inner,
            &auth.secret_key,
            &auth.timestamp,
            &auth.scope,
            &auth.signature,
        )
    }

    /// Run one state transition.
    fn advance(&mut self) -> Result<(), ChunkError> {
        let next = match std::mem::replace(&mut self.state, State::Failed) {
            State::AwaitHeader => self.read_header()?,
            State::AwaitData { size, signature } => State::AwaitTrailingCrlf {
                data: self.read_data(size)?,
                signature,
            },
            State::AwaitTrailingCrlf { data, signature } => {
                self.read_trailing_crlf()?;
                self.verify(&data, signature)?;
                State::Verified { data, offset: 0 }
            }
            State::Verified { .. } => State::AwaitHeader,
            State::Done => State::Done,
            State::Failed => return Err(ChunkError::AlreadyFailed),
        };
        self.state = next;
        Ok(())
    }

    fn read_header(&mut self) -> Result<State, ChunkError> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line).map_err(ChunkError::Io)?;
        if n == 0 {
            return Err(ChunkError::UnexpectedEof);
        }
        let line = line
            .strip_suffix("\r\n")
            .ok_or_else(|| ChunkError::MalformedHeader(line.trim_end().to_string()))?;

        let (size_hex, params) = match line.split_once(';') {
            Some((size, params)) => (size, Some(params)),
            None => (line, None),
        };
        let size = usize::from_str_radix(size_hex.trim(), 16)
            .map_err(|_| ChunkError::InvalidSize(size_hex.to_string()))?;

        if size == 0 {
            tracing::debug!(chunks = self.chunk_index, "final chunk reached");
            return Ok(State::Done);
        }

        let signature = params
            .and_then(|p| p.trim().strip_prefix(SIGNATURE_PARAM))
            .ok_or_else(|| ChunkError::MalformedHeader(line.to_string()))?;
        Ok(State::AwaitData {
            size,
            signature: signature.to_string(),
        })
    }

    fn read_data(&mut self, size: usize) -> Result<Vec<u8>, ChunkError> {
        let mut data = Vec::new();
        let read = (&mut self.inner)
            .take(size as u64)
            .read_to_end(&mut data)
            .map_err(ChunkError::Io)?;
        if read != size {
            return Err(ChunkError::UnexpectedEof);
        }
        Ok(data)
    }

    fn read_trailing_crlf(&mut self) -> Result<(), ChunkError> {
        let mut crlf = [0u8; 2];
        match self.inner.read_exact(&mut crlf) {
            Ok(()) if &crlf == b"\r\n" => Ok(()),
            Ok(()) => Err(ChunkError::MissingTrailingCrlf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ChunkError::MissingTrailingCrlf),
            Err(e) => Err(ChunkError::Io(e)),
        }
    }

    fn verify(&mut self, data: &[u8], signature: String) -> Result<(), ChunkError> {
        let sts =
            build_chunk_string_to_sign(&self.timestamp, &self.scope, &self.previous_signature, data);
        let expected = sign(&self.signing_key, &sts);
        if !signatures_match(&signature, &expected) {
            tracing::warn!(
                chunk = self.chunk_index,
                provided = %crate::redact::truncate(&signature),
                "chunk signature mismatch"
            );
            return Err(ChunkError::SignatureMismatch {
                chunk: self.chunk_index,
            });
        }
        self.previous_signature = signature;
        self.chunk_index += 1;
        Ok(())
    }
}

impl<R: BufRead> Read for ChunkedPayloadReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match &mut self.state {
                State::Done => return Ok(0),
                State::Verified { data, offset } if *offset < data.len() => {
                    let n = buf.len().min(data.len() - *offset);
                    buf[..n].copy_from_slice(&data[*offset..*offset + n]);
                    *offset += n;
                    return Ok(n);
                }
                _ => self
                    .advance()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            }
        }
    }
}

/// Decode and verify a whole streaming body.
///
/// Nothing is returned unless every chunk verified, so a bad body never
/// reaches storage.
pub fn decode_streaming_body(body: Bytes, auth: &AuthenticatedRequest) -> Result<Bytes, ChunkError> {
    let mut reader = ChunkedPayloadReader::for_request(io::Cursor::new(body), auth)
        .map_err(|e| ChunkError::MalformedHeader(e.to_string()))?;
    let mut decoded = Vec::new();
    reader.read_to_end(&mut decoded).map_err(into_chunk_error)?;
    Ok(Bytes::from(decoded))
}

/// Recover the [`ChunkError`] wrapped by the `Read` impl.
fn into_chunk_error(err: io::Error) -> ChunkError {
    if !err.get_ref().is_some_and(|inner| inner.is::<ChunkError>()) {
        return ChunkError::Io(err);
    }
    match err.into_inner().map(|inner| inner.downcast::<ChunkError>()) {
        Some(Ok(chunk_err)) => *chunk_err,
        _ => ChunkError::AlreadyFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;

    const SECRET: &str = "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY";
    const TIMESTAMP: &str = "20130524T000000Z";
    const SCOPE: &str = "20130524/us-east-1/s3/aws4_request";
    const SEED: &str = "4f232c4386841ef735655705268965c44a0e4690baa4adea153f7db9fa80a0a9";

    fn reader(body: Vec<u8>) -> ChunkedPayloadReader<io::Cursor<Vec<u8>>> {
        ChunkedPayloadReader::new(io::Cursor::new(body), SECRET, TIMESTAMP, SCOPE, SEED).unwrap()
    }

    fn aws_example_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(
            b"10000;chunk-signature=ad80c730a21e5b8d04586a2213dd63b9a0e99e0e2307b0ade35a65485a288648\r\n",
        );
        body.extend(std::iter::repeat(b'a').take(65536));
        body.extend_from_slice(
            b"\r\n400;chunk-signature=0055627c9e194cb4542bae2aa5492e3c1575bbb81b612b7d234b86a503ef5497\r\n",
        );
        body.extend(std::iter::repeat(b'a').take(1024));
        body.extend_from_slice(
            b"\r\n0;chunk-signature=b6c6ea8a5354eaf15b3cb7646744f4275b71ea724fed81ceb9323e279d449df9\r\n\r\n",
        );
        body
    }

    fn read_all(mut r: impl Read) -> Result<Vec<u8>, ChunkError> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).map_err(into_chunk_error)?;
        Ok(out)
    }

    // ── Golden vector ────────────────────────────────────────────────

    #[test]
    fn test_aws_example_payload() {
        let decoded = read_all(reader(aws_example_body())).unwrap();
        assert_eq!(decoded.len(), 66560);
        assert!(decoded.iter().all(|&b| b == b'a'));
    }

    #[test]
    fn test_small_reads_drain_state_machine() {
        let mut r = reader(aws_example_body());
        let mut buf = [0u8; 7];
        let mut total = 0;
        loop {
            let n = r.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 66560);
        assert_eq!(r.read(&mut buf).unwrap(), 0);
    }

    // ── Chain of trust ───────────────────────────────────────────────

    #[test]
    fn test_wrong_seed_rejects_first_chunk() {
        let other_seed = "0".repeat(64);
        let r = ChunkedPayloadReader::new(
            io::Cursor::new(aws_example_body()),
            SECRET,
            TIMESTAMP,
            SCOPE,
            &other_seed,
        )
        .unwrap();
        assert!(matches!(
            read_all(r),
            Err(ChunkError::SignatureMismatch { chunk: 0 })
        ));
    }

    #[test]
    fn test_no_bytes_before_first_chunk_verified() {
        let mut body = aws_example_body();
        // Corrupt the first chunk's data.
        body[100] = b'b';
        let mut r = reader(body);
        let mut buf = [0u8; 16];
        assert!(r.read(&mut buf).is_err());
        // Once failed, the reader keeps failing instead of reporting EOF.
        assert!(r.read(&mut buf).is_err());
    }

    #[test]
    fn test_second_chunk_must_chain_from_first() {
        let body = test_support::encode_chunks(SECRET, TIMESTAMP, SCOPE, SEED, &[b"hello", b"world"]);
        let decoded = read_all(reader(body)).unwrap();
        assert_eq!(decoded, b"helloworld");

        // Keep only the first frame, then append a chunk signed against the
        // seed instead of against the first chunk.
        let first = test_support::encode_chunks(SECRET, TIMESTAMP, SCOPE, SEED, &[b"hello"]);
        let final_frame_len = "0;chunk-signature=".len() + 64 + 4;
        let mut spliced = first[..first.len() - final_frame_len].to_vec();
        let rogue = test_support::encode_chunks(SECRET, TIMESTAMP, SCOPE, SEED, &[b"world"]);
        spliced.extend_from_slice(&rogue);
        assert!(matches!(
            read_all(reader(spliced)),
            Err(ChunkError::SignatureMismatch { chunk: 1 })
        ));
    }

    // ── Framing ──────────────────────────────────────────────────────

    #[test]
    fn test_missing_trailing_crlf() {
        let mut body = test_support::encode_chunks(SECRET, TIMESTAMP, SCOPE, SEED, &[b"abc"]);
        let pos = body.windows(5).position(|w| w == b"abc\r\n").unwrap();
        body[pos + 3] = b'X';
        assert!(matches!(
            read_all(reader(body)),
            Err(ChunkError::MissingTrailingCrlf)
        ));
    }

    #[test]
    fn test_invalid_size() {
        let body = b"zz;chunk-signature=00\r\n".to_vec();
        assert!(matches!(read_all(reader(body)), Err(ChunkError::InvalidSize(_))));
    }

    #[test]
    fn test_missing_signature_param() {
        let body = b"3\r\nabc\r\n0\r\n\r\n".to_vec();
        assert!(matches!(
            read_all(reader(body)),
            Err(ChunkError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_truncated_body() {
        let body = b"10;chunk-signature=00\r\nabc".to_vec();
        assert!(matches!(read_all(reader(body)), Err(ChunkError::UnexpectedEof)));
        assert!(matches!(read_all(reader(Vec::new())), Err(ChunkError::UnexpectedEof)));
    }

    #[test]
    fn test_zero_chunk_ends_stream() {
        let body = b"0;chunk-signature=00\r\n\r\n".to_vec();
        assert_eq!(read_all(reader(body)).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_malformed_scope_rejected_up_front() {
        assert!(ChunkedPayloadReader::new(io::Cursor::new(Vec::new()), SECRET, TIMESTAMP, "bad", SEED)
            .is_err());
    }
}
