//! Base64 encoding and decoding utilities.
//!
//! Payment headers (`X-Payment`, `X-Payment-Response`) carry JSON documents. The
//! canonical form is base64 of the JSON bytes; [`decode_header`] also accepts raw JSON,
//! which some clients send unencoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::fmt::Display;

/// A wrapper for base64-encoded byte data.
///
/// ```rust
/// use x402_types::util::Base64Bytes;
///
/// let encoded = Base64Bytes::encode(b"hello world");
/// assert_eq!(encoded.to_string(), "aGVsbG8gd29ybGQ=");
/// assert_eq!(encoded.decode().unwrap(), b"hello world");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

/// Failure to read a JSON payment header.
#[derive(Debug, thiserror::Error)]
pub enum HeaderDecodeError {
    #[error("Header is neither base64 nor JSON")]
    Encoding,
    #[error("Header JSON does not match the expected shape: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serializes `value` to JSON and base64-encodes it for use as a header value.
pub fn encode_header<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64Bytes::encode(json).to_string())
}

/// Reads a JSON header value that is either base64-encoded or raw JSON.
pub fn decode_header<T: DeserializeOwned>(header: &[u8]) -> Result<T, HeaderDecodeError> {
    let trimmed = header.trim_ascii();
    if trimmed.first() == Some(&b'{') {
        return Ok(serde_json::from_slice(trimmed)?);
    }
    let json = Base64Bytes::from(trimmed)
        .decode()
        .map_err(|_| HeaderDecodeError::Encoding)?;
    Ok(serde_json::from_slice(&json)?)
}
