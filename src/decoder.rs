//! Payload decoder
//!
//! Normalizes the two supported attachment encodings (inline data URL and
//! `{ "bytes": ... }` container) into raw bytes.

use crate::error::InterceptError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::Value;

/// Prefix every inline data URL starts with
pub const DATA_URL_PREFIX: &str = "data:";

/// Marker separating the media type from a base64 body
pub const BASE64_MARKER: &str = ";base64,";

/// MIME type reported for data URLs without a `;`
pub const UNKNOWN_IMAGE_MIME: &str = "image/unknown";

/// An attachment payload in one of the recognized encodings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// `data:<mime>;base64,<body>`
    DataUrl {
        /// Media type declared in the URL
        mime_type: String,
        /// Base64 body after the marker
        body: String,
    },
    /// Mapping with a base64 `bytes` field
    ByteContainer(String),
}

impl Payload {
    /// Classify a raw payload value
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::Decode` for a `data:` URL without a base64 marker
    /// and `InterceptError::UnrecognizedShape` for anything else that is not a
    /// data URL or byte container.
    pub fn parse(raw: &Value) -> Result<Self, InterceptError> {
        match raw {
            Value::String(s) if s.starts_with(DATA_URL_PREFIX) => Self::from_data_url(s),
            Value::String(_) => Err(InterceptError::UnrecognizedShape(
                "string payload is not a data URL".to_string(),
            )),
            Value::Object(map) => match map.get("bytes") {
                Some(Value::String(bytes)) => Ok(Self::ByteContainer(bytes.clone())),
                Some(other) => Err(InterceptError::UnrecognizedShape(format!(
                    "`bytes` field is {}",
                    json_kind(other)
                ))),
                None => Err(InterceptError::UnrecognizedShape(format!(
                    "mapping payload without `bytes` (keys: {:?})",
                    map.keys().collect::<Vec<_>>()
                ))),
            },
            other => Err(InterceptError::UnrecognizedShape(format!(
                "payload is {}",
                json_kind(other)
            ))),
        }
    }

    /// Split a `data:` URL into media type and base64 body
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::Decode` if the `;base64,` marker is missing.
    pub fn from_data_url(url: &str) -> Result<Self, InterceptError> {
        let Some((_, body)) = url.split_once(BASE64_MARKER) else {
            return Err(InterceptError::Decode(format!(
                "data URL without base64 marker ({} chars)",
                url.len()
            )));
        };
        Ok(Self::DataUrl {
            mime_type: data_url_mime(url).to_string(),
            body: body.to_string(),
        })
    }

    /// Media type declared by the payload itself, if any
    #[must_use]
    pub fn declared_mime(&self) -> Option<&str> {
        match self {
            Self::DataUrl { mime_type, .. } => Some(mime_type),
            Self::ByteContainer(_) => None,
        }
    }

    /// Length of the still-encoded body
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::DataUrl { body, .. } => body.len(),
            Self::ByteContainer(bytes) => bytes.len(),
        }
    }

    /// Decode the payload into raw bytes
    ///
    /// # Errors
    ///
    /// Returns `InterceptError::Decode` if the body is not valid base64.
    pub fn decode(&self) -> Result<Vec<u8>, InterceptError> {
        let encoded = match self {
            Self::DataUrl { body, .. } => body,
            Self::ByteContainer(bytes) => bytes,
        };
        Ok(BASE64.decode(encoded.trim())?)
    }
}

/// Media type of a data URL: text between `data:` and the first `;`
///
/// Falls back to `image/unknown` when there is no `;`.
#[must_use]
pub fn data_url_mime(url: &str) -> &str {
    let rest = url.strip_prefix(DATA_URL_PREFIX).unwrap_or(url);
    rest.split_once(';')
        .map_or(UNKNOWN_IMAGE_MIME, |(mime, _)| mime)
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}
