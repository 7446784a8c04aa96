//! `data:` URI handling for inline images.
//!
//! Images are stored on messages as `data:<mime>;base64,<payload>` strings
//! and re-projected into inline request parts when replaying history.

use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;

use crate::error::{ChatError, ChatResult};

/// MIME type assumed when a stored URI does not name an image type
pub const FALLBACK_IMAGE_MIME: &str = "image/jpeg";

fn image_mime_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^data:(image/[^;,]+);").ok())
        .as_ref()
}

/// A decoded view over a `data:` URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime_type: String,
    /// Base64 payload, still encoded
    pub data: String,
}

impl DataUri {
    /// Split a stored URI into MIME type and base64 payload.
    ///
    /// Unknown or missing image types fall back to [`FALLBACK_IMAGE_MIME`];
    /// a URI without a payload is rejected.
    pub fn parse(uri: &str) -> ChatResult<Self> {
        if !uri.starts_with("data:") {
            return Err(ChatError::InvalidDataUri(truncate(uri)));
        }
        let data = match uri.split_once(',') {
            Some((_, payload)) if !payload.is_empty() => payload.to_string(),
            _ => return Err(ChatError::InvalidDataUri(truncate(uri))),
        };
        let mime_type = image_mime_pattern()
            .and_then(|pattern| pattern.captures(uri))
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());

        Ok(Self { mime_type, data })
    }

    /// Build a URI from an already base64-encoded payload.
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Encode raw bytes (e.g. a picked image file).
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, STANDARD.encode(bytes))
    }

    /// Decode the payload back to bytes.
    pub fn decode(&self) -> ChatResult<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| ChatError::InvalidDataUri(e.to_string()))
    }
}

impl std::fmt::Display for DataUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Guess an image MIME type from a file extension.
pub fn mime_from_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

/// File extension for an image MIME type, `bin` when unknown.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/heic" => "heic",
        _ => "bin",
    }
}

fn truncate(uri: &str) -> String {
    uri.chars().take(32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_png() {
        assert!(image_mime_pattern().is_some());
        let uri = DataUri::parse("data:image/png;base64,iVBORw0KGgo=").unwrap();
        assert_eq!(uri.mime_type, "image/png");
        assert_eq!(uri.data, "iVBORw0KGgo=");
    }

    #[test]
    fn test_parse_falls_back_to_jpeg() {
        let uri = DataUri::parse("data:application/octet-stream;base64,AAAA").unwrap();
        assert_eq!(uri.mime_type, FALLBACK_IMAGE_MIME);
        assert_eq!(uri.data, "AAAA");
    }

    #[test]
    fn test_parse_rejects_non_data_uris() {
        assert!(DataUri::parse("https://example.com/cat.png").is_err());
        assert!(DataUri::parse("data:image/png;base64,").is_err());
        assert!(DataUri::parse("data:image/png;base64").is_err());
    }

    #[test]
    fn test_from_bytes_display_and_decode() {
        let uri = DataUri::from_bytes("image/gif", b"GIF89a");
        let text = uri.to_string();
        assert!(text.starts_with("data:image/gif;base64,"));

        let parsed = DataUri::parse(&text).unwrap();
        assert_eq!(parsed.decode().unwrap(), b"GIF89a");
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension("PNG"), Some("image/png"));
        assert_eq!(mime_from_extension("jpeg"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("txt"), None);
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("application/octet-stream"), "bin");
    }
}
