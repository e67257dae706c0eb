use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Mime type assumed when a data URL carries no recognised image prefix.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

const DATA_URL_SUBTYPES: &[&str] = &["png", "jpeg", "jpg", "webp"];

/// Encoded image payload plus its mime type.
///
/// The bytes are shared, so clones are cheap and a buffer never changes after
/// it is built. History steps, variation candidates and swap assets all hold
/// these.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    bytes: Arc<[u8]>,
    mime_type: Arc<str>,
}

impl ImageBuffer {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let mime_type: String = mime_type.into();
        Self {
            bytes: Arc::from(bytes),
            mime_type: Arc::from(mime_type),
        }
    }

    /// Parses `data:image/<subtype>;base64,<payload>`.
    ///
    /// Without a recognised prefix the whole string is decoded as base64 and
    /// the mime type falls back to [`DEFAULT_MIME_TYPE`].
    pub fn from_data_url(url: &str) -> anyhow::Result<Self> {
        let trimmed = url.trim();
        let (mime_type, payload) = split_data_url(trimmed)
            .map(|(subtype, payload)| (format!("image/{subtype}"), payload))
            .unwrap_or_else(|| (DEFAULT_MIME_TYPE.to_string(), trimmed));
        let bytes = BASE64
            .decode(payload.as_bytes())
            .context("image data URL base64 decode failed")?;
        Ok(Self::new(bytes, mime_type))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Hex sha256 of the payload bytes.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    /// File extension matching the mime type, `png` when unknown.
    pub fn extension(&self) -> &'static str {
        let lowered = self.mime_type.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        if lowered.contains("gif") {
            return "gif";
        }
        "png"
    }
}

impl fmt::Debug for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBuffer")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Mime type for a file extension, compared case-insensitively.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    match extension.trim().to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:image/")?;
    let (subtype, payload) = rest.split_once(";base64,")?;
    if !DATA_URL_SUBTYPES.contains(&subtype) {
        return None;
    }
    Some((subtype, payload))
}
