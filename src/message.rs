//! Message records, payloads and the helpers around their wire shape.
//!
//! A record on the wire looks like
//!
//! ```json
//! {"id": 7, "sender": "alice", "type": "text", "text": "hi", "timestamp": 1718000000000}
//! {"id": 8, "sender": "bob", "type": "image", "image": "data:image/png;base64,iVBO..."}
//! ```
//!
//! The `id` shape depends on the transport; see [`crate::transport`].

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Message body, tagged by `type` on the wire.
///
/// A missing or `null` `text` / `image` field decodes to an empty string
/// rather than failing the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Text {
        #[serde(default, deserialize_with = "null_as_empty")]
        text: String,
    },
    Image {
        /// A `data:` URI.
        #[serde(default, deserialize_with = "null_as_empty")]
        image: String,
    },
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text { text: text.into() }
    }

    pub fn image(data_uri: impl Into<String>) -> Self {
        Payload::Image { image: data_uri.into() }
    }

    /// The message text, or `None` for an image.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text { text } => Some(text),
            Payload::Image { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text { .. } => "text",
            Payload::Image { .. } => "image",
        }
    }
}

/// One chat message as delivered by a transport.
///
/// `I` is the transport's id type. The pipeline only ever compares ids, so any
/// `Ord` type works.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord<I> {
    pub id: I,
    pub sender: String,
    #[serde(flatten)]
    pub payload: Payload,
    /// Display time in Unix epoch milliseconds. `None` until the pipeline
    /// stamps it, or for records the server has not timestamped yet.
    #[serde(
        rename = "timestamp",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp_ms: Option<u64>,
}

impl<I> MessageRecord<I> {
    pub fn new(id: I, sender: impl Into<String>, payload: Payload) -> Self {
        MessageRecord {
            id,
            sender: sender.into(),
            payload,
            timestamp_ms: None,
        }
    }

    pub fn text(id: I, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, sender, Payload::text(text))
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }
}

/// A locally authored message that has no id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub payload: Payload,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Draft { payload: Payload::text(text) }
    }

    pub fn image(data_uri: impl Into<String>) -> Self {
        Draft { payload: Payload::image(data_uri) }
    }

    /// True for a text draft that is blank after trimming.
    pub fn is_blank(&self) -> bool {
        matches!(&self.payload, Payload::Text { text } if text.trim().is_empty())
    }
}

/// Request body for publishing a draft: `{"sender": .., "type": .., "text"|"image": ..}`.
#[derive(Debug, Serialize)]
pub struct OutgoingMessage<'a> {
    pub sender: &'a str,
    #[serde(flatten)]
    pub payload: &'a Payload,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(u64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

/// Accepts epoch milliseconds, an RFC 3339 string, or an SQL
/// `YYYY-MM-DD HH:MM:SS` string (UTC). Anything else becomes `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
    Ok(match raw {
        Some(RawTimestamp::Millis(ms)) => Some(ms),
        Some(RawTimestamp::Float(f)) if f.is_finite() && f >= 0.0 => Some(f as u64),
        Some(RawTimestamp::Text(s)) => parse_timestamp(&s),
        _ => None,
    })
}

/// Parse a textual timestamp into epoch milliseconds.
pub fn parse_timestamp(s: &str) -> Option<u64> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Some(ms);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return u64::try_from(dt.timestamp_millis()).ok();
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .and_then(|dt| u64::try_from(dt.and_utc().timestamp_millis()).ok())
}

// ---------------------------------------------------------------------------
// Data URIs
// ---------------------------------------------------------------------------

/// Encode raw bytes as a base64 `data:` URI.
pub fn encode_data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Guess an image MIME type from a file extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// The parts of a `data:` URI the renderer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUriInfo {
    pub mime: String,
    /// Decoded payload size in bytes.
    pub size: usize,
}

/// Inspect a `data:` URI. Returns `None` if it is not one, or if a base64
/// body fails to decode.
pub fn inspect_data_uri(uri: &str) -> Option<DataUriInfo> {
    let rest = uri.strip_prefix("data:")?;
    let (meta, body) = rest.split_once(',')?;
    let (mime, is_base64) = match meta.strip_suffix(";base64") {
        Some(m) => (m, true),
        None => (meta, false),
    };
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    let size = if is_base64 {
        STANDARD.decode(body.trim()).ok()?.len()
    } else {
        body.len()
    };
    Some(DataUriInfo { mime: mime.to_string(), size })
}
