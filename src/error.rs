//! Crate-level error types.
//!
//! [`TransportError`] covers everything that can go wrong between the client
//! and whatever supplies messages. [`ChatError`] is what session and
//! configuration code returns to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a transport while fetching, publishing or subscribing.
///
/// Each variant carries enough context to diagnose the failure without
/// needing to inspect the originating error directly.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote server replied with a non-2xx HTTP status code.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },
    /// A response body or frame could not be parsed as the expected JSON shape.
    #[error("JSON parse error on field '{field}': {detail}")]
    Json { field: String, detail: String },
    /// A TCP-level connection could not be established.
    #[error("Connection failed to {url}: {detail}")]
    Connect { url: String, detail: String },
    /// WebSocket protocol failure after the connection was up.
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    /// The transport is not connected (or has been torn down).
    #[error("transport is closed")]
    Closed,
}

/// Errors surfaced by sessions, identity storage and configuration.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("identity store: {0}")]
    Identity(#[from] rusqlite::Error),
    #[error("config {}: {detail}", path.display())]
    Config { path: PathBuf, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("display name must not be empty")]
    InvalidName,
    #[error("message is empty")]
    EmptyMessage,
    #[error("no display name: pass --name or set one in a previous session")]
    NoIdentity,
}

pub type Result<T> = std::result::Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display_http() {
        let err = TransportError::Http {
            status: 503,
            url: "http://localhost:8787/api/messages".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("503"), "expected status in display: {s}");
        assert!(s.contains("/api/messages"), "expected url: {s}");
    }

    #[test]
    fn transport_error_display_json() {
        let err = TransportError::Json {
            field: "messages".to_string(),
            detail: "expected an array".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("messages"), "field in display: {s}");
        assert!(s.contains("expected an array"), "detail in display: {s}");
    }

    #[test]
    fn transport_error_display_connect() {
        let err = TransportError::Connect {
            url: "ws://localhost:8787/subscribe".to_string(),
            detail: "connection refused".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("ws://localhost:8787/subscribe"), "url in display: {s}");
        assert!(s.contains("connection refused"), "detail in display: {s}");
    }

    #[test]
    fn chat_error_wraps_transport_transparently() {
        let err: ChatError = TransportError::Closed.into();
        assert_eq!(err.to_string(), "transport is closed");
        assert!(matches!(err, ChatError::Transport(TransportError::Closed)));
    }

    #[test]
    fn chat_error_config_names_path() {
        let err = ChatError::Config {
            path: PathBuf::from("/tmp/chatline.toml"),
            detail: "unknown field".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("/tmp/chatline.toml"), "{s}");
        assert!(s.contains("unknown field"), "{s}");
    }

    #[test]
    fn chat_error_is_std_error() {
        fn assert_error<E: std::error::Error + Send + Sync + 'static>(_: &E) {}
        assert_error(&ChatError::InvalidName);
        assert_error(&TransportError::Closed);
    }
}
