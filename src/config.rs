//! TOML configuration, overridable from the command line.
//!
//! ```toml
//! transport = "push"
//! base_url = "http://127.0.0.1:8787"
//! push_url = "ws://127.0.0.1:8787/subscribe"
//! poll_interval_ms = 3000
//! identity_db = "~/.chatline.db"
//! log_filter = "chatline=debug"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;
use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Poll,
    Broadcast,
    Push,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Poll => write!(f, "poll"),
            TransportKind::Broadcast => write!(f, "broadcast"),
            TransportKind::Push => write!(f, "push"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    pub transport: TransportKind,
    /// Base URL for the REST polling transport.
    pub base_url: String,
    /// WebSocket URL for the push transport.
    pub push_url: String,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
    /// SQLite file for name and theme. In-memory when absent.
    pub identity_db: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Poll,
            base_url: "http://127.0.0.1:8787".to_string(),
            push_url: "ws://127.0.0.1:8787/subscribe".to_string(),
            poll_interval_ms: 3_000,
            connect_timeout_ms: 3_000,
            request_timeout_ms: 10_000,
            reconnect_delay_ms: 2_000,
            identity_db: None,
            log_filter: "info".to_string(),
        }
    }
}

impl ChatConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|e| ChatError::Config {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Command-line flags win over file values.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(kind) = args.transport {
            self.transport = kind;
        }
        if let Some(url) = &args.url {
            self.base_url = url.clone();
        }
        if let Some(url) = &args.push_url {
            self.push_url = url.clone();
        }
        if let Some(ms) = args.interval_ms {
            self.poll_interval_ms = ms;
        }
        if let Some(db) = &args.identity_db {
            self.identity_db = Some(db.clone());
        }
        if let Some(filter) = &args.log {
            self.log_filter = filter.clone();
        }
    }

    /// Reject values the transports cannot run with.
    pub fn validate(&self, path: &Path) -> Result<()> {
        let fail = |detail: &str| -> Result<()> {
            Err(ChatError::Config {
                path: path.to_path_buf(),
                detail: detail.to_string(),
            })
        };
        if self.poll_interval_ms == 0 {
            return fail("poll_interval_ms must be greater than zero");
        }
        if self.transport == TransportKind::Poll && !self.base_url.starts_with("http") {
            return fail("base_url must be an http:// or https:// URL");
        }
        if self.transport == TransportKind::Push && !self.push_url.starts_with("ws") {
            return fail("push_url must be a ws:// or wss:// URL");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
