//! REST polling transport.
//!
//! `GET {base}/api/messages` returns every message the server still holds,
//! each with a monotonically increasing integer `id`. The pipeline drops the
//! ones already shown, so fetching the full list on every tick is fine.
//! `POST {base}/api/messages` publishes a draft; a successful POST wakes every
//! poll loop on this transport for an immediate extra fetch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::{parse_batch, BatchSink, Subscription, Transport};
use crate::error::TransportError;
use crate::message::{Draft, MessageRecord, OutgoingMessage};

/// Consecutive failed fetches before warnings escalate to errors.
const FAILURES_BEFORE_ERROR: u32 = 5;

/// Configuration for the polling transport.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Base URL of the chat API (e.g. `http://127.0.0.1:8787`).
    pub base_url: String,
    /// How often to fetch `/api/messages`.
    pub poll_interval: Duration,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Per-request read timeout.
    pub request_timeout: Duration,
}

impl PollConfig {
    /// Create a config with sensible defaults.
    ///
    /// - poll_interval: 3 s
    /// - connect_timeout: 3 s
    /// - request_timeout: 10 s
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn messages_url(&self) -> String {
        format!("{}/api/messages", self.base_url)
    }
}

struct PollInner {
    config: PollConfig,
    client: reqwest::Client,
    /// Bumped after each successful POST. Every poll loop holds its own
    /// receiver, so a POST made while a loop is mid-fetch is not lost.
    wake: watch::Sender<u64>,
}

/// Polls a REST endpoint for new messages. Use [`PollTransportBuilder`] for
/// construction.
#[derive(Clone)]
pub struct PollTransport {
    inner: Arc<PollInner>,
}

impl PollTransport {
    /// Start building a transport aimed at `base_url`.
    pub fn builder(base_url: impl Into<String>) -> PollTransportBuilder {
        PollTransportBuilder::new(base_url)
    }

    pub fn config(&self) -> &PollConfig {
        &self.inner.config
    }

    /// Fetch the server's current message list.
    ///
    /// Accepts both a bare JSON array and a `{ "messages": [...] }` wrapper.
    /// Individual records that fail to parse are skipped.
    ///
    /// # Returns
    /// - `Ok(batch)`: on a 2xx response with a parseable body.
    /// - `Err(TransportError::Connect)`: when the request could not be sent or
    ///   the body could not be read.
    /// - `Err(TransportError::Http)`: when the server replies with a non-2xx code.
    /// - `Err(TransportError::Json)`: when the body is not a record list.
    pub async fn fetch_batch(&self) -> Result<Vec<MessageRecord<u64>>, TransportError> {
        self.inner.fetch_batch().await
    }

    /// POST a draft to `/api/messages`.
    ///
    /// Only the tag-specific payload field is sent (`text` or `image`).
    pub async fn post(&self, sender: &str, draft: &Draft) -> Result<(), TransportError> {
        let url = self.inner.config.messages_url();
        let body = OutgoingMessage {
            sender,
            payload: &draft.payload,
        };
        let resp = self
            .inner
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(TransportError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        self.inner.wake.send_modify(|generation| *generation = generation.wrapping_add(1));
        Ok(())
    }
}

impl PollInner {
    async fn fetch_batch(&self) -> Result<Vec<MessageRecord<u64>>, TransportError> {
        let url = self.config.messages_url();
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(TransportError::Http {
                status: resp.status().as_u16(),
                url,
            });
        }

        let bytes = resp.bytes().await.map_err(|e| TransportError::Connect {
            url: url.clone(),
            detail: e.to_string(),
        })?;

        parse_batch(&bytes)
    }
}

/// Run the polling loop until the sink closes.
///
/// The first fetch happens immediately. Failures are soft: the loop skips
/// that tick and tries again at the next one (or on the next wake-up).
async fn run_poll_loop(inner: Arc<PollInner>, mut wake: watch::Receiver<u64>, sink: BatchSink<u64>) {
    let mut ticker = tokio::time::interval(inner.config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut consecutive_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.changed() => {}
        }

        match inner.fetch_batch().await {
            Ok(batch) => {
                consecutive_failures = 0;
                debug!(count = batch.len(), "fetched message list");
                if !sink.deliver(batch) {
                    debug!("batch sink closed, stopping poll loop");
                    return;
                }
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);

                if consecutive_failures >= FAILURES_BEFORE_ERROR {
                    error!(
                        error = %e,
                        url = %inner.config.base_url,
                        consecutive_failures,
                        "message poll failed repeatedly, will retry next tick"
                    );
                } else {
                    warn!(
                        error = %e,
                        url = %inner.config.base_url,
                        "message poll failed, will retry next tick"
                    );
                }
            }
        }

        if sink.is_closed() {
            return;
        }
    }
}

impl Transport for PollTransport {
    type Id = u64;

    fn subscribe(&self, sink: BatchSink<u64>) -> Subscription {
        let wake = self.inner.wake.subscribe();
        let task = tokio::spawn(run_poll_loop(Arc::clone(&self.inner), wake, sink.clone()));
        Subscription::new(&sink, vec![task])
    }

    async fn publish(
        &self,
        sender: &str,
        draft: &Draft,
    ) -> Result<Option<MessageRecord<u64>>, TransportError> {
        self.post(sender, draft).await?;
        Ok(None)
    }
}

/// Builder for [`PollTransport`].
///
/// # Example
/// ```rust,ignore
/// let transport = PollTransport::builder("http://127.0.0.1:8787")
///     .poll_interval(Duration::from_secs(3))
///     .build();
/// ```
pub struct PollTransportBuilder {
    config: PollConfig,
}

impl PollTransportBuilder {
    /// Create a builder targeting `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: PollConfig::new(base_url),
        }
    }

    /// Override the polling interval (default 3 s). Zero is raised to 1 ms.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Override the TCP connect timeout (default 3 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Override the per-request read timeout (default 10 s).
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Consume the builder and construct a [`PollTransport`].
    pub fn build(self) -> PollTransport {
        // A builder failure (e.g. no TLS backend) leaves the timeouts unset.
        let client = reqwest::Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .build()
            .unwrap_or_default();

        PollTransport {
            inner: Arc::new(PollInner {
                config: self.config,
                client,
                wake: watch::channel(0).0,
            }),
        }
    }
}
