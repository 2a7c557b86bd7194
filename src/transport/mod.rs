//! # Transports
//!
//! Everything that moves messages between this client and other people.
//!
//! | Transport | Id type | Delivery |
//! |---|---|---|
//! | [`poll::PollTransport`] | `u64` server sequence | timer-driven `GET /api/messages` |
//! | [`broadcast::BroadcastTransport`] | [`broadcast::BroadcastId`] | in-process fan-out |
//! | [`push::PushTransport`] | [`push::PushId`] | WebSocket subscription |
//!
//! Each transport owns its id space. Ids from different transports are
//! different types and cannot be compared.
//!
//! All of them hand batches to the session through a [`BatchSink`], so one
//! ingestion routine serves every transport.

pub mod broadcast;
pub mod poll;
pub mod push;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::TransportError;
use crate::message::{Draft, MessageRecord};

/// A source and destination of chat messages.
pub trait Transport: Send + Sync + 'static {
    type Id: Ord + Clone + fmt::Debug + Send + Sync + 'static;

    /// Start delivering batches into `sink` until the returned
    /// [`Subscription`] is torn down.
    fn subscribe(&self, sink: BatchSink<Self::Id>) -> Subscription;

    /// Publish a draft authored by `sender`.
    ///
    /// Returns `Some(record)` when the transport mints the id locally and the
    /// caller should show the message right away, `None` when the message
    /// will come back through the subscription.
    fn publish(
        &self,
        sender: &str,
        draft: &Draft,
    ) -> impl Future<Output = Result<Option<MessageRecord<Self::Id>>, TransportError>> + Send;
}

/// Receiving half of a batch channel, owned by the session loop.
pub type BatchReceiver<I> = mpsc::UnboundedReceiver<Vec<MessageRecord<I>>>;

/// Sending half handed to a transport. Stops accepting batches once the
/// owning [`Subscription`] is torn down.
#[derive(Debug)]
pub struct BatchSink<I> {
    tx: mpsc::UnboundedSender<Vec<MessageRecord<I>>>,
    closed: Arc<AtomicBool>,
}

impl<I> Clone for BatchSink<I> {
    fn clone(&self) -> Self {
        BatchSink {
            tx: self.tx.clone(),
            closed: Arc::clone(&self.closed),
        }
    }
}

/// Create a connected sink/receiver pair.
pub fn batch_channel<I>() -> (BatchSink<I>, BatchReceiver<I>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        BatchSink {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        },
        rx,
    )
}

impl<I> BatchSink<I> {
    /// Hand a batch to the session. Empty batches are skipped.
    ///
    /// Returns `false` once the subscription is torn down or the receiver is
    /// gone; transports stop their drivers when that happens.
    pub fn deliver(&self, batch: Vec<MessageRecord<I>>) -> bool {
        if self.is_closed() {
            return false;
        }
        if batch.is_empty() {
            return true;
        }
        self.tx.send(batch).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }
}

/// Handle to a running subscription. Teardown happens exactly once, either
/// through [`Subscription::unsubscribe`] or on drop.
#[derive(Debug)]
pub struct Subscription {
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn new<I>(sink: &BatchSink<I>, tasks: Vec<JoinHandle<()>>) -> Self {
        Subscription {
            closed: Arc::clone(&sink.closed),
            tasks,
        }
    }

    /// Stop delivery and abort the driver tasks. Returns `true` only for the
    /// call that actually tore the subscription down.
    pub fn unsubscribe(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for task in &self.tasks {
            task.abort();
        }
        true
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Decode a list of JSON records, skipping (and logging) the ones that do
/// not parse.
pub fn parse_records<I: DeserializeOwned>(items: Vec<serde_json::Value>) -> Vec<MessageRecord<I>> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!(index, error = %e, "skipping malformed message record");
                None
            }
        })
        .collect()
}

/// Accept either a bare JSON array of records or `{"messages": [...]}`.
pub fn parse_batch<I: DeserializeOwned>(bytes: &[u8]) -> Result<Vec<MessageRecord<I>>, TransportError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| TransportError::Json {
            field: "body".into(),
            detail: e.to_string(),
        })?;
    match value {
        serde_json::Value::Array(items) => Ok(parse_records(items)),
        serde_json::Value::Object(mut map) => match map.remove("messages") {
            Some(serde_json::Value::Array(items)) => Ok(parse_records(items)),
            _ => Err(TransportError::Json {
                field: "messages".into(),
                detail: "expected an array".into(),
            }),
        },
        _ => Err(TransportError::Json {
            field: "body".into(),
            detail: "expected an array or an object".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_batch_bare_array() {
        let body = br#"[{"id": 1, "sender": "a", "type": "text", "text": "x"}]"#;
        let batch: Vec<MessageRecord<u64>> = parse_batch(body).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_parse_batch_wrapped_array() {
        let body = br#"{"messages": [{"id": 1, "sender": "a", "type": "text", "text": "x"}]}"#;
        let batch: Vec<MessageRecord<u64>> = parse_batch(body).unwrap();
        assert_eq!(batch[0].id, 1);
    }

    #[test]
    fn test_parse_batch_skips_malformed_entries() {
        let body = br#"[
            {"id": 1, "sender": "a", "type": "text", "text": "ok"},
            {"sender": "no id", "type": "text"},
            {"id": 3, "sender": "a", "type": "hologram"},
            {"id": 4, "sender": "a", "type": "image", "image": "data:,x"},
            {"id": 5, "sender": "a", "type": "text", "text": "ok", "image": null},
            {"id": 6, "sender": "a", "type": "text", "text": null},
            {"id": 7, "sender": "a", "type": "image", "image": null}
        ]"#;
        let batch: Vec<MessageRecord<u64>> = parse_batch(body).unwrap();
        let ids: Vec<u64> = batch.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 4, 5, 6, 7]);
        assert_eq!(batch[3].payload.as_text(), Some(""));
        assert_eq!(batch[4].payload, crate::message::Payload::image(""));
    }

    #[test]
    fn test_parse_batch_rejects_scalar_body() {
        let err = parse_batch::<u64>(b"42").unwrap_err();
        assert!(matches!(err, TransportError::Json { .. }));
    }

    #[test]
    fn test_parse_batch_rejects_invalid_json() {
        let err = parse_batch::<u64>(b"<html>").unwrap_err();
        assert!(err.to_string().contains("body"));
    }

    #[tokio::test]
    async fn test_sink_skips_empty_batches() {
        let (sink, mut rx) = batch_channel::<u64>();
        assert!(sink.deliver(Vec::new()));
        assert!(sink.deliver(vec![MessageRecord::text(1, "a", "x")]));
        assert_eq!(rx.recv().await.unwrap().len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_closes_sink() {
        let (sink, _rx) = batch_channel::<u64>();
        let task = tokio::spawn(std::future::pending::<()>());
        let sub = Subscription::new(&sink, vec![task]);
        assert!(sub.is_active());
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(!sub.is_active());
        assert!(!sink.deliver(vec![MessageRecord::text(1, "a", "x")]));
    }

    #[tokio::test]
    async fn test_drop_tears_down() {
        let (sink, _rx) = batch_channel::<u64>();
        let sub = Subscription::new(&sink, Vec::new());
        drop(sub);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_sink_reports_dropped_receiver() {
        let (sink, rx) = batch_channel::<u64>();
        drop(rx);
        assert!(!sink.deliver(vec![MessageRecord::text(1, "a", "x")]));
    }
}
