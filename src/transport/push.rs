//! WebSocket push transport for a hosted real-time message store.
//!
//! Server → client frames carry either a batch or a single record:
//!
//! ```json
//! {"messages": [{"id": {"server_ms": 1718000000000, "key": "-Nx1"}, "sender": "bob", "type": "text", "text": "hi"}]}
//! {"id": {"server_ms": 1718000000001, "key": "-Nx2"}, "sender": "bob", "type": "text", "text": "again"}
//! ```
//!
//! Client → server frames add a message:
//!
//! ```json
//! {"op": "add", "message": {"sender": "alice", "type": "text", "text": "hello"}}
//! ```
//!
//! Added messages come back through the subscription with a server-assigned
//! id; `publish` never mints ids itself.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use super::{parse_records, BatchSink, Subscription, Transport};
use crate::error::TransportError;
use crate::message::{Draft, MessageRecord, OutgoingMessage};

/// Server-assigned id: server timestamp first, then the store's push key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PushId {
    pub server_ms: u64,
    pub key: String,
}

impl PushId {
    pub fn new(server_ms: u64, key: impl Into<String>) -> Self {
        PushId { server_ms, key: key.into() }
    }
}

impl fmt::Display for PushId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.server_ms)
    }
}

#[derive(Debug, Clone)]
pub struct PushConfig {
    /// WebSocket URL of the subscription endpoint.
    pub url: String,
    /// Base delay before reconnecting after the socket drops.
    pub reconnect_delay: Duration,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
}

impl PushConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(3),
        }
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct AddFrame<'a> {
    op: &'static str,
    message: OutgoingMessage<'a>,
}

type Outbox = Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>;

/// Subscribes to a WebSocket feed and publishes through the same socket.
#[derive(Clone)]
pub struct PushTransport {
    config: PushConfig,
    /// Writer for the live connection; `None` while disconnected.
    outbox: Outbox,
}

impl PushTransport {
    pub fn new(config: PushConfig) -> Self {
        PushTransport {
            config,
            outbox: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.outbox
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|tx| !tx.is_closed()))
            .unwrap_or(false)
    }

    fn queue(&self, frame: String) -> Result<(), TransportError> {
        let guard = self.outbox.lock().map_err(|_| TransportError::Closed)?;
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

/// Decode one server frame into a batch.
pub fn parse_frame(text: &str) -> Result<Vec<MessageRecord<PushId>>, TransportError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| TransportError::Json {
        field: "frame".into(),
        detail: e.to_string(),
    })?;
    match value {
        serde_json::Value::Object(mut map) => {
            if let Some(messages) = map.remove("messages") {
                return match messages {
                    serde_json::Value::Array(items) => Ok(parse_records(items)),
                    _ => Err(TransportError::Json {
                        field: "messages".into(),
                        detail: "expected an array".into(),
                    }),
                };
            }
            serde_json::from_value(serde_json::Value::Object(map))
                .map(|rec| vec![rec])
                .map_err(|e| TransportError::Json {
                    field: "message".into(),
                    detail: e.to_string(),
                })
        }
        _ => Err(TransportError::Json {
            field: "frame".into(),
            detail: "expected an object".into(),
        }),
    }
}

fn jittered(base: Duration) -> Duration {
    let max_jitter = u64::try_from(base.as_millis()).unwrap_or(u64::MAX) / 4;
    if max_jitter == 0 {
        return base;
    }
    base.saturating_add(Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter)))
}

/// Keep one connection alive, forwarding frames into `sink`, reconnecting
/// after a drop until the sink closes.
async fn run_push_loop(config: PushConfig, outbox: Outbox, sink: BatchSink<PushId>) {
    loop {
        let connect = tokio_tungstenite::connect_async(config.url.as_str());
        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok((ws, _response))) => {
                info!(url = %config.url, "push subscription connected");
                let keep_going = pump(ws, &outbox, &sink).await;
                if let Ok(mut guard) = outbox.lock() {
                    *guard = None;
                }
                if !keep_going {
                    return;
                }
                warn!(url = %config.url, "push subscription dropped, reconnecting");
            }
            Ok(Err(e)) => {
                let err = TransportError::Connect {
                    url: config.url.clone(),
                    detail: e.to_string(),
                };
                warn!(error = %err, "push connect failed, will retry");
            }
            Err(_) => {
                warn!(url = %config.url, timeout = ?config.connect_timeout, "push connect timed out, will retry");
            }
        }

        if sink.is_closed() {
            return;
        }
        tokio::time::sleep(jittered(config.reconnect_delay)).await;
    }
}

/// Drive one connected socket. Returns `false` when the sink is closed and
/// the subscription should end for good.
async fn pump<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    outbox: &Outbox,
    sink: &BatchSink<PushId>,
) -> bool
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    if let Ok(mut guard) = outbox.lock() {
        *guard = Some(out_tx);
    }

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match parse_frame(&text) {
                    Ok(batch) => {
                        if !sink.deliver(batch) {
                            debug!("batch sink closed, stopping push subscription");
                            let _ = write.send(WsMessage::Close(None)).await;
                            return false;
                        }
                    }
                    Err(e) => warn!(error = %e, "dropping unparseable push frame"),
                },
                Some(Ok(WsMessage::Close(_))) | None => return true,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %TransportError::WebSocket(e.to_string()), "push socket error");
                    return true;
                }
            },
            out = out_rx.recv() => match out {
                Some(text) => {
                    if let Err(e) = write.send(WsMessage::Text(text)).await {
                        warn!(error = %TransportError::WebSocket(e.to_string()), "push write failed");
                        return true;
                    }
                }
                None => return true,
            },
        }
    }
}

impl Transport for PushTransport {
    type Id = PushId;

    fn subscribe(&self, sink: BatchSink<PushId>) -> Subscription {
        let task = tokio::spawn(run_push_loop(
            self.config.clone(),
            Arc::clone(&self.outbox),
            sink.clone(),
        ));
        Subscription::new(&sink, vec![task])
    }

    async fn publish(
        &self,
        sender: &str,
        draft: &Draft,
    ) -> Result<Option<MessageRecord<PushId>>, TransportError> {
        let frame = AddFrame {
            op: "add",
            message: OutgoingMessage {
                sender,
                payload: &draft.payload,
            },
        };
        let text = serde_json::to_string(&frame).map_err(|e| TransportError::Json {
            field: "message".into(),
            detail: e.to_string(),
        })?;
        self.queue(text)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_id_orders_by_time_then_key() {
        let a = PushId::new(100, "zzz");
        let b = PushId::new(101, "aaa");
        let c = PushId::new(101, "bbb");
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_parse_frame_batch() {
        let text = r#"{"messages": [
            {"id": {"server_ms": 2, "key": "b"}, "sender": "bob", "type": "text", "text": "x"},
            {"id": {"server_ms": 1, "key": "a"}, "sender": "bob", "type": "text", "text": "y"}
        ]}"#;
        let batch = parse_frame(text).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].id, PushId::new(1, "a"));
    }

    #[test]
    fn test_parse_frame_single_record() {
        let text = r#"{"id": {"server_ms": 5, "key": "k"}, "sender": "bob", "type": "image", "image": "data:,x", "timestamp": null}"#;
        let batch = parse_frame(text).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].timestamp_ms, None);
    }

    #[test]
    fn test_parse_frame_rejects_garbage() {
        assert!(parse_frame("[1,2]").is_err());
        assert!(parse_frame("nope").is_err());
        assert!(parse_frame(r#"{"messages": 3}"#).is_err());
        assert!(parse_frame(r#"{"sender": "no id"}"#).is_err());
    }

    #[test]
    fn test_add_frame_shape() {
        let payload = crate::message::Payload::text("hello");
        let frame = AddFrame {
            op: "add",
            message: OutgoingMessage { sender: "alice", payload: &payload },
        };
        let v = serde_json::to_value(&frame).unwrap();
        assert_eq!(v["op"], "add");
        assert_eq!(v["message"]["sender"], "alice");
        assert_eq!(v["message"]["text"], "hello");
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let base = Duration::from_millis(400);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d >= base && d <= Duration::from_millis(500), "{d:?}");
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_jitter_saturates_on_huge_delay() {
        assert_eq!(jittered(Duration::MAX), Duration::MAX);
        let wide = Duration::from_millis(u64::MAX);
        assert!(jittered(wide) >= wide);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_is_closed() {
        let t = PushTransport::new(PushConfig::new("ws://127.0.0.1:9/subscribe"));
        assert!(!t.is_connected());
        let err = t.publish("alice", &Draft::text("hi")).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
