//! In-process broadcast transport.
//!
//! ## Design
//! - BroadcastHub: a `tokio::sync::broadcast` channel shared by every attached session
//! - Each attached transport has a random origin id; a publish is redelivered to
//!   every *other* attached transport, never back to its author
//! - Ids are minted locally by the hub's [`IdMinter`], so the author shows its own
//!   message immediately (the transport returns the minted record from `publish`)
//!
//! ## Id scheme
//! [`BroadcastId`] is `(millis, seq)`: wall-clock milliseconds plus a counter
//! that restarts on every new millisecond. Two messages sent inside the same
//! millisecond get distinct, ordered ids, and the millisecond component never
//! runs backwards even if the wall clock does.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::{BatchSink, Subscription, Transport};
use crate::error::TransportError;
use crate::message::{now_ms, Draft, MessageRecord};

/// Messages in flight per hub before slow receivers start lagging.
pub const HUB_CHANNEL_CAP: usize = 256;

/// Ordered id for broadcast messages. Orders by `millis`, then `seq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BroadcastId {
    pub millis: u64,
    pub seq: u32,
}

impl fmt::Display for BroadcastId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

/// Hands out strictly increasing [`BroadcastId`]s.
#[derive(Debug, Default)]
pub struct IdMinter {
    last: Mutex<Option<BroadcastId>>,
}

impl IdMinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self) -> BroadcastId {
        self.mint_at(now_ms())
    }

    /// Mint an id for wall-clock time `now`.
    pub fn mint_at(&self, now: u64) -> BroadcastId {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let next = match *last {
            Some(prev) if now <= prev.millis => {
                if prev.seq == u32::MAX {
                    BroadcastId { millis: prev.millis + 1, seq: 0 }
                } else {
                    BroadcastId { millis: prev.millis, seq: prev.seq + 1 }
                }
            }
            _ => BroadcastId { millis: now, seq: 0 },
        };
        *last = Some(next);
        next
    }
}

/// One published message plus the origin that must not see it again.
#[derive(Debug, Clone)]
struct Envelope {
    origin: String,
    record: MessageRecord<BroadcastId>,
}

/// Shared fan-out point. Cloning a hub gives another handle to the same channel.
#[derive(Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Envelope>,
    minter: Arc<IdMinter>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::with_capacity(HUB_CHANNEL_CAP)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        BroadcastHub {
            tx,
            minter: Arc::new(IdMinter::new()),
        }
    }

    /// Attach a new participant with a fresh origin id.
    pub fn attach(&self) -> BroadcastTransport {
        BroadcastTransport {
            origin: uuid::Uuid::new_v4().to_string(),
            hub: self.clone(),
        }
    }

    /// Number of live subscriptions on this hub.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One participant's view of a [`BroadcastHub`].
#[derive(Clone)]
pub struct BroadcastTransport {
    origin: String,
    hub: BroadcastHub,
}

impl BroadcastTransport {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Mint an id, stamp the record, and fan it out. Fire-and-forget: having
    /// no listeners is not an error.
    pub fn publish_now(&self, sender: &str, draft: &Draft) -> MessageRecord<BroadcastId> {
        let id = self.hub.minter.mint();
        let record = MessageRecord::new(id, sender, draft.payload.clone()).with_timestamp(id.millis);
        let envelope = Envelope {
            origin: self.origin.clone(),
            record: record.clone(),
        };
        if self.hub.tx.send(envelope).is_err() {
            debug!(id = %id, "broadcast had no listeners");
        }
        record
    }
}

async fn forward(origin: String, rx: broadcast::Receiver<Envelope>, sink: BatchSink<BroadcastId>) {
    let mut stream = BroadcastStream::new(rx);
    while let Some(item) = stream.next().await {
        match item {
            Ok(envelope) if envelope.origin == origin => {}
            Ok(envelope) => {
                if !sink.deliver(vec![envelope.record]) {
                    debug!("batch sink closed, stopping broadcast forwarder");
                    return;
                }
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "broadcast receiver lagged, messages were dropped");
            }
        }
    }
}

impl Transport for BroadcastTransport {
    type Id = BroadcastId;

    fn subscribe(&self, sink: BatchSink<BroadcastId>) -> Subscription {
        // Subscribe before returning so nothing published afterwards is missed.
        let rx = self.hub.tx.subscribe();
        let task = tokio::spawn(forward(self.origin.clone(), rx, sink.clone()));
        Subscription::new(&sink, vec![task])
    }

    async fn publish(
        &self,
        sender: &str,
        draft: &Draft,
    ) -> Result<Option<MessageRecord<BroadcastId>>, TransportError> {
        Ok(Some(self.publish_now(sender, draft)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
