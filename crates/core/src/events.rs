//! Diagnostic event log and the typed session-event fan-out.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tracing::trace;

use crate::conversation::ItemSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Client,
    Server,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Client => f.write_str("client"),
            Direction::Server => f.write_str("server"),
        }
    }
}

/// One aggregated log entry. Consecutive messages with the same direction and
/// type collapse into a single entry with a bumped `count`, so audio-delta
/// storms do not grow the log unboundedly.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub at: SystemTime,
    pub direction: Direction,
    pub event_type: String,
    pub payload: Value,
    pub count: u32,
}

/// Bounded, aggregating protocol log.
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    snapshot: Option<Arc<Vec<LogEntry>>>,
}

/// Enough for a long session; beyond it the oldest entries fall off.
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            snapshot: None,
        }
    }

    pub fn push(&mut self, direction: Direction, event_type: &str, payload: Value) {
        if let Some(last) = self.entries.back_mut()
            && last.direction == direction
            && last.event_type == event_type
        {
            last.count += 1;
            last.payload = payload;
            last.at = SystemTime::now();
        } else {
            self.entries.push_back(LogEntry {
                at: SystemTime::now(),
                direction,
                event_type: event_type.to_string(),
                payload,
                count: 1,
            });
            if self.entries.len() > self.capacity {
                self.entries.pop_front();
            }
        }
        self.snapshot = None;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.snapshot = None;
    }

    /// Snapshot whose `Arc` identity changes only when the log content does,
    /// so the view can skip re-rendering an unchanged list.
    pub fn snapshot(&mut self) -> Arc<Vec<LogEntry>> {
        if let Some(snapshot) = &self.snapshot {
            return snapshot.clone();
        }
        let snapshot = Arc::new(self.entries.iter().cloned().collect::<Vec<_>>());
        self.snapshot = Some(snapshot.clone());
        snapshot
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

/// Lifecycle notifications delivered to subscribers, in emission order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Every inbound/outbound protocol message, for logging surfaces.
    Realtime {
        direction: Direction,
        event_type: String,
        payload: Value,
    },
    Error {
        message: String,
    },
    ConversationInterrupted,
    /// An item's content changed; carries the changed item and any freshly
    /// decoded audio delta.
    ConversationUpdated {
        item: ItemSnapshot,
        audio_delta: Option<Vec<i16>>,
    },
}

/// Subscription handle; pass back to [`EventDispatcher::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Typed publish/subscribe with explicit unsubscribe. Unbounded channels keep
/// the ordering guarantee: no subscriber ever observes reordered or dropped
/// `ConversationUpdated` events.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: std::sync::Mutex<Vec<(SubscriptionId, mpsc::UnboundedSender<SessionEvent>)>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<SessionEvent>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .expect("dispatcher lock poisoned")
            .push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("dispatcher lock poisoned")
            .retain(|(sub_id, _)| *sub_id != id);
    }

    pub fn emit(&self, event: SessionEvent) {
        let mut subscribers = self.subscribers.lock().expect("dispatcher lock poisoned");
        subscribers.retain(|(id, tx)| {
            let alive = tx.send(event.clone()).is_ok();
            if !alive {
                trace!(?id, "dropping closed subscriber");
            }
            alive
        });
    }
}
