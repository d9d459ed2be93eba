use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::{Result, StoreError};

/// Type of event in the watch stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
}

/// A single watch event representing a state change.
///
/// `value` holds the object after the change; for `Deleted` it holds the last stored state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchEvent {
    pub seq: u64,
    pub event_type: EventType,
    pub key: String,
    #[serde(default)]
    pub value: Option<Vec<u8>>,
}

impl WatchEvent {
    /// Decode the carried object, if any.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.value
            .as_deref()
            .and_then(|v| serde_json::from_slice(v).ok())
    }
}

/// In-memory event log that tracks all state mutations with monotonic sequence numbers.
/// Clients can subscribe to receive events filtered by key prefix.
#[derive(Clone)]
pub struct EventLog {
    inner: Arc<RwLock<EventLogInner>>,
    sender: broadcast::Sender<WatchEvent>,
    closed: Arc<AtomicBool>,
}

struct EventLogInner {
    seq: u64,
    /// Ring buffer of recent events (capped)
    events: Vec<WatchEvent>,
    max_events: usize,
}

impl EventLog {
    /// Create a new event log with the given capacity for recent events.
    pub fn new(max_events: usize, channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            inner: Arc::new(RwLock::new(EventLogInner {
                seq: 0,
                events: Vec::with_capacity(max_events),
                max_events,
            })),
            sender,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record a new event. Called by the state store after every successful write.
    pub async fn emit(&self, event_type: EventType, key: String, value: Option<Vec<u8>>) {
        let mut inner = self.inner.write().await;
        inner.seq += 1;
        let event = WatchEvent {
            seq: inner.seq,
            event_type,
            key,
            value,
        };
        // Ring buffer: remove oldest if at capacity
        if inner.events.len() >= inner.max_events {
            inner.events.remove(0);
        }
        inner.events.push(event.clone());
        // Broadcast to subscribers (ignore errors if no receivers)
        let _ = self.sender.send(event);
    }

    /// Get the current sequence number.
    pub async fn current_seq(&self) -> u64 {
        self.inner.read().await.seq
    }

    /// Get all events since the given sequence number.
    pub async fn events_since(&self, from_seq: u64) -> Vec<WatchEvent> {
        let inner = self.inner.read().await;
        inner
            .events
            .iter()
            .filter(|e| e.seq > from_seq)
            .cloned()
            .collect()
    }

    /// Subscribe to every new event. Fails once the log has been closed.
    pub fn subscribe(&self) -> Result<broadcast::Receiver<WatchEvent>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(self.sender.subscribe())
    }

    /// Subscribe to events whose key starts with `prefix`.
    pub fn watch(&self, prefix: impl Into<String>) -> Result<Watcher> {
        Ok(Watcher {
            rx: self.subscribe()?,
            prefix: prefix.into(),
        })
    }

    /// Refuse new subscriptions. Existing subscribers keep draining buffered events.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A prefix-filtered subscription to the event log.
pub struct Watcher {
    rx: broadcast::Receiver<WatchEvent>,
    prefix: String,
}

impl Watcher {
    /// Wait for the next matching event.
    ///
    /// `RecvError::Lagged` means events were dropped and the caller should resync;
    /// `RecvError::Closed` means the log is gone.
    pub async fn recv(&mut self) -> std::result::Result<WatchEvent, RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.key.starts_with(&self.prefix) {
                return Ok(event);
            }
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
