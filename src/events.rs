//! Agent events for UI subscribers.
//!
//! Two streams are kept apart on purpose:
//!
//! - durable history, published as full [`AgentEvent::HistoryChange`] snapshots
//! - transient [`AgentActivity`], which is never stored and never shown to the model
//!
//! Every event is wrapped in an [`AgentEventEnvelope`] and fanned out over a
//! `tokio::sync::broadcast` channel by [`EventEmitter`].
//!
//! # Event Flow
//!
//! A typical step looks like:
//! 1. `Activity(Thinking)`
//! 2. `Activity(Executing)` / `Activity(Executed)`
//! 3. `HistoryChange` with the new step appended
//!
//! A task begins with `StatusChange(Running)` and ends with
//! `StatusChange(Completed)` or `StatusChange(Error)`.

use crate::history::HistoricalEvent;
use crate::hooks::AgentHooks;
use crate::types::AgentStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use time::OffsetDateTime;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 256;

/// Transient progress signal for the UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentActivity {
    /// Waiting on the model
    Thinking,
    Executing {
        tool: String,
        input: serde_json::Value,
    },
    Executed {
        tool: String,
        input: serde_json::Value,
        output: String,
        duration_ms: u64,
    },
    Retrying {
        attempt: u32,
        max_attempts: u32,
    },
    Error {
        message: String,
    },
}

/// Events emitted by the agent for UI consumption.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StatusChange { status: AgentStatus },

    /// Full replacement of the history, never a delta.
    HistoryChange { history: Vec<HistoricalEvent> },

    Activity { activity: AgentActivity },

    /// The agent was disposed; no further events follow.
    Dispose,
}

impl AgentEvent {
    #[must_use]
    pub const fn status(status: AgentStatus) -> Self {
        Self::StatusChange { status }
    }

    #[must_use]
    pub const fn history(history: Vec<HistoricalEvent>) -> Self {
        Self::HistoryChange { history }
    }

    #[must_use]
    pub const fn activity(activity: AgentActivity) -> Self {
        Self::Activity { activity }
    }
}

/// Monotonically increasing counter for event ordering.
///
/// The counter is `Arc`-wrapped so clones share state. `Ordering::Relaxed`
/// is sufficient because the broadcast channel provides the happens-before
/// ordering between sender and receivers.
#[derive(Clone, Debug)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
    /// Create a new counter starting at 0.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    /// Get the next sequence number, incrementing the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Envelope wrapping every [`AgentEvent`] with delivery metadata.
///
/// Subscribers can use `event_id` for deduplication, `sequence` for ordering
/// and `timestamp` for display. The `event` field is flattened in JSON so its
/// `type` discriminant sits next to the envelope fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentEventEnvelope {
    /// Unique identifier (UUID v4) for this event emission.
    pub event_id: uuid::Uuid,
    /// Monotonically increasing sequence number for this agent.
    pub sequence: u64,
    /// UTC timestamp of when the event was emitted.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// The actual event payload.
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl AgentEventEnvelope {
    /// Wrap an [`AgentEvent`] in an envelope, assigning it a unique ID,
    /// the next sequence number, and the current UTC timestamp.
    #[must_use]
    pub fn wrap(event: AgentEvent, seq: &SequenceCounter) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4(),
            sequence: seq.next(),
            timestamp: OffsetDateTime::now_utc(),
            event,
        }
    }
}

/// Publishes [`AgentEvent`]s to hooks and broadcast subscribers.
///
/// Also remembers the latest activity so callers can poll it; `None`
/// means idle.
pub struct EventEmitter {
    tx: broadcast::Sender<AgentEventEnvelope>,
    seq: SequenceCounter,
    current: RwLock<Option<AgentActivity>>,
    hooks: Arc<dyn AgentHooks>,
}

impl EventEmitter {
    #[must_use]
    pub fn new(hooks: Arc<dyn AgentHooks>) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            seq: SequenceCounter::new(),
            current: RwLock::new(None),
            hooks,
        }
    }

    /// Subscribe to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEventEnvelope> {
        self.tx.subscribe()
    }

    /// Send an event to the hooks, then to every subscriber.
    ///
    /// Having no subscribers is not an error.
    pub async fn emit(&self, event: AgentEvent) {
        self.hooks.on_event(&event).await;
        let envelope = AgentEventEnvelope::wrap(event, &self.seq);
        let _ = self.tx.send(envelope);
    }

    pub async fn activity(&self, activity: AgentActivity) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(activity.clone());
        }
        self.emit(AgentEvent::activity(activity)).await;
    }

    /// Return to idle without emitting anything.
    pub fn clear_activity(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }

    #[must_use]
    pub fn current_activity(&self) -> Option<AgentActivity> {
        self.current.read().ok().and_then(|c| c.clone())
    }

    pub async fn status(&self, status: AgentStatus) {
        self.emit(AgentEvent::status(status)).await;
    }

    pub async fn history(&self, history: Vec<HistoricalEvent>) {
        self.emit(AgentEvent::history(history)).await;
    }
}
