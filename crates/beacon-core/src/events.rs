//! Sync event types, envelope schema, and event bus.
//!
//! The engine emits a [`SyncEvent`] for every lifecycle step (session start
//! and end, connection transitions, live changes, mutations). Events are
//! wrapped in a versioned [`EventEnvelope`] and broadcast; downstream
//! consumers (UI badges, telemetry, tests) subscribe independently.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{ConnectionState, NotificationKind};

// ============================================================================
// Event Envelope
// ============================================================================

/// Versioned event envelope.
///
/// `event_type` uses dot-namespaced names (e.g. `"notification.received"`,
/// `"connection.changed"`); `payload` carries the domain data.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// User whose session produced the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: SyncEvent,
}

impl EventEnvelope {
    pub fn new(event: SyncEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            user_id: event.user_id(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Sync Event (domain payloads)
// ============================================================================

/// Mutation kinds reported in mutation events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    MarkRead,
    MarkAllRead,
    Delete,
    DeleteAllRead,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::MarkRead => "mark_as_read",
            MutationKind::MarkAllRead => "mark_all_as_read",
            MutationKind::Delete => "delete",
            MutationKind::DeleteAllRead => "delete_all_read",
        }
    }
}

/// Events emitted by the sync engine, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// A session was started for a user.
    SessionStarted { user_id: Uuid, generation: u64 },
    /// A session was torn down (identity change or shutdown).
    SessionEnded { user_id: Uuid, generation: u64 },
    /// The historical fetch seeded the store.
    StoreSeeded {
        user_id: Uuid,
        count: usize,
        unread_count: usize,
    },
    /// The connection state changed.
    ConnectionChanged {
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<Uuid>,
        state: ConnectionState,
    },
    /// A new notification arrived over the live feed.
    NotificationReceived {
        user_id: Uuid,
        notification_id: Uuid,
        kind: NotificationKind,
    },
    /// A live update changed a notification.
    NotificationUpdated {
        user_id: Uuid,
        notification_id: Uuid,
        read: bool,
    },
    /// A live delete removed a notification.
    NotificationRemoved {
        user_id: Uuid,
        notification_id: Uuid,
    },
    /// A gateway mutation was written remotely and applied locally.
    MutationApplied {
        user_id: Uuid,
        mutation: MutationKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        notification_id: Option<Uuid>,
        unread_count: usize,
    },
    /// A gateway mutation's remote write failed.
    MutationFailed {
        user_id: Uuid,
        mutation: MutationKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        notification_id: Option<Uuid>,
        error: String,
    },
}

impl SyncEvent {
    /// Returns the namespaced event type for the envelope.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            SyncEvent::SessionStarted { .. } => "session.started",
            SyncEvent::SessionEnded { .. } => "session.ended",
            SyncEvent::StoreSeeded { .. } => "store.seeded",
            SyncEvent::ConnectionChanged { .. } => "connection.changed",
            SyncEvent::NotificationReceived { .. } => "notification.received",
            SyncEvent::NotificationUpdated { .. } => "notification.updated",
            SyncEvent::NotificationRemoved { .. } => "notification.removed",
            SyncEvent::MutationApplied { .. } => "mutation.applied",
            SyncEvent::MutationFailed { .. } => "mutation.failed",
        }
    }

    /// Returns the user this event relates to.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            SyncEvent::ConnectionChanged { user_id, .. } => *user_id,
            SyncEvent::SessionStarted { user_id, .. }
            | SyncEvent::SessionEnded { user_id, .. }
            | SyncEvent::StoreSeeded { user_id, .. }
            | SyncEvent::NotificationReceived { user_id, .. }
            | SyncEvent::NotificationUpdated { user_id, .. }
            | SyncEvent::NotificationRemoved { user_id, .. }
            | SyncEvent::MutationApplied { user_id, .. }
            | SyncEvent::MutationFailed { user_id, .. } => Some(*user_id),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast-based event bus for distributing sync events to multiple consumers.
///
/// Slow receivers that fall behind receive a `Lagged` error and miss events;
/// the authoritative state is always the engine snapshot, not the event log.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently without subscribers.
    pub fn emit(&self, event: SyncEvent) {
        let envelope = EventEnvelope::new(event);
        tracing::trace!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Subscribe to enveloped events. Each subscriber gets its own stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
