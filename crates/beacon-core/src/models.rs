//! Core data models for beacon notification sync.
//!
//! These types are shared by the store, the subscriber, the gateway and the
//! collaborator traits, and represent the notification domain entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

/// Opaque key/value metadata attached to a notification.
pub type NotificationMetadata = serde_json::Map<String, JsonValue>;

// =============================================================================
// IDENTITY
// =============================================================================

/// The signed-in user as reported by the authentication context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: Uuid,
}

impl CurrentUser {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

/// Identifies one user session of the sync engine.
///
/// Every asynchronous result (setup, retry timer, mutation acknowledgement)
/// carries the token it was issued under; results whose token is no longer
/// the active one are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionToken {
    /// Monotonic counter, incremented for every session the engine starts.
    pub generation: u64,
    /// User the session belongs to.
    pub user_id: Uuid,
}

// =============================================================================
// NOTIFICATION TYPES
// =============================================================================

/// Category tag of a notification (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Warning,
    Info,
    Achievement,
    Reminder,
    Social,
}

impl NotificationKind {
    /// All kinds, in display order.
    pub const ALL: [NotificationKind; 7] = [
        NotificationKind::Success,
        NotificationKind::Error,
        NotificationKind::Warning,
        NotificationKind::Info,
        NotificationKind::Achievement,
        NotificationKind::Reminder,
        NotificationKind::Social,
    ];

    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Warning => "warning",
            NotificationKind::Info => "info",
            NotificationKind::Achievement => "achievement",
            NotificationKind::Reminder => "reminder",
            NotificationKind::Social => "social",
        }
    }

    /// Default list icon for notifications of this kind.
    pub fn icon(&self) -> &'static str {
        match self {
            NotificationKind::Success => "✅",
            NotificationKind::Error => "❌",
            NotificationKind::Warning => "⚠️",
            NotificationKind::Info => "ℹ️",
            NotificationKind::Achievement => "🏆",
            NotificationKind::Reminder => "🔔",
            NotificationKind::Social => "👥",
        }
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NotificationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown notification kind: {s}")))
    }
}

/// A single notification row as stored remotely and held in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<NotificationMetadata>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Create an unread notification with a fresh id, created now.
    pub fn new(
        user_id: Uuid,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            icon: None,
            read: false,
            metadata: None,
            created_at: Utc::now(),
            read_at: None,
        }
    }

    /// Set the creation timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set the read flag.
    pub fn with_read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Set an explicit icon.
    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: NotificationMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Decode and validate a raw row arriving from the remote store or feed.
    ///
    /// Rejects unknown kinds, non-object metadata, and nil identifiers.
    pub fn from_row(row: JsonValue) -> Result<Self> {
        let notification: Notification = serde_json::from_value(row)
            .map_err(|e| Error::InvalidInput(format!("malformed notification row: {e}")))?;
        notification.validate()?;
        Ok(notification)
    }

    /// Check identifier invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_nil() {
            return Err(Error::InvalidInput("notification id is nil".into()));
        }
        if self.user_id.is_nil() {
            return Err(Error::InvalidInput(format!(
                "notification {} has a nil user id",
                self.id
            )));
        }
        Ok(())
    }

    /// Title shown to the user, falling back when the row has none.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            defaults::ALERT_TITLE
        } else {
            &self.title
        }
    }

    /// Icon shown in lists: the row's own icon, else the kind's default.
    pub fn display_icon(&self) -> &str {
        self.icon.as_deref().unwrap_or_else(|| self.kind.icon())
    }
}

/// Partial update sent to the remote store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl NotificationPatch {
    /// Patch marking a notification read at the given instant.
    pub fn mark_read(at: DateTime<Utc>) -> Self {
        Self {
            read: Some(true),
            read_at: Some(at),
        }
    }

    /// Apply this patch to a row.
    pub fn apply_to(&self, notification: &mut Notification) {
        if let Some(read) = self.read {
            notification.read = read;
        }
        if let Some(read_at) = self.read_at {
            notification.read_at = Some(read_at);
        }
    }
}

/// Scope of a bulk remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationFilter {
    pub user_id: Uuid,
    /// Restrict to read (`Some(true)`) or unread (`Some(false)`) rows.
    pub read: Option<bool>,
}

impl NotificationFilter {
    /// Every notification of a user.
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            read: None,
        }
    }

    /// Unread notifications of a user.
    pub fn unread(user_id: Uuid) -> Self {
        Self {
            user_id,
            read: Some(false),
        }
    }

    /// Read notifications of a user.
    pub fn read(user_id: Uuid) -> Self {
        Self {
            user_id,
            read: Some(true),
        }
    }

    /// Whether a row falls inside this scope.
    pub fn matches(&self, notification: &Notification) -> bool {
        notification.user_id == self.user_id
            && self.read.map_or(true, |read| notification.read == read)
    }
}

/// View filter over the local notification list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListFilter {
    #[default]
    All,
    Unread,
    Read,
    Kind(NotificationKind),
}

impl ListFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::Unread => !notification.read,
            ListFilter::Read => notification.read,
            ListFilter::Kind(kind) => notification.kind == *kind,
        }
    }
}

// =============================================================================
// CONNECTION STATE
// =============================================================================

/// Status callback reported by the change-feed transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedStatus {
    Subscribed,
    Closed,
    ChannelError(String),
    TimedOut,
}

/// Connection state of the live subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionState {
    /// Next state for a transport status callback, or `None` when the status
    /// does not apply in the current state.
    ///
    /// `Subscribed` connects from `Connecting` (or `Error`, when the
    /// transport recovers on its own). `Closed` disconnects an active
    /// subscription. Errors and timeouts fail an active subscription.
    pub fn on_status(self, status: &FeedStatus) -> Option<ConnectionState> {
        use ConnectionState::*;

        let next = match (self, status) {
            (Connecting | Error, FeedStatus::Subscribed) => Connected,
            (Connecting | Connected, FeedStatus::Closed) => Disconnected,
            (Connecting | Connected, FeedStatus::ChannelError(_) | FeedStatus::TimedOut) => Error,
            _ => return None,
        };
        Some(next)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// CHANGE FEED TYPES
// =============================================================================

/// Row-level event kinds a subscription can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row change delivered by the live feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(Notification),
    Update(Notification),
    /// Delete events carry the old row's identity only.
    Delete { id: Uuid, user_id: Uuid },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn notification_id(&self) -> Uuid {
        match self {
            ChangeEvent::Insert(n) | ChangeEvent::Update(n) => n.id,
            ChangeEvent::Delete { id, .. } => *id,
        }
    }

    pub fn user_id(&self) -> Uuid {
        match self {
            ChangeEvent::Insert(n) | ChangeEvent::Update(n) => n.user_id,
            ChangeEvent::Delete { user_id, .. } => *user_id,
        }
    }
}

/// One message on a subscription channel. Status callbacks and row changes
/// share a channel so their relative order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Status(FeedStatus),
    Change(ChangeEvent),
}

/// Parameters of a live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub table: String,
    pub user_id: Uuid,
    pub events: Vec<ChangeKind>,
}

impl SubscribeRequest {
    /// Channel name the transport registers the subscription under.
    pub fn channel_name(&self) -> String {
        format!("{}:{}", self.table, self.user_id)
    }

    pub fn wants(&self, kind: ChangeKind) -> bool {
        self.events.contains(&kind)
    }
}

// =============================================================================
// ENGINE OUTPUT TYPES
// =============================================================================

/// User-facing outcome signal (rendered as a toast by the application).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSignal {
    Success(String),
    Failure(String),
}

impl UserSignal {
    pub fn success(message: impl Into<String>) -> Self {
        UserSignal::Success(message.into())
    }

    pub fn failure(message: impl Into<String>) -> Self {
        UserSignal::Failure(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            UserSignal::Success(m) | UserSignal::Failure(m) => m,
        }
    }
}

/// Result of a gateway mutation whose remote write succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The local store now reflects the write.
    Applied,
    /// The session ended while the write was in flight; nothing was applied.
    Discarded,
}

/// Read-only view of the engine state published to consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    /// User of the active session, if any.
    pub user_id: Option<Uuid>,
    /// Whether the historical seed has been applied for this session.
    pub seeded: bool,
    /// Notifications, newest first.
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub connection: ConnectionState,
}

impl NotificationSnapshot {
    /// Unread badge text: `None` at zero, `"9+"` above [`defaults::BADGE_MAX`].
    pub fn badge_label(&self) -> Option<String> {
        badge_label(self.unread_count)
    }

    /// Notifications matching a list filter.
    pub fn filtered(&self, filter: ListFilter) -> Vec<&Notification> {
        self.notifications
            .iter()
            .filter(|n| filter.matches(n))
            .collect()
    }
}

/// Unread badge text for a count.
pub fn badge_label(unread: usize) -> Option<String> {
    match unread {
        0 => None,
        n if n > defaults::BADGE_MAX => Some(format!("{}+", defaults::BADGE_MAX)),
        n => Some(n.to_string()),
    }
}
