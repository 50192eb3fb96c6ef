//! Centralized default constants for beacon notification sync.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration types in `beacon-sync` fall back to these constants when no
//! override is supplied.

// =============================================================================
// HISTORICAL FETCH
// =============================================================================

/// Page size of the bounded historical fetch that seeds a session.
pub const FETCH_LIMIT: i64 = 50;

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Table the live change feed is scoped to.
pub const FEED_TABLE: &str = "notifications";

/// Buffer of the per-subscription feed channel used by bundled backends.
pub const FEED_CHANNEL_CAPACITY: usize = 128;

// =============================================================================
// ALERTS
// =============================================================================

/// Characters of a message body shown in the new-notification alert.
pub const PREVIEW_LENGTH: usize = 100;

/// Suffix appended to a truncated preview.
pub const PREVIEW_ELLIPSIS: &str = "...";

/// Alert title used when a notification arrives with an empty title.
pub const ALERT_TITLE: &str = "New Notification";

/// Alert icon used when a notification carries no icon of its own.
pub const ALERT_ICON: &str = "🔔";

/// Highest unread count rendered verbatim on the badge; above it shows `9+`.
pub const BADGE_MAX: usize = 9;

// =============================================================================
// EVENTS
// =============================================================================

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Capacity of the engine's internal command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 64;

// =============================================================================
// RETRY
// =============================================================================

/// Resubscribe attempts after a transport error. Zero leaves the subscriber
/// inert in the error state.
pub const RETRY_MAX_ATTEMPTS: u32 = 0;

/// First resubscribe delay in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 1_000;

/// Ceiling for the exponential resubscribe delay in milliseconds.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;
