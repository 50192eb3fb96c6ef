//! Structured logging schema and field name constants for beacon.
//!
//! Both crates log with these field names for consistent structured fields,
//! so log aggregation can query sessions and notifications by the same names.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded sync, e.g. historical fetch or remote write failed |
//! | WARN  | Recoverable issue, e.g. transport error, foreign-user event dropped |
//! | INFO  | Lifecycle events (session start/end, connected, shutdown) |
//! | DEBUG | Decision points (stale result discarded, duplicate delivery) |
//! | TRACE | Per-event application to the store |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "sync", "gateway"
pub const SUBSYSTEM: &str = "subsystem";

/// Logical operation name.
/// Examples: "seed", "mark_as_read", "mark_all_as_read", "delete"
pub const OPERATION: &str = "op";

/// Session generation counter.
pub const GENERATION: &str = "generation";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// User UUID owning the session.
pub const USER_ID: &str = "user_id";

/// Notification UUID being operated on.
pub const NOTIFICATION_ID: &str = "notification_id";

/// Notification category tag.
pub const KIND: &str = "kind";

// ─── State fields ──────────────────────────────────────────────────────────

/// Connection state after a transition.
pub const CONNECTION_STATE: &str = "connection_state";

/// Derived unread counter after a mutation.
pub const UNREAD_COUNT: &str = "unread_count";

/// Resubscribe attempt number.
pub const ATTEMPT: &str = "attempt";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Number of records returned by a fetch.
pub const RESULT_COUNT: &str = "result_count";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Every field name above.
pub const ALL_FIELDS: &[&str] = &[
    SUBSYSTEM,
    OPERATION,
    GENERATION,
    USER_ID,
    NOTIFICATION_ID,
    KIND,
    CONNECTION_STATE,
    UNREAD_COUNT,
    ATTEMPT,
    RESULT_COUNT,
    DURATION_MS,
    ERROR_MSG,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names_are_unique_snake_case() {
        let mut seen = std::collections::HashSet::new();
        for &field in ALL_FIELDS {
            assert!(seen.insert(field), "duplicate field name {field}");
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
