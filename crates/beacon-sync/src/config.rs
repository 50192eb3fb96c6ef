//! Sync engine configuration.

use std::time::Duration;

use uuid::Uuid;

use beacon_core::defaults;
use beacon_core::error::{Error, Result};
use beacon_core::models::{ChangeKind, SubscribeRequest};

use crate::retry::RetryPolicy;

/// Configuration for the notification sync engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Size of the bounded historical fetch.
    pub fetch_limit: i64,
    /// Alert preview length in characters.
    pub preview_length: usize,
    /// Table the change feed is subscribed on.
    pub feed_table: String,
    /// Also subscribe to delete events.
    pub live_deletes: bool,
    /// Play the chime when a new notification arrives.
    pub chime_enabled: bool,
    /// Buffer of the outward event bus.
    pub event_bus_capacity: usize,
    /// Resubscribe policy after a feed error.
    pub retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_limit: defaults::FETCH_LIMIT,
            preview_length: defaults::PREVIEW_LENGTH,
            feed_table: defaults::FEED_TABLE.to_string(),
            live_deletes: false,
            chime_enabled: true,
            event_bus_capacity: defaults::EVENT_BUS_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base = Self::default();
        let parse_u64 = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| v != "false" && v != "0")
                .unwrap_or(default)
        };

        let fetch_limit = lookup("BEACON_FETCH_LIMIT")
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(base.fetch_limit)
            .max(1);

        let preview_length = lookup("BEACON_PREVIEW_LENGTH")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.preview_length);

        let feed_table = lookup("BEACON_FEED_TABLE")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(base.feed_table);

        let event_bus_capacity = lookup("BEACON_EVENT_BUS_CAPACITY")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.event_bus_capacity)
            .max(1);

        let max_attempts = lookup("BEACON_RETRY_MAX_ATTEMPTS")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(base.retry.max_attempts);
        let base_ms = parse_u64("BEACON_RETRY_BASE_MS").unwrap_or(defaults::RETRY_BASE_DELAY_MS);
        let max_ms = parse_u64("BEACON_RETRY_MAX_MS").unwrap_or(defaults::RETRY_MAX_DELAY_MS);

        Self {
            fetch_limit,
            preview_length,
            feed_table,
            live_deletes: flag("BEACON_LIVE_DELETES", base.live_deletes),
            chime_enabled: flag("BEACON_CHIME_ENABLED", base.chime_enabled),
            event_bus_capacity,
            retry: RetryPolicy::exponential(
                max_attempts,
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
        }
    }

    pub fn with_fetch_limit(mut self, limit: i64) -> Self {
        self.fetch_limit = limit.max(1);
        self
    }

    pub fn with_preview_length(mut self, chars: usize) -> Self {
        self.preview_length = chars;
        self
    }

    pub fn with_feed_table(mut self, table: impl Into<String>) -> Self {
        self.feed_table = table.into();
        self
    }

    pub fn with_live_deletes(mut self, enabled: bool) -> Self {
        self.live_deletes = enabled;
        self
    }

    pub fn with_chime(mut self, enabled: bool) -> Self {
        self.chime_enabled = enabled;
        self
    }

    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reject settings the engine cannot run with. Public fields can bypass
    /// the clamping done by the builders.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_limit < 1 {
            return Err(Error::Config(format!(
                "fetch_limit must be at least 1, got {}",
                self.fetch_limit
            )));
        }
        if self.feed_table.trim().is_empty() {
            return Err(Error::Config("feed_table must not be empty".to_string()));
        }
        if self.event_bus_capacity == 0 {
            return Err(Error::Config(
                "event_bus_capacity must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay < self.retry.base_delay {
            return Err(Error::Config(format!(
                "retry max delay {:?} is shorter than base delay {:?}",
                self.retry.max_delay, self.retry.base_delay
            )));
        }
        Ok(())
    }

    /// Row events the live subscription asks for.
    pub fn change_kinds(&self) -> Vec<ChangeKind> {
        let mut kinds = vec![ChangeKind::Insert, ChangeKind::Update];
        if self.live_deletes {
            kinds.push(ChangeKind::Delete);
        }
        kinds
    }

    /// Subscription request for one user's rows.
    pub fn subscribe_request(&self, user_id: Uuid) -> SubscribeRequest {
        SubscribeRequest {
            table: self.feed_table.clone(),
            user_id,
            events: self.change_kinds(),
        }
    }
}
