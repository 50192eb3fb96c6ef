//! Core traits for beacon's external collaborators.
//!
//! These traits define the interfaces the remote store, the change-feed
//! transport and the UI/audio layer must satisfy. The sync engine only ever
//! talks to them through these seams, which keeps it testable and free of
//! global clients.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// REMOTE STORE
// =============================================================================

/// Remote relational store holding notification rows.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Fetch the newest `limit` notifications of a user, newest first.
    async fn fetch_recent(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>>;

    /// Apply a patch to one notification.
    async fn update(&self, id: Uuid, patch: NotificationPatch) -> Result<()>;

    /// Apply a patch to every notification in scope.
    async fn update_where(&self, filter: NotificationFilter, patch: NotificationPatch) -> Result<()>;

    /// Delete one notification.
    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Delete every notification in scope.
    async fn delete_where(&self, filter: NotificationFilter) -> Result<()>;
}

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Transport-side handle of an open subscription.
pub trait FeedHandle: Send + Sync {
    /// Close the subscription and release the transport channel.
    fn close(&self);
}

/// An open live subscription: an ordered message channel plus its handle.
pub struct FeedSubscription {
    pub messages: mpsc::Receiver<FeedMessage>,
    pub handle: Box<dyn FeedHandle>,
}

impl FeedSubscription {
    pub fn new(messages: mpsc::Receiver<FeedMessage>, handle: Box<dyn FeedHandle>) -> Self {
        Self { messages, handle }
    }

    /// Close the transport subscription, consuming it so it cannot be closed twice.
    pub fn close(self) {
        self.handle.close();
    }
}

impl std::fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedSubscription").finish_non_exhaustive()
    }
}

/// Live change-feed transport.
///
/// Delivery is at-least-once and ordered per subscription. Status callbacks
/// (`Subscribed`, `Closed`, ...) arrive on the same channel as row changes.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<FeedSubscription>;
}

// =============================================================================
// ALERTS
// =============================================================================

/// Best-effort UI and audio side effects.
///
/// Errors returned here are logged by the caller and never turned into
/// operation failures.
pub trait AlertSink: Send + Sync {
    /// Show a transient alert for a newly arrived notification.
    fn notify_user(&self, title: &str, body: &str) -> Result<()>;

    /// Play the notification chime.
    fn play_chime(&self) -> Result<()>;

    /// Show the outcome of a user-initiated mutation.
    fn signal(&self, signal: &UserSignal) -> Result<()>;
}

/// Alert sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAlerts;

impl AlertSink for NoOpAlerts {
    fn notify_user(&self, _title: &str, _body: &str) -> Result<()> {
        Ok(())
    }

    fn play_chime(&self) -> Result<()> {
        Ok(())
    }

    fn signal(&self, _signal: &UserSignal) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHandle(Arc<AtomicUsize>);

    impl FeedHandle for CountingHandle {
        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_subscription_close_calls_handle_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::channel(4);
        let sub = FeedSubscription::new(rx, Box::new(CountingHandle(closes.clone())));
        sub.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscription_messages_in_order() {
        let (tx, rx) = mpsc::channel(4);
        let mut sub = FeedSubscription::new(rx, Box::new(CountingHandle(Default::default())));
        tx.send(FeedMessage::Status(FeedStatus::Subscribed)).await.unwrap();
        tx.send(FeedMessage::Status(FeedStatus::Closed)).await.unwrap();
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(FeedStatus::Subscribed))
        );
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(FeedStatus::Closed))
        );
    }

    #[test]
    fn test_noop_alerts_never_fail() {
        let alerts = NoOpAlerts;
        assert!(alerts.notify_user("t", "b").is_ok());
        assert!(alerts.play_chime().is_ok());
        assert!(alerts.signal(&UserSignal::failure("x")).is_ok());
    }
}
