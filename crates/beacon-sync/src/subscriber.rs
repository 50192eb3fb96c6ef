//! Feed subscriber: session lifecycle and live-event application.
//!
//! The [`FeedSubscriber`] owns the active session (token, store, open
//! subscription) and the connection state machine. It performs no I/O of its
//! own: the engine runs setup and retry timers in spawned tasks and feeds
//! their results back here, tagged with the [`SessionToken`] they were issued
//! under so that stale results can be dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use beacon_core::error::{Error, Result};
use beacon_core::events::{EventBus, MutationKind, SyncEvent};
use beacon_core::models::{
    ChangeEvent, ConnectionState, CurrentUser, FeedMessage, FeedStatus, Notification,
    NotificationSnapshot, SessionToken,
};
use beacon_core::traits::{AlertSink, FeedSubscription};

use crate::alerts::announce;
use crate::config::SyncConfig;
use crate::store::{InsertOutcome, NotificationStore, UpdateOutcome};

/// Output of one setup task: the historical page (when seeding) and the
/// subscription attempt, always in that order.
#[derive(Debug)]
pub struct SessionSetup {
    pub token: SessionToken,
    /// `None` for a resubscribe, which keeps the existing store.
    pub seed: Option<Result<Vec<Notification>>>,
    pub feed: Result<FeedSubscription>,
}

/// What [`FeedSubscriber::complete_setup`] did with a setup result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// The subscription is open; waiting for the transport acknowledgement.
    Subscribed,
    /// Subscribing failed and the session is in the error state.
    Failed,
    /// The result belonged to an ended session and was discarded.
    Stale,
}

/// Local store change applied after a successful remote write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalMutation {
    MarkRead(Uuid),
    MarkAllRead,
    Delete(Uuid),
    DeleteAllRead,
}

impl LocalMutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            LocalMutation::MarkRead(_) => MutationKind::MarkRead,
            LocalMutation::MarkAllRead => MutationKind::MarkAllRead,
            LocalMutation::Delete(_) => MutationKind::Delete,
            LocalMutation::DeleteAllRead => MutationKind::DeleteAllRead,
        }
    }

    pub fn notification_id(&self) -> Option<Uuid> {
        match self {
            LocalMutation::MarkRead(id) | LocalMutation::Delete(id) => Some(*id),
            LocalMutation::MarkAllRead | LocalMutation::DeleteAllRead => None,
        }
    }
}

/// A resubscribe the engine should schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRequest {
    pub token: SessionToken,
    pub attempt: u32,
    pub delay: Duration,
}

#[derive(Debug)]
struct Session {
    token: SessionToken,
    store: NotificationStore,
    seeded: bool,
    feed: Option<FeedSubscription>,
    attempts: u32,
    retry_pending: bool,
    /// Mutations written remotely before the seed arrived; replayed on it.
    deferred: Vec<LocalMutation>,
}

impl Session {
    fn new(token: SessionToken) -> Self {
        Self {
            token,
            store: NotificationStore::new(),
            seeded: false,
            feed: None,
            attempts: 0,
            retry_pending: false,
            deferred: Vec::new(),
        }
    }

    fn close_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.close();
        }
    }
}

/// Connection state machine plus the per-session notification store.
pub struct FeedSubscriber {
    config: Arc<SyncConfig>,
    alerts: Arc<dyn AlertSink>,
    events: EventBus,
    state: ConnectionState,
    session: Option<Session>,
    generation: u64,
}

impl FeedSubscriber {
    pub fn new(config: Arc<SyncConfig>, alerts: Arc<dyn AlertSink>, events: EventBus) -> Self {
        Self {
            config,
            alerts,
            events,
            state: ConnectionState::Disconnected,
            session: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Token of the active session, if any.
    pub fn token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(|s| s.token)
    }

    pub fn store(&self) -> Option<&NotificationStore> {
        self.session.as_ref().map(|s| &s.store)
    }

    pub fn is_current(&self, token: SessionToken) -> bool {
        self.token() == Some(token)
    }

    /// Message channel of the open subscription, if any.
    pub fn feed_receiver(&mut self) -> Option<&mut mpsc::Receiver<FeedMessage>> {
        self.session
            .as_mut()
            .and_then(|s| s.feed.as_mut())
            .map(|f| &mut f.messages)
    }

    /// React to the authenticated identity.
    ///
    /// Returns the token of a newly started session whose setup (seed, then
    /// subscribe) the caller must run. Re-observing the current user is a
    /// no-op; `None` tears the session down.
    pub fn observe_identity(&mut self, user: Option<CurrentUser>) -> Option<SessionToken> {
        let current = self.session.as_ref().map(|s| s.token.user_id);
        if current == user.map(|u| u.id) {
            return None;
        }

        self.end_session();
        let user = user?;

        self.generation += 1;
        let token = SessionToken {
            generation: self.generation,
            user_id: user.id,
        };
        self.session = Some(Session::new(token));
        info!(
            user_id = %token.user_id,
            generation = token.generation,
            "Notification session started"
        );
        self.events.emit(SyncEvent::SessionStarted {
            user_id: token.user_id,
            generation: token.generation,
        });
        self.set_state(ConnectionState::Connecting);
        Some(token)
    }

    /// Close the subscription, drop the store and go `Disconnected`.
    pub fn end_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close_feed();
            info!(
                user_id = %session.token.user_id,
                generation = session.token.generation,
                "Notification session ended"
            );
            self.events.emit(SyncEvent::SessionEnded {
                user_id: session.token.user_id,
                generation: session.token.generation,
            });
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Apply the result of a setup task.
    pub fn complete_setup(&mut self, setup: SessionSetup) -> SetupOutcome {
        let SessionSetup { token, seed, feed } = setup;

        let session = match self.session.as_mut() {
            Some(session) if session.token == token => session,
            _ => {
                if let Ok(feed) = feed {
                    feed.close();
                }
                debug!(
                    user_id = %token.user_id,
                    error = %Error::StaleResult(token.generation),
                    "Discarding session setup"
                );
                return SetupOutcome::Stale;
            }
        };

        if let Some(seed) = seed {
            match seed {
                Ok(records) => {
                    session.store.seed(records);
                    info!(
                        user_id = %token.user_id,
                        result_count = session.store.len(),
                        unread_count = session.store.unread_count(),
                        "Notification store seeded"
                    );
                    self.events.emit(SyncEvent::StoreSeeded {
                        user_id: token.user_id,
                        count: session.store.len(),
                        unread_count: session.store.unread_count(),
                    });
                }
                Err(e) => {
                    error!(
                        user_id = %token.user_id,
                        error = %e,
                        "Historical notification fetch failed, continuing with empty store"
                    );
                }
            }
            session.seeded = true;

            for mutation in std::mem::take(&mut session.deferred) {
                apply_to_store(&mut session.store, mutation);
                let unread_count = session.store.unread_count();
                debug!(
                    op = mutation.kind().as_str(),
                    unread_count,
                    "Deferred mutation replayed onto seeded store"
                );
                self.events.emit(SyncEvent::MutationApplied {
                    user_id: token.user_id,
                    mutation: mutation.kind(),
                    notification_id: mutation.notification_id(),
                    unread_count,
                });
            }
        }

        match feed {
            Ok(feed) => {
                session.close_feed();
                session.feed = Some(feed);
                debug!(user_id = %token.user_id, "Live subscription opened");
                SetupOutcome::Subscribed
            }
            Err(e) => {
                warn!(user_id = %token.user_id, error = %e, "Live subscription failed");
                self.enter_error();
                SetupOutcome::Failed
            }
        }
    }

    /// Handle the next message from the open subscription.
    ///
    /// `None` means the transport ended the channel and counts as `Closed`.
    pub fn handle_feed_message(&mut self, message: Option<FeedMessage>) {
        match message {
            Some(FeedMessage::Status(status)) => self.apply_status(status),
            Some(FeedMessage::Change(event)) => self.apply_change(event),
            None => {
                if let Some(session) = self.session.as_mut() {
                    session.close_feed();
                }
                debug!("Live subscription channel ended");
                self.apply_status(FeedStatus::Closed);
            }
        }
    }

    fn apply_status(&mut self, status: FeedStatus) {
        let Some(next) = self.state.on_status(&status) else {
            trace!(state = %self.state, status = ?status, "Ignoring feed status");
            return;
        };

        match (&status, next) {
            (FeedStatus::Subscribed, _) => {
                if let Some(session) = self.session.as_mut() {
                    session.attempts = 0;
                    session.retry_pending = false;
                }
                self.set_state(next);
            }
            (_, ConnectionState::Error) => {
                warn!(status = ?status, "Live subscription reported an error");
                self.enter_error();
            }
            _ => self.set_state(next),
        }
    }

    fn apply_change(&mut self, event: ChangeEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let user_id = session.token.user_id;

        if event.user_id() != user_id {
            warn!(
                user_id = %user_id,
                notification_id = %event.notification_id(),
                "Dropping change event for another user"
            );
            return;
        }

        match event {
            ChangeEvent::Insert(notification) => {
                if let Err(e) = notification.validate() {
                    warn!(error = %e, "Dropping invalid inserted notification");
                    return;
                }
                let notification_id = notification.id;
                let kind = notification.kind;
                match session.store.apply_insert(notification.clone()) {
                    InsertOutcome::Inserted => {
                        trace!(notification_id = %notification_id, kind = %kind, "Notification inserted");
                        self.events.emit(SyncEvent::NotificationReceived {
                            user_id,
                            notification_id,
                            kind,
                        });
                        announce(
                            self.alerts.as_ref(),
                            &notification,
                            self.config.preview_length,
                            self.config.chime_enabled,
                        );
                    }
                    InsertOutcome::Duplicate => {
                        debug!(notification_id = %notification_id, "Duplicate insert delivery ignored");
                    }
                }
            }
            ChangeEvent::Update(notification) => {
                if let Err(e) = notification.validate() {
                    warn!(error = %e, "Dropping invalid updated notification");
                    return;
                }
                let notification_id = notification.id;
                let read = notification.read;
                match session.store.apply_update(notification) {
                    UpdateOutcome::Unchanged => {
                        trace!(notification_id = %notification_id, "Update carried no change");
                    }
                    outcome => {
                        trace!(notification_id = %notification_id, outcome = ?outcome, "Notification updated");
                        self.events.emit(SyncEvent::NotificationUpdated {
                            user_id,
                            notification_id,
                            read,
                        });
                    }
                }
            }
            ChangeEvent::Delete { id, .. } => {
                if session.store.remove(id).is_some() {
                    trace!(notification_id = %id, "Notification removed");
                    self.events.emit(SyncEvent::NotificationRemoved {
                        user_id,
                        notification_id: id,
                    });
                }
            }
        }
    }

    /// Apply a mutation whose remote write succeeded.
    ///
    /// Before the session is seeded the mutation is queued and replayed right
    /// after the seed. Returns the unread count, or `None` when `token` is
    /// stale.
    pub fn apply_local(&mut self, token: SessionToken, mutation: LocalMutation) -> Option<usize> {
        let session = match self.session.as_mut() {
            Some(session) if session.token == token => session,
            _ => {
                debug!(
                    op = mutation.kind().as_str(),
                    error = %Error::StaleResult(token.generation),
                    "Discarding mutation for ended session"
                );
                return None;
            }
        };

        // Seeding replaces the store wholesale.
        if !session.seeded {
            session.deferred.push(mutation);
            debug!(
                op = mutation.kind().as_str(),
                pending = session.deferred.len(),
                "Store not seeded yet, deferring mutation"
            );
            return Some(session.store.unread_count());
        }

        apply_to_store(&mut session.store, mutation);

        let unread_count = session.store.unread_count();
        debug!(
            op = mutation.kind().as_str(),
            unread_count,
            "Local mutation applied"
        );
        self.events.emit(SyncEvent::MutationApplied {
            user_id: token.user_id,
            mutation: mutation.kind(),
            notification_id: mutation.notification_id(),
            unread_count,
        });
        Some(unread_count)
    }

    /// Take the resubscribe the engine should schedule, if the retry policy
    /// allows another attempt.
    pub fn take_retry(&mut self) -> Option<RetryRequest> {
        let session = self.session.as_mut()?;
        if !session.retry_pending {
            return None;
        }
        session.retry_pending = false;

        let attempt = session.attempts + 1;
        match self.config.retry.delay_for(attempt) {
            Some(delay) => {
                session.attempts = attempt;
                info!(
                    user_id = %session.token.user_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling live subscription retry"
                );
                Some(RetryRequest {
                    token: session.token,
                    attempt,
                    delay,
                })
            }
            None => {
                if self.config.retry.is_enabled() {
                    error!(
                        user_id = %session.token.user_id,
                        attempt = session.attempts,
                        "Live subscription retries exhausted"
                    );
                }
                None
            }
        }
    }

    /// Start a resubscribe for `token`. Returns `false` when the token is
    /// stale or the session already recovered.
    pub fn begin_resubscribe(&mut self, token: SessionToken) -> bool {
        if self.state != ConnectionState::Error {
            return false;
        }
        let Some(session) = self.session.as_mut().filter(|s| s.token == token) else {
            debug!(
                error = %Error::StaleResult(token.generation),
                "Discarding retry timer"
            );
            return false;
        };
        session.close_feed();
        debug!(user_id = %token.user_id, attempt = session.attempts, "Resubscribing live feed");
        self.set_state(ConnectionState::Connecting);
        true
    }

    /// Read-only view of the current state.
    pub fn snapshot(&self) -> NotificationSnapshot {
        match &self.session {
            Some(session) => NotificationSnapshot {
                user_id: Some(session.token.user_id),
                seeded: session.seeded,
                notifications: session.store.notifications().to_vec(),
                unread_count: session.store.unread_count(),
                connection: self.state,
            },
            None => NotificationSnapshot {
                connection: self.state,
                ..NotificationSnapshot::default()
            },
        }
    }

    fn enter_error(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.retry_pending = true;
        }
        self.set_state(ConnectionState::Error);
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let user_id = self.token().map(|t| t.user_id);
        info!(from = %self.state, connection_state = %next, "Connection state changed");
        self.state = next;
        self.events.emit(SyncEvent::ConnectionChanged {
            user_id,
            state: next,
        });
    }
}

fn apply_to_store(store: &mut NotificationStore, mutation: LocalMutation) {
    match mutation {
        LocalMutation::MarkRead(id) => {
            store.mark_read(id);
        }
        LocalMutation::MarkAllRead => {
            store.mark_all_read();
        }
        LocalMutation::Delete(id) => {
            store.remove(id);
        }
        LocalMutation::DeleteAllRead => {
            store.remove_read();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RecordingAlerts;
    use crate::retry::RetryPolicy;
    use beacon_core::models::NotificationKind;
    use beacon_core::traits::FeedHandle;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle(Arc<AtomicUsize>);

    impl FeedHandle for CountingHandle {
        fn close(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn subscriber(config: SyncConfig) -> (FeedSubscriber, RecordingAlerts) {
        let alerts = RecordingAlerts::new();
        let sub = FeedSubscriber::new(
            Arc::new(config),
            Arc::new(alerts.clone()),
            EventBus::new(64),
        );
        (sub, alerts)
    }

    fn feed() -> (FeedSubscription, mpsc::Sender<FeedMessage>, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(16);
        (
            FeedSubscription::new(rx, Box::new(CountingHandle(closes.clone()))),
            tx,
            closes,
        )
    }

    fn unread(user_id: Uuid, message: &str) -> Notification {
        Notification::new(user_id, NotificationKind::Info, "Heads up", message)
    }

    fn start(sub: &mut FeedSubscriber, user_id: Uuid, seed: Vec<Notification>) -> (SessionToken, Arc<AtomicUsize>) {
        let token = sub.observe_identity(Some(CurrentUser::new(user_id))).unwrap();
        let (subscription, _tx, closes) = feed();
        let outcome = sub.complete_setup(SessionSetup {
            token,
            seed: Some(Ok(seed)),
            feed: Ok(subscription),
        });
        assert_eq!(outcome, SetupOutcome::Subscribed);
        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::Subscribed)));
        (token, closes)
    }

    #[test]
    fn test_identity_starts_connecting() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let token = sub.observe_identity(Some(CurrentUser::new(Uuid::new_v4())));
        assert!(token.is_some());
        assert_eq!(sub.state(), ConnectionState::Connecting);
        assert!(!sub.snapshot().seeded);
    }

    #[test]
    fn test_same_identity_is_noop() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let user = CurrentUser::new(Uuid::new_v4());
        let first = sub.observe_identity(Some(user)).unwrap();
        assert!(sub.observe_identity(Some(user)).is_none());
        assert_eq!(sub.token(), Some(first));
    }

    #[test]
    fn test_null_identity_without_session_stays_disconnected() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        assert!(sub.observe_identity(None).is_none());
        assert_eq!(sub.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_setup_seeds_then_connects() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        start(&mut sub, user_id, vec![unread(user_id, "a"), unread(user_id, "b")]);

        let snapshot = sub.snapshot();
        assert_eq!(snapshot.connection, ConnectionState::Connected);
        assert!(snapshot.seeded);
        assert_eq!(snapshot.unread_count, 2);
        assert_eq!(snapshot.user_id, Some(user_id));
    }

    #[test]
    fn test_fetch_failure_still_subscribes() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let token = sub
            .observe_identity(Some(CurrentUser::new(Uuid::new_v4())))
            .unwrap();
        let (subscription, _tx, _) = feed();
        let outcome = sub.complete_setup(SessionSetup {
            token,
            seed: Some(Err(Error::Fetch("timeout".into()))),
            feed: Ok(subscription),
        });
        assert_eq!(outcome, SetupOutcome::Subscribed);
        assert!(sub.snapshot().seeded);
        assert!(sub.store().unwrap().is_empty());
        assert!(sub.feed_receiver().is_some());
    }

    #[test]
    fn test_subscribe_failure_enters_error() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let token = sub
            .observe_identity(Some(CurrentUser::new(Uuid::new_v4())))
            .unwrap();
        let outcome = sub.complete_setup(SessionSetup {
            token,
            seed: Some(Ok(vec![])),
            feed: Err(Error::Transport("refused".into())),
        });
        assert_eq!(outcome, SetupOutcome::Failed);
        assert_eq!(sub.state(), ConnectionState::Error);
        assert!(sub.take_retry().is_none());
    }

    #[test]
    fn test_stale_setup_closes_late_subscription() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let old = sub
            .observe_identity(Some(CurrentUser::new(Uuid::new_v4())))
            .unwrap();
        let new_user = Uuid::new_v4();
        sub.observe_identity(Some(CurrentUser::new(new_user)));

        let (subscription, _tx, closes) = feed();
        let outcome = sub.complete_setup(SessionSetup {
            token: old,
            seed: Some(Ok(vec![unread(old.user_id, "old")])),
            feed: Ok(subscription),
        });
        assert_eq!(outcome, SetupOutcome::Stale);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(sub.store().unwrap().is_empty());
        assert_eq!(sub.snapshot().user_id, Some(new_user));
    }

    #[test]
    fn test_identity_change_closes_old_subscription_once() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let first = Uuid::new_v4();
        let (_, closes) = start(&mut sub, first, vec![unread(first, "x")]);

        sub.observe_identity(Some(CurrentUser::new(Uuid::new_v4())));
        sub.observe_identity(None);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(sub.state(), ConnectionState::Disconnected);
        assert!(sub.store().is_none());
    }

    #[test]
    fn test_insert_alerts_once() {
        let (mut sub, alerts) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        start(&mut sub, user_id, vec![]);

        let n = unread(user_id, "Your plan is ready");
        sub.handle_feed_message(Some(FeedMessage::Change(ChangeEvent::Insert(n.clone()))));
        sub.handle_feed_message(Some(FeedMessage::Change(ChangeEvent::Insert(n))));

        let recorded = alerts.alerts();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].title, "Heads up");
        assert_eq!(recorded[0].body, "🔔 Your plan is ready");
        assert_eq!(alerts.chimes(), 1);
        assert_eq!(sub.snapshot().unread_count, 1);
    }

    #[test]
    fn test_update_is_silent() {
        let (mut sub, alerts) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        let seeded = unread(user_id, "a");
        start(&mut sub, user_id, vec![seeded.clone()]);

        sub.handle_feed_message(Some(FeedMessage::Change(ChangeEvent::Update(
            seeded.with_read(true),
        ))));
        assert!(alerts.alerts().is_empty());
        assert_eq!(sub.snapshot().unread_count, 0);
    }

    #[test]
    fn test_foreign_user_event_dropped() {
        let (mut sub, alerts) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        start(&mut sub, user_id, vec![]);

        sub.handle_feed_message(Some(FeedMessage::Change(ChangeEvent::Insert(unread(
            Uuid::new_v4(),
            "not yours",
        )))));
        assert!(sub.store().unwrap().is_empty());
        assert!(alerts.alerts().is_empty());
    }

    #[test]
    fn test_delete_event_removes() {
        let (mut sub, _) = subscriber(SyncConfig::default().with_live_deletes(true));
        let user_id = Uuid::new_v4();
        let seeded = unread(user_id, "a");
        start(&mut sub, user_id, vec![seeded.clone()]);

        sub.handle_feed_message(Some(FeedMessage::Change(ChangeEvent::Delete {
            id: seeded.id,
            user_id,
        })));
        assert_eq!(sub.snapshot().unread_count, 0);
        assert!(sub.store().unwrap().is_empty());
    }

    #[test]
    fn test_status_transitions() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        start(&mut sub, user_id, vec![unread(user_id, "a")]);

        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::TimedOut)));
        assert_eq!(sub.state(), ConnectionState::Error);
        assert_eq!(sub.store().unwrap().len(), 1);

        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::Closed)));
        assert_eq!(sub.state(), ConnectionState::Error);

        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::Subscribed)));
        assert_eq!(sub.state(), ConnectionState::Connected);

        sub.handle_feed_message(None);
        assert_eq!(sub.state(), ConnectionState::Disconnected);
        assert!(sub.feed_receiver().is_none());
    }

    #[test]
    fn test_retry_scheduling_and_reset() {
        let policy = RetryPolicy::exponential(2, Duration::from_millis(10), Duration::from_millis(100));
        let (mut sub, _) = subscriber(SyncConfig::default().with_retry(policy));
        let user_id = Uuid::new_v4();
        let (token, _) = start(&mut sub, user_id, vec![]);

        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::ChannelError("boom".into()))));
        let retry = sub.take_retry().unwrap();
        assert_eq!(retry.attempt, 1);
        assert_eq!(retry.delay, Duration::from_millis(10));
        assert!(sub.take_retry().is_none());

        assert!(sub.begin_resubscribe(token));
        assert_eq!(sub.state(), ConnectionState::Connecting);
        let outcome = sub.complete_setup(SessionSetup {
            token,
            seed: None,
            feed: Err(Error::Transport("still down".into())),
        });
        assert_eq!(outcome, SetupOutcome::Failed);
        assert_eq!(sub.take_retry().unwrap().attempt, 2);

        assert!(sub.begin_resubscribe(token));
        let (subscription, _tx, _) = feed();
        sub.complete_setup(SessionSetup {
            token,
            seed: None,
            feed: Ok(subscription),
        });
        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::Subscribed)));
        assert_eq!(sub.state(), ConnectionState::Connected);

        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::TimedOut)));
        assert_eq!(sub.take_retry().unwrap().attempt, 1);
    }

    #[test]
    fn test_stale_retry_ignored() {
        let policy = RetryPolicy::exponential(1, Duration::from_millis(10), Duration::from_millis(10));
        let (mut sub, _) = subscriber(SyncConfig::default().with_retry(policy));
        let (token, _) = start(&mut sub, Uuid::new_v4(), vec![]);
        sub.handle_feed_message(Some(FeedMessage::Status(FeedStatus::TimedOut)));
        sub.take_retry().unwrap();

        sub.observe_identity(Some(CurrentUser::new(Uuid::new_v4())));
        assert!(!sub.begin_resubscribe(token));
        assert_eq!(sub.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_apply_local_discards_stale_token() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        let seeded = unread(user_id, "a");
        let (token, _) = start(&mut sub, user_id, vec![seeded.clone()]);

        assert_eq!(sub.apply_local(token, LocalMutation::MarkRead(seeded.id)), Some(0));

        let stale = SessionToken {
            generation: token.generation + 7,
            user_id,
        };
        assert_eq!(sub.apply_local(stale, LocalMutation::DeleteAllRead), None);
        assert_eq!(sub.store().unwrap().len(), 1);
    }

    #[test]
    fn test_mutation_before_seed_is_replayed_on_seed() {
        let (mut sub, _) = subscriber(SyncConfig::default());
        let user_id = Uuid::new_v4();
        let token = sub.observe_identity(Some(CurrentUser::new(user_id))).unwrap();

        assert_eq!(sub.apply_local(token, LocalMutation::MarkAllRead), Some(0));
        assert!(!sub.snapshot().seeded);

        let (subscription, _tx, _) = feed();
        sub.complete_setup(SessionSetup {
            token,
            seed: Some(Ok(vec![unread(user_id, "a"), unread(user_id, "b")])),
            feed: Ok(subscription),
        });

        let snapshot = sub.snapshot();
        assert!(snapshot.seeded);
        assert_eq!(snapshot.notifications.len(), 2);
        assert_eq!(snapshot.unread_count, 0);

        // Replayed once only.
        sub.handle_feed_message(Some(FeedMessage::Change(ChangeEvent::Insert(unread(
            user_id, "c",
        )))));
        assert_eq!(sub.snapshot().unread_count, 1);
    }
}
