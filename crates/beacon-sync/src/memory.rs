//! In-memory remote store and change feed.
//!
//! [`InMemoryBackend`] implements both [`NotificationRepository`] and
//! [`ChangeFeed`] over a shared row table. Writes fan out to open
//! subscriptions the way a database change feed would, which makes it the
//! backend for the demo binary and for deterministic engine tests.
//!
//! ## Usage
//!
//! ```rust
//! use beacon_sync::memory::InMemoryBackend;
//! use beacon_core::{Notification, NotificationKind};
//! use uuid::Uuid;
//!
//! let backend = InMemoryBackend::new();
//! let user_id = Uuid::new_v4();
//! backend.seed_rows(vec![Notification::new(
//!     user_id,
//!     NotificationKind::Reminder,
//!     "Hydrate",
//!     "Drink a glass of water",
//! )]);
//! assert_eq!(backend.rows_for(user_id).len(), 1);
//! ```
//!
//! Failures, latency and acknowledgement behaviour can be changed at any
//! time, including while an engine is running against the backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use beacon_core::defaults;
use beacon_core::error::{Error, Result};
use beacon_core::models::{
    ChangeEvent, FeedMessage, FeedStatus, Notification, NotificationFilter, NotificationPatch,
    SubscribeRequest,
};
use beacon_core::traits::{ChangeFeed, FeedHandle, FeedSubscription, NotificationRepository};

/// A call made against the backend, for assertions.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    FetchRecent { user_id: Uuid, limit: i64 },
    Update { id: Uuid, patch: NotificationPatch },
    UpdateWhere { filter: NotificationFilter, patch: NotificationPatch },
    Delete { id: Uuid },
    DeleteWhere { filter: NotificationFilter },
    Subscribe { request: SubscribeRequest },
}

struct Subscriber {
    request: SubscribeRequest,
    tx: mpsc::Sender<FeedMessage>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl Subscriber {
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

struct State {
    rows: Vec<Notification>,
    subscribers: Vec<Subscriber>,
    calls: Vec<BackendCall>,
    fail_fetch: bool,
    fail_subscribe: bool,
    fail_writes: bool,
    auto_ack: bool,
    fetch_latency: Duration,
    subscribe_latency: Duration,
    write_latency: Duration,
}

impl Default for State {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            subscribers: Vec::new(),
            calls: Vec::new(),
            fail_fetch: false,
            fail_subscribe: false,
            fail_writes: false,
            auto_ack: true,
            fetch_latency: Duration::ZERO,
            subscribe_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
        }
    }
}

impl State {
    fn broadcast(&mut self, event: ChangeEvent) {
        let user_id = event.user_id();
        let kind = event.kind();
        for sub in self
            .subscribers
            .iter()
            .filter(|s| s.is_open() && s.request.user_id == user_id && s.request.wants(kind))
        {
            if sub
                .tx
                .try_send(FeedMessage::Change(event.clone()))
                .is_err()
            {
                warn!(channel = %sub.request.channel_name(), "Feed buffer full, dropping change");
            }
        }
    }

    fn patch_rows(&mut self, matches: impl Fn(&Notification) -> bool, patch: &NotificationPatch) {
        let mut changed = Vec::new();
        for row in self.rows.iter_mut().filter(|r| matches(r)) {
            let before = row.clone();
            patch.apply_to(row);
            if *row != before {
                changed.push(row.clone());
            }
        }
        for row in changed {
            self.broadcast(ChangeEvent::Update(row));
        }
    }

    fn delete_rows(&mut self, matches: impl Fn(&Notification) -> bool) {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.rows).into_iter().partition(|r| matches(r));
        self.rows = kept;
        for row in removed {
            self.broadcast(ChangeEvent::Delete {
                id: row.id,
                user_id: row.user_id,
            });
        }
    }
}

struct MemoryFeedHandle {
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicUsize>,
}

impl FeedHandle for MemoryFeedHandle {
    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// In-memory notification table with a live change feed.
#[derive(Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<State>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every historical fetch.
    pub fn with_fetch_latency(self, latency: Duration) -> Self {
        self.lock().fetch_latency = latency;
        self
    }

    /// Delay every subscribe before it returns.
    pub fn with_subscribe_latency(self, latency: Duration) -> Self {
        self.lock().subscribe_latency = latency;
        self
    }

    /// Delay every remote write.
    pub fn with_write_latency(self, latency: Duration) -> Self {
        self.lock().write_latency = latency;
        self
    }

    /// Do not acknowledge new subscriptions; use [`Self::push_status`] instead.
    pub fn with_manual_ack(self) -> Self {
        self.lock().auto_ack = false;
        self
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.lock().fail_fetch = fail;
    }

    pub fn set_fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Load rows without notifying any subscription.
    pub fn seed_rows(&self, rows: Vec<Notification>) {
        self.lock().rows.extend(rows);
    }

    /// Insert a row server-side and fan the insert out to subscriptions.
    pub fn insert(&self, notification: Notification) {
        let mut state = self.lock();
        state.rows.push(notification.clone());
        state.broadcast(ChangeEvent::Insert(notification));
    }

    /// Update a row server-side and fan the update out.
    pub fn update_row(&self, notification: Notification) {
        let mut state = self.lock();
        match state.rows.iter_mut().find(|r| r.id == notification.id) {
            Some(row) => *row = notification.clone(),
            None => state.rows.push(notification.clone()),
        }
        state.broadcast(ChangeEvent::Update(notification));
    }

    /// Push a raw message to every open subscription of `user_id`, bypassing
    /// the table and the event filter. Used to replay or reorder deliveries.
    pub fn push(&self, user_id: Uuid, message: FeedMessage) {
        let state = self.lock();
        for sub in state
            .subscribers
            .iter()
            .filter(|s| s.is_open() && s.request.user_id == user_id)
        {
            let _ = sub.tx.try_send(message.clone());
        }
    }

    /// Push a transport status to every open subscription of `user_id`.
    pub fn push_status(&self, user_id: Uuid, status: FeedStatus) {
        self.push(user_id, FeedMessage::Status(status));
    }

    pub fn rows(&self) -> Vec<Notification> {
        self.lock().rows.clone()
    }

    pub fn rows_for(&self, user_id: Uuid) -> Vec<Notification> {
        self.lock()
            .rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Subscriptions of `user_id` that are neither closed nor dropped.
    pub fn open_subscriptions(&self, user_id: Uuid) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.is_open() && s.request.user_id == user_id)
            .count()
    }

    /// Total `close()` calls made on subscriptions of `user_id`.
    pub fn close_calls(&self, user_id: Uuid) -> usize {
        self.lock()
            .subscribers
            .iter()
            .filter(|s| s.request.user_id == user_id)
            .map(|s| s.close_calls.load(Ordering::SeqCst))
            .sum()
    }

    /// Subscribe calls made for `user_id`, including failed ones.
    pub fn subscribe_count(&self, user_id: Uuid) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, BackendCall::Subscribe { request } if request.user_id == user_id))
            .count()
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a write and return its latency, or fail when writes are broken.
    async fn begin_write(&self, call: BackendCall) -> Result<()> {
        let (latency, fail) = {
            let mut state = self.lock();
            state.calls.push(call);
            (state.write_latency, state.fail_writes)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(Error::Write("simulated write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryBackend {
    async fn fetch_recent(&self, user_id: Uuid, limit: i64) -> Result<Vec<Notification>> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(BackendCall::FetchRecent { user_id, limit });
            state.fetch_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let state = self.lock();
        if state.fail_fetch {
            return Err(Error::Fetch("simulated fetch failure".into()));
        }
        let mut rows: Vec<Notification> = state
            .rows
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(usize::try_from(limit).unwrap_or(0));
        debug!(user_id = %user_id, result_count = rows.len(), "In-memory fetch");
        Ok(rows)
    }

    async fn update(&self, id: Uuid, patch: NotificationPatch) -> Result<()> {
        self.begin_write(BackendCall::Update {
            id,
            patch: patch.clone(),
        })
        .await?;
        self.lock().patch_rows(|r| r.id == id, &patch);
        Ok(())
    }

    async fn update_where(&self, filter: NotificationFilter, patch: NotificationPatch) -> Result<()> {
        self.begin_write(BackendCall::UpdateWhere {
            filter,
            patch: patch.clone(),
        })
        .await?;
        self.lock().patch_rows(|r| filter.matches(r), &patch);
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.begin_write(BackendCall::Delete { id }).await?;
        self.lock().delete_rows(|r| r.id == id);
        Ok(())
    }

    async fn delete_where(&self, filter: NotificationFilter) -> Result<()> {
        self.begin_write(BackendCall::DeleteWhere { filter }).await?;
        self.lock().delete_rows(|r| filter.matches(r));
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for InMemoryBackend {
    async fn subscribe(&self, request: SubscribeRequest) -> Result<FeedSubscription> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(BackendCall::Subscribe {
                request: request.clone(),
            });
            state.subscribe_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.fail_subscribe {
            return Err(Error::Transport(format!(
                "simulated subscribe failure on {}",
                request.channel_name()
            )));
        }

        let (tx, rx) = mpsc::channel(defaults::FEED_CHANNEL_CAPACITY);
        if state.auto_ack {
            let _ = tx.try_send(FeedMessage::Status(FeedStatus::Subscribed));
        }
        let closed = Arc::new(AtomicBool::new(false));
        let close_calls = Arc::new(AtomicUsize::new(0));
        debug!(channel = %request.channel_name(), "In-memory subscription opened");
        state.subscribers.push(Subscriber {
            request,
            tx,
            closed: closed.clone(),
            close_calls: close_calls.clone(),
        });

        Ok(FeedSubscription::new(
            rx,
            Box::new(MemoryFeedHandle {
                closed,
                close_calls,
            }),
        ))
    }
}
