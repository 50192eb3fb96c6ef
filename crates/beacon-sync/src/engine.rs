//! Notification engine: the task that owns all sync state.
//!
//! One spawned task owns the [`FeedSubscriber`] (and through it the store and
//! the live subscription). Everything else talks to it over channels:
//! identity changes arrive on a `watch`, setup results and retry timers on
//! `mpsc`, gateway mutations as [`EngineCommand`]s with a oneshot reply. The
//! resulting state is published as a [`NotificationSnapshot`] on a `watch`.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use beacon_core::defaults;
use beacon_core::error::{Error, Result};
use beacon_core::events::{EventBus, EventEnvelope};
use beacon_core::models::{
    CurrentUser, FeedMessage, MutationOutcome, NotificationSnapshot, SessionToken,
};
use beacon_core::traits::{AlertSink, ChangeFeed, NoOpAlerts, NotificationRepository};

use crate::config::SyncConfig;
use crate::gateway::MutationGateway;
use crate::subscriber::{FeedSubscriber, LocalMutation, RetryRequest, SessionSetup};

/// Requests handled by the engine task.
#[derive(Debug)]
pub(crate) enum EngineCommand {
    /// Apply a mutation whose remote write succeeded.
    Apply {
        token: SessionToken,
        mutation: LocalMutation,
        reply: oneshot::Sender<MutationOutcome>,
    },
    /// A retry timer fired.
    Resubscribe { token: SessionToken },
}

/// Handle for controlling and observing a running engine.
///
/// Dropping the handle stops the engine.
pub struct EngineHandle {
    shutdown_tx: mpsc::Sender<()>,
    snapshot_rx: watch::Receiver<NotificationSnapshot>,
    events: EventBus,
    gateway: MutationGateway,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Current state.
    pub fn snapshot(&self) -> NotificationSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is notified whenever the published state changes.
    pub fn watch(&self) -> watch::Receiver<NotificationSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    /// Gateway for user-initiated mutations.
    pub fn gateway(&self) -> MutationGateway {
        self.gateway.clone()
    }

    /// Stop the engine and wait for it to release the live subscription.
    pub async fn shutdown(self) -> Result<()> {
        // A failed send means the engine already stopped.
        let _ = self.shutdown_tx.send(()).await;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Notification engine task failed: {e}")))
    }
}

/// Notification sync engine, ready to be started.
pub struct NotificationEngine {
    config: Arc<SyncConfig>,
    repo: Arc<dyn NotificationRepository>,
    feed: Arc<dyn ChangeFeed>,
    alerts: Arc<dyn AlertSink>,
    events: EventBus,
    identity: watch::Receiver<Option<CurrentUser>>,
}

impl NotificationEngine {
    /// Spawn the engine task and return a handle for control.
    pub fn start(self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (command_tx, command_rx) = mpsc::channel(defaults::COMMAND_CHANNEL_CAPACITY);
        let (setup_tx, setup_rx) = mpsc::channel(defaults::COMMAND_CHANNEL_CAPACITY);
        let (snapshot_tx, snapshot_rx) = watch::channel(NotificationSnapshot::default());
        let (session_tx, session_rx) = watch::channel(None);

        let gateway = MutationGateway::new(
            self.repo.clone(),
            self.alerts.clone(),
            self.events.clone(),
            command_tx.clone(),
            session_rx,
        );

        let task = EngineTask {
            subscriber: FeedSubscriber::new(
                self.config.clone(),
                self.alerts.clone(),
                self.events.clone(),
            ),
            config: self.config,
            repo: self.repo,
            feed: self.feed,
            identity: self.identity,
            identity_open: true,
            shutdown_rx,
            command_rx,
            command_tx,
            setup_rx,
            setup_tx,
            snapshot_tx,
            session_tx,
        };

        EngineHandle {
            shutdown_tx,
            snapshot_rx,
            events: self.events,
            gateway,
            task: tokio::spawn(task.run()),
        }
    }
}

/// Builder for configuring a notification engine.
pub struct EngineBuilder {
    repo: Arc<dyn NotificationRepository>,
    feed: Arc<dyn ChangeFeed>,
    identity: watch::Receiver<Option<CurrentUser>>,
    config: SyncConfig,
    alerts: Arc<dyn AlertSink>,
    events: Option<EventBus>,
}

impl EngineBuilder {
    /// Create a builder from the remote store, the change feed and the
    /// authentication context.
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        feed: Arc<dyn ChangeFeed>,
        identity: watch::Receiver<Option<CurrentUser>>,
    ) -> Self {
        Self {
            repo,
            feed,
            identity,
            config: SyncConfig::default(),
            alerts: Arc::new(NoOpAlerts),
            events: None,
        }
    }

    pub fn with_config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_alerts<A: AlertSink + 'static>(mut self, alerts: A) -> Self {
        self.alerts = Arc::new(alerts);
        self
    }

    /// Use an existing event bus, e.g. to subscribe before the engine starts.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> NotificationEngine {
        let events = self
            .events
            .unwrap_or_else(|| EventBus::new(self.config.event_bus_capacity));
        NotificationEngine {
            config: Arc::new(self.config),
            repo: self.repo,
            feed: self.feed,
            alerts: self.alerts,
            events,
            identity: self.identity,
        }
    }
}

// =============================================================================
// ENGINE TASK
// =============================================================================

enum Step {
    Shutdown,
    Identity,
    IdentityClosed,
    Setup(SessionSetup),
    Command(EngineCommand),
    Feed(Option<FeedMessage>),
}

struct EngineTask {
    config: Arc<SyncConfig>,
    repo: Arc<dyn NotificationRepository>,
    feed: Arc<dyn ChangeFeed>,
    subscriber: FeedSubscriber,
    identity: watch::Receiver<Option<CurrentUser>>,
    identity_open: bool,
    shutdown_rx: mpsc::Receiver<()>,
    command_rx: mpsc::Receiver<EngineCommand>,
    // Held so the command and setup channels never close while running.
    command_tx: mpsc::Sender<EngineCommand>,
    setup_rx: mpsc::Receiver<SessionSetup>,
    setup_tx: mpsc::Sender<SessionSetup>,
    snapshot_tx: watch::Sender<NotificationSnapshot>,
    session_tx: watch::Sender<Option<SessionToken>>,
}

async fn next_feed_message(rx: Option<&mut mpsc::Receiver<FeedMessage>>) -> Option<FeedMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl EngineTask {
    #[instrument(skip(self), name = "notification_engine", fields(subsystem = "sync"))]
    async fn run(mut self) {
        info!(
            fetch_limit = self.config.fetch_limit,
            live_deletes = self.config.live_deletes,
            retry_attempts = self.config.retry.max_attempts,
            "Notification engine started"
        );

        let user = *self.identity.borrow_and_update();
        self.on_identity(user);
        self.publish();

        loop {
            let step = tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => Step::Shutdown,
                changed = self.identity.changed(), if self.identity_open => match changed {
                    Ok(()) => Step::Identity,
                    Err(_) => Step::IdentityClosed,
                },
                Some(setup) = self.setup_rx.recv() => Step::Setup(setup),
                Some(command) = self.command_rx.recv() => Step::Command(command),
                message = next_feed_message(self.subscriber.feed_receiver()) => Step::Feed(message),
            };

            match step {
                Step::Shutdown => {
                    info!("Notification engine received shutdown signal");
                    break;
                }
                Step::Identity => {
                    let user = *self.identity.borrow_and_update();
                    self.on_identity(user);
                }
                Step::IdentityClosed => {
                    info!("Authentication context closed, ending session");
                    self.identity_open = false;
                    self.on_identity(None);
                }
                Step::Setup(setup) => {
                    self.subscriber.complete_setup(setup);
                }
                Step::Command(EngineCommand::Apply {
                    token,
                    mutation,
                    reply,
                }) => {
                    let outcome = match self.subscriber.apply_local(token, mutation) {
                        Some(_) => MutationOutcome::Applied,
                        None => MutationOutcome::Discarded,
                    };
                    // Callers read the snapshot as soon as they are answered.
                    self.publish();
                    if reply.send(outcome).is_err() {
                        debug!(op = mutation.kind().as_str(), "Mutation caller went away");
                    }
                }
                Step::Command(EngineCommand::Resubscribe { token }) => {
                    if self.subscriber.begin_resubscribe(token) {
                        self.spawn_setup(token, false);
                    }
                }
                Step::Feed(message) => self.subscriber.handle_feed_message(message),
            }

            if let Some(retry) = self.subscriber.take_retry() {
                self.schedule_retry(retry);
            }
            self.publish();
        }

        self.subscriber.end_session();
        self.setup_rx.close();
        while let Ok(setup) = self.setup_rx.try_recv() {
            self.subscriber.complete_setup(setup);
        }
        self.publish();
        info!("Notification engine stopped");
    }

    fn on_identity(&mut self, user: Option<CurrentUser>) {
        if let Some(token) = self.subscriber.observe_identity(user) {
            self.spawn_setup(token, true);
        }
    }

    /// Run the historical fetch (when seeding) and then the subscribe, in
    /// order, off the engine task.
    fn spawn_setup(&self, token: SessionToken, seed: bool) {
        let repo = self.repo.clone();
        let feed = self.feed.clone();
        let setup_tx = self.setup_tx.clone();
        let limit = self.config.fetch_limit;
        let request = self.config.subscribe_request(token.user_id);

        tokio::spawn(async move {
            let seed = if seed {
                let started = Instant::now();
                let page = repo.fetch_recent(token.user_id, limit).await;
                debug!(
                    user_id = %token.user_id,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Historical fetch finished"
                );
                Some(page)
            } else {
                None
            };
            debug!(channel = %request.channel_name(), "Opening live subscription");
            let feed = feed.subscribe(request).await;

            if let Err(unsent) = setup_tx.send(SessionSetup { token, seed, feed }).await {
                if let Ok(subscription) = unsent.0.feed {
                    subscription.close();
                }
            }
        });
    }

    fn schedule_retry(&self, retry: RetryRequest) {
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(retry.delay).await;
            let _ = command_tx
                .send(EngineCommand::Resubscribe { token: retry.token })
                .await;
        });
    }

    fn publish(&self) {
        let snapshot = self.subscriber.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        let token = self.subscriber.token();
        self.session_tx.send_if_modified(|current| {
            if *current == token {
                return false;
            }
            *current = token;
            true
        });
    }
}
