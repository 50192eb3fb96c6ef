//! Shared helpers for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use beacon_sync::{
    ConnectionState, CurrentUser, EngineBuilder, EngineHandle, EventBus, InMemoryBackend,
    Notification, NotificationKind, NotificationSnapshot, RecordingAlerts, SyncConfig,
};
use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

pub struct Harness {
    pub backend: InMemoryBackend,
    pub alerts: RecordingAlerts,
    pub events: EventBus,
    pub identity: watch::Sender<Option<CurrentUser>>,
    pub handle: EngineHandle,
    pub state: watch::Receiver<NotificationSnapshot>,
}

impl Harness {
    pub fn start(backend: InMemoryBackend, config: SyncConfig) -> Self {
        Self::start_with_alerts(backend, config, RecordingAlerts::new())
    }

    pub fn start_with_alerts(
        backend: InMemoryBackend,
        config: SyncConfig,
        alerts: RecordingAlerts,
    ) -> Self {
        let (identity, identity_rx) = watch::channel(None);
        let events = EventBus::new(256);
        let handle = EngineBuilder::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            identity_rx,
        )
        .with_config(config)
        .with_alerts(alerts.clone())
        .with_event_bus(events.clone())
        .build()
        .start();
        let state = handle.watch();

        Self {
            backend,
            alerts,
            events,
            identity,
            handle,
            state,
        }
    }

    pub fn set_user(&self, user_id: Option<Uuid>) {
        self.identity.send_replace(user_id.map(CurrentUser::new));
    }

    /// Sign in and wait for the seed and the subscription acknowledgement.
    pub async fn sign_in(&mut self, user_id: Uuid) -> NotificationSnapshot {
        self.set_user(Some(user_id));
        self.wait_for(|s| {
            s.user_id == Some(user_id) && s.seeded && s.connection == ConnectionState::Connected
        })
        .await
    }

    pub async fn wait_for(
        &mut self,
        ready: impl Fn(&NotificationSnapshot) -> bool,
    ) -> NotificationSnapshot {
        let snapshot = tokio::time::timeout(Duration::from_secs(5), self.state.wait_for(|s| ready(s)))
            .await
            .expect("timed out waiting for engine state")
            .expect("engine stopped");
        (*snapshot).clone()
    }

    /// Let spawned tasks and timers run without waiting for a condition.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn note(user_id: Uuid, minutes_ago: i64, read: bool) -> Notification {
    Notification::new(
        user_id,
        NotificationKind::Reminder,
        "Workout reminder",
        format!("Session scheduled {minutes_ago} minutes ago"),
    )
    .with_created_at(Utc::now() - chrono::Duration::minutes(minutes_ago))
    .with_read(read)
}

/// Three notifications, two of them unread.
pub fn three_seeded(user_id: Uuid) -> Vec<Notification> {
    vec![
        note(user_id, 30, false),
        note(user_id, 20, true),
        note(user_id, 10, false),
    ]
}
