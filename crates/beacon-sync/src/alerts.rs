//! Alert formatting and alert sinks.
//!
//! Alerts are best-effort: every sink error is logged at debug level and
//! dropped so that UI or audio failures never affect sync state.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use beacon_core::defaults;
use beacon_core::error::{Error, Result};
use beacon_core::models::{Notification, UserSignal};
use beacon_core::traits::AlertSink;

/// Truncate `message` to `max_chars` characters, appending an ellipsis when cut.
pub fn preview(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{}", &message[..cut], defaults::PREVIEW_ELLIPSIS),
        None => message.to_string(),
    }
}

/// Alert body for a newly arrived notification: `"{icon} {preview}"`.
pub fn alert_body(notification: &Notification, max_chars: usize) -> String {
    let icon = notification
        .icon
        .as_deref()
        .filter(|i| !i.is_empty())
        .unwrap_or(defaults::ALERT_ICON);
    format!("{} {}", icon, preview(&notification.message, max_chars))
}

/// Raise the new-notification alert and, if enabled, the chime.
pub(crate) fn announce(
    alerts: &dyn AlertSink,
    notification: &Notification,
    preview_length: usize,
    chime: bool,
) {
    let body = alert_body(notification, preview_length);
    if let Err(e) = alerts.notify_user(notification.display_title(), &body) {
        debug!(notification_id = %notification.id, error = %e, "Alert display failed, ignoring");
    }
    if chime {
        if let Err(e) = alerts.play_chime() {
            debug!(error = %e, "Chime playback failed, ignoring");
        }
    }
}

/// Emit a user-facing mutation signal.
pub(crate) fn report(alerts: &dyn AlertSink, signal: UserSignal) {
    if let Err(e) = alerts.signal(&signal) {
        debug!(error = %e, signal = signal.message(), "Signal delivery failed, ignoring");
    }
}

// =============================================================================
// SINKS
// =============================================================================

/// Alert sink that writes alerts to the tracing log. Used by the demo binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn notify_user(&self, title: &str, body: &str) -> Result<()> {
        info!(title, body, "New notification");
        Ok(())
    }

    fn play_chime(&self) -> Result<()> {
        debug!("Chime");
        Ok(())
    }

    fn signal(&self, signal: &UserSignal) -> Result<()> {
        match signal {
            UserSignal::Success(message) => info!(message = %message, "Mutation succeeded"),
            UserSignal::Failure(message) => info!(message = %message, "Mutation failed"),
        }
        Ok(())
    }
}

/// An alert captured by [`RecordingAlerts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedAlert {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct Recorded {
    alerts: Vec<RecordedAlert>,
    chimes: usize,
    signals: Vec<UserSignal>,
    fail_notify: bool,
    fail_chime: bool,
}

/// Alert sink that records everything it receives.
///
/// Notify and chime failures can be injected to check they are swallowed.
#[derive(Debug, Clone, Default)]
pub struct RecordingAlerts {
    state: Arc<Mutex<Recorded>>,
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `play_chime` fail (the chime is still counted).
    pub fn fail_chime(self) -> Self {
        self.lock().fail_chime = true;
        self
    }

    /// Make `notify_user` fail (the alert is still recorded).
    pub fn fail_notify(self) -> Self {
        self.lock().fail_notify = true;
        self
    }

    pub fn alerts(&self) -> Vec<RecordedAlert> {
        self.lock().alerts.clone()
    }

    pub fn chimes(&self) -> usize {
        self.lock().chimes
    }

    pub fn signals(&self) -> Vec<UserSignal> {
        self.lock().signals.clone()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.alerts.clear();
        state.chimes = 0;
        state.signals.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AlertSink for RecordingAlerts {
    fn notify_user(&self, title: &str, body: &str) -> Result<()> {
        let mut state = self.lock();
        state.alerts.push(RecordedAlert {
            title: title.to_string(),
            body: body.to_string(),
        });
        if state.fail_notify {
            return Err(Error::Internal("alert display unavailable".into()));
        }
        Ok(())
    }

    fn play_chime(&self) -> Result<()> {
        let mut state = self.lock();
        state.chimes += 1;
        if state.fail_chime {
            return Err(Error::Internal("audio playback blocked".into()));
        }
        Ok(())
    }

    fn signal(&self, signal: &UserSignal) -> Result<()> {
        self.lock().signals.push(signal.clone());
        Ok(())
    }
}
