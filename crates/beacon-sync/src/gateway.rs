//! Mutation gateway: user-initiated writes.
//!
//! Every mutation is pessimistic. The remote write runs first, in the
//! caller's task; only when it succeeds is the matching local change sent to
//! the engine, which applies it if the session it was issued under is still
//! active.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error};
use uuid::Uuid;

use beacon_core::error::{Error, Result};
use beacon_core::events::{EventBus, MutationKind, SyncEvent};
use beacon_core::models::{
    MutationOutcome, NotificationFilter, NotificationPatch, SessionToken, UserSignal,
};
use beacon_core::traits::{AlertSink, NotificationRepository};

use crate::alerts::report;
use crate::engine::EngineCommand;
use crate::subscriber::LocalMutation;

/// Success toast for a mutation; mark-read is silent.
fn success_message(kind: MutationKind) -> Option<&'static str> {
    match kind {
        MutationKind::MarkRead => None,
        MutationKind::MarkAllRead => Some("All notifications marked as read"),
        MutationKind::Delete => Some("Notification deleted"),
        MutationKind::DeleteAllRead => Some("All read notifications deleted"),
    }
}

fn failure_message(kind: MutationKind) -> &'static str {
    match kind {
        MutationKind::MarkRead => "Failed to mark notification as read",
        MutationKind::MarkAllRead => "Failed to mark all notifications as read",
        MutationKind::Delete => "Failed to delete notification",
        MutationKind::DeleteAllRead => "Failed to delete notifications",
    }
}

/// Cloneable handle for mark-read and delete operations.
#[derive(Clone)]
pub struct MutationGateway {
    repo: Arc<dyn NotificationRepository>,
    alerts: Arc<dyn AlertSink>,
    events: EventBus,
    commands: mpsc::Sender<EngineCommand>,
    session: watch::Receiver<Option<SessionToken>>,
}

impl MutationGateway {
    pub(crate) fn new(
        repo: Arc<dyn NotificationRepository>,
        alerts: Arc<dyn AlertSink>,
        events: EventBus,
        commands: mpsc::Sender<EngineCommand>,
        session: watch::Receiver<Option<SessionToken>>,
    ) -> Self {
        Self {
            repo,
            alerts,
            events,
            commands,
            session,
        }
    }

    /// Mark one notification read.
    pub async fn mark_as_read(&self, id: Uuid) -> Result<MutationOutcome> {
        let token = self.active_session()?;
        let write = self
            .repo
            .update(id, NotificationPatch::mark_read(Utc::now()))
            .await;
        self.finish(token, LocalMutation::MarkRead(id), write).await
    }

    /// Mark every unread notification of the session's user read, in one bulk write.
    pub async fn mark_all_as_read(&self) -> Result<MutationOutcome> {
        let token = self.active_session()?;
        let write = self
            .repo
            .update_where(
                NotificationFilter::unread(token.user_id),
                NotificationPatch::mark_read(Utc::now()),
            )
            .await;
        self.finish(token, LocalMutation::MarkAllRead, write).await
    }

    /// Delete one notification.
    pub async fn delete(&self, id: Uuid) -> Result<MutationOutcome> {
        let token = self.active_session()?;
        let write = self.repo.delete(id).await;
        self.finish(token, LocalMutation::Delete(id), write).await
    }

    /// Delete every read notification of the session's user.
    pub async fn delete_all_read(&self) -> Result<MutationOutcome> {
        let token = self.active_session()?;
        let write = self
            .repo
            .delete_where(NotificationFilter::read(token.user_id))
            .await;
        self.finish(token, LocalMutation::DeleteAllRead, write).await
    }

    fn active_session(&self) -> Result<SessionToken> {
        (*self.session.borrow()).ok_or(Error::NoActiveSession)
    }

    async fn finish(
        &self,
        token: SessionToken,
        mutation: LocalMutation,
        write: Result<()>,
    ) -> Result<MutationOutcome> {
        let kind = mutation.kind();

        if let Err(e) = write {
            error!(
                subsystem = "gateway",
                op = kind.as_str(),
                user_id = %token.user_id,
                error = %e,
                "Remote write failed, local state unchanged"
            );
            report(self.alerts.as_ref(), UserSignal::failure(failure_message(kind)));
            self.events.emit(SyncEvent::MutationFailed {
                user_id: token.user_id,
                mutation: kind,
                notification_id: mutation.notification_id(),
                error: e.to_string(),
            });
            return Err(match e {
                Error::Write(_) => e,
                other => Error::Write(other.to_string()),
            });
        }

        let (reply, outcome) = oneshot::channel();
        let command = EngineCommand::Apply {
            token,
            mutation,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            debug!(op = kind.as_str(), "Engine stopped before the mutation was applied");
            return Ok(MutationOutcome::Discarded);
        }
        let outcome = outcome.await.unwrap_or(MutationOutcome::Discarded);

        if outcome == MutationOutcome::Applied {
            if let Some(message) = success_message(kind) {
                report(self.alerts.as_ref(), UserSignal::success(message));
            }
        }
        Ok(outcome)
    }
}
