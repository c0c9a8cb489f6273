use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use super::{
    errors::{BackendError, SessionError},
    models::{InvitationSnapshot, InvitationStatus, PlayerScoreRecord, SessionStatus},
    repository::SessionBackend,
};

const FEED_CAPACITY: usize = 32;

/// Per-session broadcast channels carrying full invitation snapshots.
#[derive(Debug, Clone, Default)]
pub struct InvitationFeed {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<InvitationSnapshot>>>>,
}

impl InvitationFeed {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Sends a snapshot to everyone watching its session. Snapshots for
    /// sessions nobody watches are dropped.
    pub async fn publish(&self, snapshot: InvitationSnapshot) {
        let channels = self.channels.read().await;
        let session_id = snapshot.session_id.clone();

        match channels.get(&session_id) {
            Some(sender) => match sender.send(snapshot) {
                Ok(receivers) => {
                    debug!(session_id = %session_id, receivers, "Invitation snapshot published")
                }
                Err(_) => {
                    debug!(session_id = %session_id, "Invitation snapshot published with no receivers")
                }
            },
            None => debug!(session_id = %session_id, "No watchers for invitation snapshot"),
        }
    }

    pub async fn subscribe(&self, session_id: &str) -> InvitationWatcher {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(session_id) {
                return InvitationWatcher::new(session_id, sender.subscribe());
            }
        }

        let mut channels = self.channels.write().await;
        let sender = channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0);
        InvitationWatcher::new(session_id, sender.subscribe())
    }

    pub async fn close(&self, session_id: &str) {
        self.channels.write().await.remove(session_id);
    }
}

/// Receives invitation snapshots for one session.
pub struct InvitationWatcher {
    session_id: String,
    receiver: broadcast::Receiver<InvitationSnapshot>,
}

impl InvitationWatcher {
    pub fn new(session_id: &str, receiver: broadcast::Receiver<InvitationSnapshot>) -> Self {
        Self {
            session_id: session_id.to_string(),
            receiver,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Waits for the next snapshot. Missed snapshots are skipped since each
    /// one carries the complete state. `None` once the feed is closed.
    pub async fn next_snapshot(&mut self) -> Option<InvitationSnapshot> {
        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(session_id = %self.session_id, skipped, "Invitation watcher lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// The invitee side of an invitation.
pub struct InvitationService {
    backend: Arc<dyn SessionBackend>,
}

impl InvitationService {
    pub fn new(backend: Arc<dyn SessionBackend>) -> Self {
        Self { backend }
    }

    /// Records the invitee's answer. Accepting also creates the invitee's
    /// zero-score row. Giving the same answer twice is harmless; changing
    /// an answer is refused.
    #[instrument(skip(self))]
    pub async fn respond(
        &self,
        session_id: &str,
        invitee_id: &str,
        accept: bool,
    ) -> Result<InvitationStatus, SessionError> {
        let session = self
            .backend
            .fetch_session(session_id)
            .await?
            .ok_or_else(|| SessionError::SessionNotFound(session_id.to_string()))?;

        if session.status.is_terminal() {
            return Err(SessionError::InvalidState {
                action: "respond to an invitation",
                phase: session.status.as_ref().to_string(),
            });
        }

        let invitation = self
            .backend
            .fetch_invitations(session_id)
            .await?
            .into_iter()
            .find(|invitation| invitation.invitee_id == invitee_id)
            .ok_or_else(|| SessionError::PlayerNotFound(invitee_id.to_string()))?;

        let status = if accept {
            InvitationStatus::Accepted
        } else {
            InvitationStatus::Declined
        };

        // An answer is final. Repeating it is fine; flipping it is not.
        if invitation.status != InvitationStatus::Pending && invitation.status != status {
            return Err(SessionError::AlreadyAnswered(
                invitation.status.as_ref().to_string(),
            ));
        }

        if accept {
            // Score row first so the host never sees an accepted invitee without one.
            let row = PlayerScoreRecord::zero(invitee_id, invitation.nickname.clone());
            match self.backend.create_score_records(session_id, &[row]).await {
                Ok(()) => {}
                Err(BackendError::Conflict(_)) => {
                    debug!(session_id, invitee_id, "Score row already present for invitee")
                }
                Err(err) => return Err(err.into()),
            }
        } else if session.status == SessionStatus::Active {
            warn!(session_id, invitee_id, "Invitee declined after the session started");
        }

        self.backend
            .update_invitation_status(session_id, invitee_id, status)
            .await?;

        info!(session_id, invitee_id, status = status.as_ref(), "Invitation answered");
        Ok(status)
    }
}
