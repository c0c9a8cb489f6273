use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::coordinator::{CoordinatorPhase, SessionCoordinator};

pub type SharedCoordinator = Arc<Mutex<SessionCoordinator>>;

/// Live coordinators by session id, plus the invitation watcher task of each
/// session still waiting on invitees.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, SharedCoordinator>>>,
    watchers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a coordinator that already has a session. Pending sessions get
    /// a watcher that applies invitation snapshots until play begins.
    pub async fn register(&self, coordinator: SessionCoordinator) -> Option<SharedCoordinator> {
        let (session_id, phase) = {
            let session = coordinator.session()?;
            (session.id.clone(), coordinator.phase())
        };

        let shared = Arc::new(Mutex::new(coordinator));
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), shared.clone());

        if phase == CoordinatorPhase::AwaitingInvitations {
            self.start_watcher(&session_id, shared.clone()).await;
        }

        info!(session_id = %session_id, phase = %phase, "Session registered");
        Some(shared)
    }

    pub async fn get(&self, session_id: &str) -> Option<SharedCoordinator> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    #[cfg(test)]
    pub(crate) async fn is_watching(&self, session_id: &str) -> bool {
        self.watchers.lock().await.contains_key(session_id)
    }

    /// Drops a session, stopping its watcher and any pending score writes.
    pub async fn remove(&self, session_id: &str) -> bool {
        if let Some(watcher) = self.watchers.lock().await.remove(session_id) {
            watcher.abort();
        }
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(coordinator) = &removed {
            coordinator.lock().await.teardown();
        }
        removed.is_some()
    }

    async fn start_watcher(&self, session_id: &str, coordinator: SharedCoordinator) {
        let mut watcher = match coordinator.lock().await.watch_invitations().await {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not watch invitations");
                return;
            }
        };

        let watched_id = session_id.to_string();
        let handle = tokio::spawn(async move {
            // Answers that landed before the subscription are picked up here.
            if let Err(e) = coordinator.lock().await.refresh_invitations().await {
                warn!(session_id = %watched_id, error = %e, "Initial invitation refresh failed");
            }

            while let Some(snapshot) = watcher.next_snapshot().await {
                let mut coordinator = coordinator.lock().await;
                if coordinator.phase() != CoordinatorPhase::AwaitingInvitations {
                    break;
                }
                match coordinator.apply_invitation_snapshot(snapshot).await {
                    Ok(can_begin) => {
                        debug!(session_id = %watched_id, can_begin, "Invitation snapshot applied")
                    }
                    Err(e) => {
                        warn!(session_id = %watched_id, error = %e, "Failed to apply invitation snapshot")
                    }
                }
            }

            debug!(session_id = %watched_id, "Invitation watcher finished");
        });

        self.watchers
            .lock()
            .await
            .insert(session_id.to_string(), handle);
    }
}
