use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    errors::BackendError,
    invitations::{InvitationFeed, InvitationWatcher},
    models::{
        CompletionRecord, GameDefinition, InvitationSnapshot, InvitationStatus, NewInvitation,
        NewSession, PlayerScoreRecord, SessionInvitation, SessionRecord, SessionStatus,
    },
};

/// Operations the session lifecycle needs from the hosted backend.
///
/// Implementations must enforce uniqueness of (session, player) score rows
/// and report duplicates as [`BackendError::Conflict`]; callers rely on that
/// to make repeated inserts idempotent.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn fetch_game(&self, game_id: &str) -> Result<Option<GameDefinition>, BackendError>;
    async fn fetch_house_member_ids(&self, house_id: &str)
        -> Result<HashSet<String>, BackendError>;

    /// Inserts a session row and returns its id.
    async fn create_session(&self, session: &NewSession) -> Result<String, BackendError>;
    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionRecord>, BackendError>;
    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), BackendError>;

    /// Inserts zero-score rows. Rows that already exist are left untouched and
    /// reported as a `Conflict` once every other row has been inserted.
    async fn create_score_records(
        &self,
        session_id: &str,
        players: &[PlayerScoreRecord],
    ) -> Result<(), BackendError>;
    async fn fetch_scores(&self, session_id: &str) -> Result<Vec<PlayerScoreRecord>, BackendError>;
    /// Last write wins, keyed by (session, player).
    async fn upsert_score(
        &self,
        session_id: &str,
        record: &PlayerScoreRecord,
    ) -> Result<(), BackendError>;

    async fn create_invitations(
        &self,
        session_id: &str,
        invitations: &[NewInvitation],
    ) -> Result<(), BackendError>;
    async fn update_invitation_status(
        &self,
        session_id: &str,
        invitee_id: &str,
        status: InvitationStatus,
    ) -> Result<(), BackendError>;
    async fn delete_invitation(&self, session_id: &str, invitee_id: &str)
        -> Result<(), BackendError>;
    async fn fetch_invitations(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionInvitation>, BackendError>;
    async fn subscribe_invitations(&self, session_id: &str)
        -> Result<InvitationWatcher, BackendError>;
    /// Ends every watcher of this session's invitations.
    async fn close_invitations(&self, session_id: &str);

    /// Writes every final score, marks winners and flips the session to
    /// `completed` as one unit. On failure nothing changes.
    async fn complete_session(
        &self,
        session_id: &str,
        results: &[CompletionRecord],
    ) -> Result<(), BackendError>;
}

#[derive(Debug, Clone)]
struct StoredScore {
    record: PlayerScoreRecord,
    is_winner: bool,
}

#[derive(Debug, Default)]
struct BackendState {
    games: HashMap<String, GameDefinition>,
    house_members: HashMap<String, HashSet<String>>,
    sessions: HashMap<String, SessionRecord>,
    scores: HashMap<(String, String), StoredScore>,
    /// Insertion order is kept so snapshots are stable.
    invitations: HashMap<String, Vec<SessionInvitation>>,
    upsert_failures: VecDeque<BackendError>,
    completion_failures: VecDeque<BackendError>,
    upsert_history: Vec<(String, PlayerScoreRecord)>,
}

/// In-memory implementation of [`SessionBackend`] for development and testing.
///
/// Enforces the same uniqueness and atomicity rules the hosted backend does.
/// Failures can be queued up front to exercise retry paths.
pub struct InMemorySessionBackend {
    state: Mutex<BackendState>,
    feed: InvitationFeed,
}

impl Default for InMemorySessionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            feed: InvitationFeed::new(),
        }
    }

    pub async fn add_game(&self, game: GameDefinition) {
        let mut state = self.state.lock().await;
        state.games.insert(game.id.clone(), game);
    }

    pub async fn add_house_member(&self, house_id: &str, user_id: &str) {
        let mut state = self.state.lock().await;
        state
            .house_members
            .entry(house_id.to_string())
            .or_default()
            .insert(user_id.to_string());
    }

    /// Makes the next `upsert_score` calls fail with these errors, in order.
    pub async fn fail_next_upserts(&self, errors: Vec<BackendError>) {
        let mut state = self.state.lock().await;
        state.upsert_failures.extend(errors);
    }

    pub async fn fail_next_completion(&self, error: BackendError) {
        let mut state = self.state.lock().await;
        state.completion_failures.push_back(error);
    }

    /// Every `upsert_score` attempt, failed ones included.
    pub async fn upsert_history(&self) -> Vec<(String, PlayerScoreRecord)> {
        self.state.lock().await.upsert_history.clone()
    }

    pub async fn winner_ids(&self, session_id: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let mut winners: Vec<String> = state
            .scores
            .iter()
            .filter(|((session, _), stored)| session == session_id && stored.is_winner)
            .map(|((_, player), _)| player.clone())
            .collect();
        winners.sort();
        winners
    }

    async fn publish_invitations(&self, session_id: &str) {
        let invitations = {
            let state = self.state.lock().await;
            state
                .invitations
                .get(session_id)
                .cloned()
                .unwrap_or_default()
        };
        self.feed
            .publish(InvitationSnapshot {
                session_id: session_id.to_string(),
                invitations,
            })
            .await;
    }
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn fetch_game(&self, game_id: &str) -> Result<Option<GameDefinition>, BackendError> {
        Ok(self.state.lock().await.games.get(game_id).cloned())
    }

    async fn fetch_house_member_ids(
        &self,
        house_id: &str,
    ) -> Result<HashSet<String>, BackendError> {
        Ok(self
            .state
            .lock()
            .await
            .house_members
            .get(house_id)
            .cloned()
            .unwrap_or_default())
    }

    #[instrument(skip(self, session))]
    async fn create_session(&self, session: &NewSession) -> Result<String, BackendError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: Uuid::new_v4().to_string(),
            game_id: session.game_id.clone(),
            house_id: session.house_id.clone(),
            creator_id: session.creator_id.clone(),
            status: session.status,
            scoring: session.scoring.clone(),
            created_at: now,
            started_at: (session.status == SessionStatus::Active).then_some(now),
            completed_at: None,
        };
        let id = record.id.clone();

        debug!(session_id = %id, status = session.status.as_ref(), "Creating session in memory");
        self.state.lock().await.sessions.insert(id.clone(), record);
        Ok(id)
    }

    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionRecord>, BackendError> {
        Ok(self.state.lock().await.sessions.get(session_id).cloned())
    }

    #[instrument(skip(self))]
    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BackendError::NotFound(format!("session {}", session_id)))?;

        if session.status.is_terminal() {
            warn!(session_id = %session_id, current = session.status.as_ref(), "Refusing status change on finished session");
            return Err(BackendError::Database(format!(
                "session {} is already {}",
                session_id,
                session.status.as_ref()
            )));
        }

        session.status = status;
        match status {
            SessionStatus::Active => session.started_at = Some(at),
            SessionStatus::Completed => session.completed_at = Some(at),
            SessionStatus::Pending | SessionStatus::Cancelled => {}
        }
        Ok(())
    }

    #[instrument(skip(self, players), fields(count = players.len()))]
    async fn create_score_records(
        &self,
        session_id: &str,
        players: &[PlayerScoreRecord],
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if !state.sessions.contains_key(session_id) {
            return Err(BackendError::NotFound(format!("session {}", session_id)));
        }

        let mut duplicates = Vec::new();
        for player in players {
            let key = (session_id.to_string(), player.player_id.clone());
            if state.scores.contains_key(&key) {
                duplicates.push(player.player_id.clone());
                continue;
            }
            state.scores.insert(
                key,
                StoredScore {
                    record: player.clone(),
                    is_winner: false,
                },
            );
        }

        if duplicates.is_empty() {
            Ok(())
        } else {
            debug!(session_id = %session_id, ?duplicates, "Score rows already exist");
            Err(BackendError::Conflict(format!(
                "score rows already exist for {}",
                duplicates.join(", ")
            )))
        }
    }

    async fn fetch_scores(&self, session_id: &str) -> Result<Vec<PlayerScoreRecord>, BackendError> {
        let state = self.state.lock().await;
        let mut scores: Vec<PlayerScoreRecord> = state
            .scores
            .iter()
            .filter(|((session, _), _)| session == session_id)
            .map(|(_, stored)| stored.record.clone())
            .collect();
        scores.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        Ok(scores)
    }

    #[instrument(skip(self, record), fields(player_id = %record.player_id))]
    async fn upsert_score(
        &self,
        session_id: &str,
        record: &PlayerScoreRecord,
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        state
            .upsert_history
            .push((session_id.to_string(), record.clone()));

        if let Some(error) = state.upsert_failures.pop_front() {
            debug!(error = %error, "Injected upsert failure");
            return Err(error);
        }

        match state.sessions.get(session_id) {
            Some(session) if session.status.is_terminal() => {
                return Err(BackendError::Database(format!(
                    "session {} is already {}",
                    session_id,
                    session.status.as_ref()
                )))
            }
            Some(_) => {}
            None => return Err(BackendError::NotFound(format!("session {}", session_id))),
        }

        let key = (session_id.to_string(), record.player_id.clone());
        let is_winner = state.scores.get(&key).is_some_and(|s| s.is_winner);
        state.scores.insert(
            key,
            StoredScore {
                record: record.clone(),
                is_winner,
            },
        );
        Ok(())
    }

    #[instrument(skip(self, invitations), fields(count = invitations.len()))]
    async fn create_invitations(
        &self,
        session_id: &str,
        invitations: &[NewInvitation],
    ) -> Result<(), BackendError> {
        {
            let mut state = self.state.lock().await;
            if !state.sessions.contains_key(session_id) {
                return Err(BackendError::NotFound(format!("session {}", session_id)));
            }
            let rows = state.invitations.entry(session_id.to_string()).or_default();
            for invitation in invitations {
                if rows.iter().any(|row| row.invitee_id == invitation.invitee_id) {
                    return Err(BackendError::Conflict(format!(
                        "invitation already exists for {}",
                        invitation.invitee_id
                    )));
                }
            }
            rows.extend(invitations.iter().map(|invitation| SessionInvitation {
                session_id: session_id.to_string(),
                invitee_id: invitation.invitee_id.clone(),
                nickname: invitation.nickname.clone(),
                status: InvitationStatus::Pending,
            }));
        }
        self.publish_invitations(session_id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_invitation_status(
        &self,
        session_id: &str,
        invitee_id: &str,
        status: InvitationStatus,
    ) -> Result<(), BackendError> {
        {
            let mut state = self.state.lock().await;
            let invitation = state
                .invitations
                .get_mut(session_id)
                .and_then(|rows| rows.iter_mut().find(|row| row.invitee_id == invitee_id))
                .ok_or_else(|| {
                    BackendError::NotFound(format!("invitation for {} in {}", invitee_id, session_id))
                })?;
            invitation.status = status;
        }
        self.publish_invitations(session_id).await;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_invitation(
        &self,
        session_id: &str,
        invitee_id: &str,
    ) -> Result<(), BackendError> {
        {
            let mut state = self.state.lock().await;
            let rows = state
                .invitations
                .get_mut(session_id)
                .ok_or_else(|| BackendError::NotFound(format!("invitations for {}", session_id)))?;
            let before = rows.len();
            rows.retain(|row| row.invitee_id != invitee_id);
            if rows.len() == before {
                return Err(BackendError::NotFound(format!(
                    "invitation for {} in {}",
                    invitee_id, session_id
                )));
            }
        }
        self.publish_invitations(session_id).await;
        Ok(())
    }

    async fn fetch_invitations(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionInvitation>, BackendError> {
        Ok(self
            .state
            .lock()
            .await
            .invitations
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe_invitations(
        &self,
        session_id: &str,
    ) -> Result<InvitationWatcher, BackendError> {
        Ok(self.feed.subscribe(session_id).await)
    }

    async fn close_invitations(&self, session_id: &str) {
        self.feed.close(session_id).await;
    }

    #[instrument(skip(self, results), fields(players = results.len()))]
    async fn complete_session(
        &self,
        session_id: &str,
        results: &[CompletionRecord],
    ) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;

        if let Some(error) = state.completion_failures.pop_front() {
            debug!(error = %error, "Injected completion failure");
            return Err(error);
        }

        match state.sessions.get(session_id) {
            Some(session) if session.status != SessionStatus::Active => {
                return Err(BackendError::Database(format!(
                    "session {} is {}, not active",
                    session_id,
                    session.status.as_ref()
                )))
            }
            Some(_) => {}
            None => return Err(BackendError::NotFound(format!("session {}", session_id))),
        }

        // Validation is done; from here on every write lands under the same lock.
        for result in results {
            state.scores.insert(
                (session_id.to_string(), result.record.player_id.clone()),
                StoredScore {
                    record: result.record.clone(),
                    is_winner: result.is_winner,
                },
            );
        }
        if let Some(session) = state.sessions.get_mut(session_id) {
            session.status = SessionStatus::Completed;
            session.completed_at = Some(Utc::now());
        }

        debug!(session_id = %session_id, "Session completed in memory");
        Ok(())
    }
}
