use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use super::{
    debouncer::Debouncer,
    errors::{BackendError, SessionError},
    invitations::InvitationWatcher,
    models::{
        CompletionRecord, GameDefinition, GameSession, InputMetadata, InvitationSnapshot,
        InvitationStatus, NewInvitation, NewSession, PlayerScoreRecord, ScoringSnapshot,
        SessionInvitation, SessionStatus,
    },
    optimistic::OptimisticCommand,
    repository::SessionBackend,
    rewards::RewardsService,
    types::{
        CompletionOutcome, EndGamePreview, InvitationView, PlayerCandidate, PlayerView,
        ScoreAnnotation, SessionView,
    },
};
use crate::scoring::{
    accuracy_percentage, counts_as_submitted, determine_winner, ratio_value, MeasurementUnit,
};

/// Timing knobs for score persistence.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Quiet period before a directly entered score is written.
    pub debounce_window: Duration,
    /// Delay before the single retry of a write that hit a serialization failure.
    pub retry_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(500),
            retry_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorPhase {
    SelectingPlayers,
    AwaitingInvitations,
    Active,
    Completed,
    Cancelled,
}

/// Players chosen on the setup screen. The creator is always present.
#[derive(Debug, Clone)]
pub struct PlayerSelection {
    creator: PlayerCandidate,
    others: Vec<PlayerCandidate>,
}

impl PlayerSelection {
    fn new(creator: PlayerCandidate) -> Self {
        Self {
            creator,
            others: Vec::new(),
        }
    }

    pub fn creator(&self) -> &PlayerCandidate {
        &self.creator
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerCandidate> {
        std::iter::once(&self.creator).chain(self.others.iter())
    }

    fn contains(&self, candidate: &PlayerCandidate) -> bool {
        self.players().any(|existing| {
            existing.row_key == candidate.row_key
                || (candidate.user_id.is_some() && existing.user_id == candidate.user_id)
        })
    }
}

/// Write ordering for one player. Every write takes the next sequence
/// number and is skipped if a later one has already landed.
#[derive(Debug, Default)]
struct PlayerWriter {
    issued: u64,
    landed: Arc<AsyncMutex<u64>>,
}

#[derive(Debug, Clone)]
struct ArmedEndGame {
    preview: EndGamePreview,
    revision: u64,
}

/// Drives one game session from player selection to completion or
/// cancellation.
///
/// The coordinator exclusively owns the in-memory score list. Local state is
/// updated first and persistence happens behind it: incremental changes are
/// written right away, direct entries are debounced per player, and a write
/// that hits a serialization failure is retried once.
pub struct SessionCoordinator {
    backend: Arc<dyn SessionBackend>,
    rewards: Arc<dyn RewardsService>,
    config: CoordinatorConfig,
    game: GameDefinition,
    selection: PlayerSelection,
    session: Option<GameSession>,
    debouncer: Debouncer<String>,
    writers: HashMap<String, PlayerWriter>,
    revision: u64,
    armed_end: Option<ArmedEndGame>,
}

impl SessionCoordinator {
    pub fn new(
        backend: Arc<dyn SessionBackend>,
        rewards: Arc<dyn RewardsService>,
        config: CoordinatorConfig,
        game: GameDefinition,
        creator_id: impl Into<String>,
        creator_nickname: impl Into<String>,
    ) -> Self {
        let debouncer = Debouncer::new(config.debounce_window);
        Self {
            backend,
            rewards,
            config,
            game,
            selection: PlayerSelection::new(PlayerCandidate::account(creator_id, creator_nickname)),
            session: None,
            debouncer,
            writers: HashMap::new(),
            revision: 0,
            armed_end: None,
        }
    }

    /// Loads the game and opens a coordinator in player selection.
    pub async fn open(
        backend: Arc<dyn SessionBackend>,
        rewards: Arc<dyn RewardsService>,
        config: CoordinatorConfig,
        game_id: &str,
        creator_id: impl Into<String>,
        creator_nickname: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let game = backend
            .fetch_game(game_id)
            .await?
            .ok_or_else(|| SessionError::GameNotFound(game_id.to_string()))?;
        Ok(Self::new(
            backend,
            rewards,
            config,
            game,
            creator_id,
            creator_nickname,
        ))
    }

    pub fn phase(&self) -> CoordinatorPhase {
        match self.session.as_ref().map(|session| session.status) {
            None => CoordinatorPhase::SelectingPlayers,
            Some(SessionStatus::Pending) => CoordinatorPhase::AwaitingInvitations,
            Some(SessionStatus::Active) => CoordinatorPhase::Active,
            Some(SessionStatus::Completed) => CoordinatorPhase::Completed,
            Some(SessionStatus::Cancelled) => CoordinatorPhase::Cancelled,
        }
    }

    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    pub fn game(&self) -> &GameDefinition {
        &self.game
    }

    pub fn selection(&self) -> &PlayerSelection {
        &self.selection
    }

    pub fn creator_id(&self) -> &str {
        self.selection.creator.user_id.as_deref().unwrap_or_default()
    }

    pub fn can_begin(&self) -> bool {
        self.session.as_ref().is_some_and(GameSession::can_begin)
    }

    /// Number of directly entered scores still waiting for their write.
    pub fn pending_writes(&self) -> usize {
        self.debouncer.pending()
    }

    pub fn select_player(&mut self, candidate: PlayerCandidate) -> Result<(), SessionError> {
        self.require_phase(CoordinatorPhase::SelectingPlayers, "change the player selection")?;
        if !self.selection.contains(&candidate) {
            debug!(row_key = %candidate.row_key, "Player selected");
            self.selection.others.push(candidate);
        }
        Ok(())
    }

    pub fn deselect_player(&mut self, row_key: &str) -> Result<(), SessionError> {
        self.require_phase(CoordinatorPhase::SelectingPlayers, "change the player selection")?;
        if self.selection.creator.row_key == row_key {
            return Err(SessionError::CreatorRequired);
        }
        self.selection.others.retain(|candidate| candidate.row_key != row_key);
        Ok(())
    }

    /// Creates the session row, zero scores for house members and
    /// invitations for everyone else.
    ///
    /// Without outside invitees the session starts `active`; otherwise it
    /// waits in `pending`. Nothing changes locally unless the backend
    /// accepted the session.
    #[instrument(skip(self), fields(game_id = %self.game.id))]
    pub async fn create_session(&mut self) -> Result<&GameSession, SessionError> {
        self.require_phase(CoordinatorPhase::SelectingPlayers, "create the session")?;

        let mut selected = Vec::new();
        for candidate in self.selection.players() {
            let user_id = candidate
                .user_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| SessionError::MissingUserId(candidate.row_key.clone()))?;
            selected.push((user_id, candidate.nickname.clone()));
        }

        let house_members = self
            .backend
            .fetch_house_member_ids(&self.game.house_id)
            .await?;
        let creator_id = self.creator_id().to_string();

        let (members, invitees): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|(user_id, _)| *user_id == creator_id || house_members.contains(user_id));

        let status = if invitees.is_empty() {
            SessionStatus::Active
        } else {
            SessionStatus::Pending
        };
        let scoring = ScoringSnapshot::from_game(&self.game);

        let session_id = self
            .backend
            .create_session(&NewSession {
                game_id: self.game.id.clone(),
                house_id: self.game.house_id.clone(),
                creator_id: creator_id.clone(),
                status,
                scoring: scoring.clone(),
            })
            .await?;

        let players: Vec<PlayerScoreRecord> = members
            .iter()
            .map(|(user_id, nickname)| PlayerScoreRecord::zero(user_id.clone(), nickname.clone()))
            .collect();
        let new_invitations: Vec<NewInvitation> = invitees
            .iter()
            .map(|(user_id, nickname)| NewInvitation {
                invitee_id: user_id.clone(),
                nickname: nickname.clone(),
            })
            .collect();

        let populated = async {
            self.insert_score_rows(&session_id, &players).await?;
            if !new_invitations.is_empty() {
                self.backend
                    .create_invitations(&session_id, &new_invitations)
                    .await?;
            }
            Ok::<(), BackendError>(())
        }
        .await;

        if let Err(err) = populated {
            error!(session_id = %session_id, error = %err, "Failed to populate new session");
            if let Err(cancel_err) = self
                .backend
                .update_session_status(&session_id, SessionStatus::Cancelled, Utc::now())
                .await
            {
                warn!(session_id = %session_id, error = %cancel_err, "Failed to cancel half-created session");
            }
            return Err(err.into());
        }

        let now = Utc::now();
        let invitations = new_invitations
            .into_iter()
            .map(|invitation| SessionInvitation {
                session_id: session_id.clone(),
                invitee_id: invitation.invitee_id,
                nickname: invitation.nickname,
                status: InvitationStatus::Pending,
            })
            .collect::<Vec<_>>();

        info!(
            session_id = %session_id,
            status = status.as_ref(),
            members = players.len(),
            invitees = invitations.len(),
            "Session created"
        );

        Ok(&*self.session.insert(GameSession {
            id: session_id,
            game_id: self.game.id.clone(),
            house_id: self.game.house_id.clone(),
            creator_id,
            status,
            scoring,
            players,
            invitations,
            created_at: now,
            started_at: (status == SessionStatus::Active).then_some(now),
            completed_at: None,
        }))
    }

    pub async fn watch_invitations(&self) -> Result<InvitationWatcher, SessionError> {
        let session = self.require_session("watch invitations")?;
        Ok(self.backend.subscribe_invitations(&session.id).await?)
    }

    /// Pulls the current invitation state and applies it.
    pub async fn refresh_invitations(&mut self) -> Result<bool, SessionError> {
        let session_id = self.require_session("refresh invitations")?.id.clone();
        let invitations = self.backend.fetch_invitations(&session_id).await?;
        self.apply_invitation_snapshot(InvitationSnapshot {
            session_id,
            invitations,
        })
        .await
    }

    /// Replaces the local invitation list with a full snapshot and returns
    /// whether play can begin. Accepted invitees get a zero score locally
    /// and, idempotently, in the backend.
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.session_id))]
    pub async fn apply_invitation_snapshot(
        &mut self,
        snapshot: InvitationSnapshot,
    ) -> Result<bool, SessionError> {
        let session = self.require_session("apply invitation changes")?;
        if session.id != snapshot.session_id {
            warn!(expected = %session.id, "Ignoring invitation snapshot for another session");
            return Ok(session.can_begin());
        }
        if session.status.is_terminal() {
            debug!("Ignoring invitation snapshot for finished session");
            return Ok(false);
        }

        let newly_accepted: Vec<PlayerScoreRecord> = snapshot
            .invitations
            .iter()
            .filter(|invitation| invitation.status == InvitationStatus::Accepted)
            .filter(|invitation| !session.has_player(&invitation.invitee_id))
            .map(|invitation| {
                PlayerScoreRecord::zero(invitation.invitee_id.clone(), invitation.nickname.clone())
            })
            .collect();

        if !newly_accepted.is_empty() {
            let session_id = session.id.clone();
            self.insert_score_rows(&session_id, &newly_accepted).await?;
        }

        let session = self.session_mut()?;
        for record in newly_accepted {
            info!(player_id = %record.player_id, "Invitee joined the session");
            session.players.push(record);
        }
        session.invitations = snapshot.invitations;

        let ready = session.can_begin();
        debug!(can_begin = ready, "Invitation snapshot applied");
        Ok(ready)
    }

    /// Withdraws an invitation, e.g. one that was declined.
    #[instrument(skip(self))]
    pub async fn remove_invitation(
        &mut self,
        actor_id: &str,
        invitee_id: &str,
    ) -> Result<(), SessionError> {
        self.require_phase(CoordinatorPhase::AwaitingInvitations, "remove an invitation")?;
        self.require_creator(actor_id, "remove an invitation")?;

        let session = self.session_mut()?;
        let index = session
            .invitations
            .iter()
            .position(|invitation| invitation.invitee_id == invitee_id)
            .ok_or_else(|| SessionError::PlayerNotFound(invitee_id.to_string()))?;
        if session.invitations[index].status == InvitationStatus::Accepted {
            return Err(SessionError::InvalidState {
                action: "remove an accepted invitation",
                phase: CoordinatorPhase::AwaitingInvitations.to_string(),
            });
        }

        let session_id = session.id.clone();
        let command = OptimisticCommand::new(
            "remove_invitation",
            move |session: &mut GameSession| (index, session.invitations.remove(index)),
            |session: &mut GameSession, (index, invitation): (usize, SessionInvitation)| {
                session.invitations.insert(index, invitation)
            },
        );

        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidState {
                action: "remove an invitation",
                phase: CoordinatorPhase::SelectingPlayers.to_string(),
            });
        };
        command
            .run(
                session,
                self.backend.delete_invitation(&session_id, invitee_id),
            )
            .await?;

        info!(session_id = %session_id, invitee_id, "Invitation removed");
        Ok(())
    }

    /// Moves a pending session into play once every invitation is accepted.
    #[instrument(skip(self))]
    pub async fn begin_active_play(&mut self, actor_id: &str) -> Result<(), SessionError> {
        self.require_phase(CoordinatorPhase::AwaitingInvitations, "begin the game")?;
        self.require_creator(actor_id, "begin the game")?;

        let session = self.require_session("begin the game")?;
        if !session.can_begin() {
            return Err(SessionError::InvitationsUnresolved);
        }

        let session_id = session.id.clone();
        let missing: Vec<PlayerScoreRecord> = session
            .invitations
            .iter()
            .filter(|invitation| !session.has_player(&invitation.invitee_id))
            .map(|invitation| {
                PlayerScoreRecord::zero(invitation.invitee_id.clone(), invitation.nickname.clone())
            })
            .collect();
        let mut rows = session.players.clone();
        rows.extend(missing.iter().cloned());

        self.insert_score_rows(&session_id, &rows).await?;

        let started_at = Utc::now();
        self.backend
            .update_session_status(&session_id, SessionStatus::Active, started_at)
            .await?;

        let session = self.session_mut()?;
        session.players.extend(missing);
        session.status = SessionStatus::Active;
        session.started_at = Some(started_at);

        info!(session_id = %session_id, players = session.players.len(), "Session is now active");
        Ok(())
    }

    /// Applies a signed number of steps to a player's score and writes it
    /// immediately. Returns the new score.
    pub fn increment_score(&mut self, player_id: &str, change: i32) -> Result<f64, SessionError> {
        self.require_phase(CoordinatorPhase::Active, "change scores")?;
        let session = self.session_mut()?;
        let step = session.scoring.step;
        let session_id = session.id.clone();

        let record = session
            .player_mut(player_id)
            .ok_or_else(|| SessionError::PlayerNotFound(player_id.to_string()))?;
        record.score = (record.score + f64::from(change) * step).max(0.0);
        let snapshot = record.clone();

        self.touch();
        // A pending direct entry is older than this change and must not land after it.
        self.debouncer.cancel(&snapshot.player_id);
        let write = self.score_write(session_id, snapshot.clone());
        tokio::spawn(write);

        debug!(player_id, score = snapshot.score, "Score incremented");
        Ok(snapshot.score)
    }

    /// Sets a player's score outright. The write is debounced per player so a
    /// burst of edits produces one write carrying the last value.
    pub fn set_score(
        &mut self,
        player_id: &str,
        value: f64,
        annotation: Option<ScoreAnnotation>,
    ) -> Result<f64, SessionError> {
        self.require_phase(CoordinatorPhase::Active, "change scores")?;
        let session = self.session_mut()?;
        let session_id = session.id.clone();
        let scoring_type = session.scoring.scoring_type;
        if let Some(annotation) = annotation.as_ref().filter(|a| !a.fits(scoring_type)) {
            return Err(SessionError::InvalidScore(format!(
                "{} input does not apply to {} scoring",
                annotation.kind(),
                scoring_type.id()
            )));
        }

        let record = session
            .player_mut(player_id)
            .ok_or_else(|| SessionError::PlayerNotFound(player_id.to_string()))?;
        record.score = value.max(0.0);
        match annotation {
            Some(ScoreAnnotation::Accuracy { hits, attempts }) => {
                record.accuracy_hits = Some(hits);
                record.accuracy_attempts = Some(attempts);
            }
            Some(ScoreAnnotation::Ratio {
                numerator,
                denominator,
            }) => {
                record.ratio_numerator = Some(numerator);
                record.ratio_denominator = Some(denominator);
            }
            Some(ScoreAnnotation::Measurement {
                original_value,
                unit,
            }) => {
                record.input_metadata = Some(InputMetadata {
                    original_value,
                    unit,
                });
            }
            None => {}
        }
        let snapshot = record.clone();

        self.touch();
        let write = self.score_write(session_id, snapshot.clone());
        self.debouncer.schedule(snapshot.player_id.clone(), write);

        debug!(player_id, score = snapshot.score, "Score set");
        Ok(snapshot.score)
    }

    /// Accuracy entry: the score becomes the hit percentage.
    pub fn set_accuracy(
        &mut self,
        player_id: &str,
        hits: u32,
        attempts: u32,
    ) -> Result<f64, SessionError> {
        self.set_score(
            player_id,
            accuracy_percentage(hits, attempts),
            Some(ScoreAnnotation::Accuracy { hits, attempts }),
        )
    }

    /// Ratio entry: the score becomes numerator / denominator.
    pub fn set_ratio(
        &mut self,
        player_id: &str,
        numerator: f64,
        denominator: f64,
    ) -> Result<f64, SessionError> {
        self.set_score(
            player_id,
            ratio_value(numerator, denominator),
            Some(ScoreAnnotation::Ratio {
                numerator,
                denominator,
            }),
        )
    }

    /// Measurement entry in any unit; the score is stored canonically.
    pub fn set_measurement(
        &mut self,
        player_id: &str,
        value: f64,
        unit: MeasurementUnit,
    ) -> Result<f64, SessionError> {
        self.set_score(
            player_id,
            unit.to_canonical(value),
            Some(ScoreAnnotation::Measurement {
                original_value: value,
                unit,
            }),
        )
    }

    /// First step of ending the game: computes the result and arms the
    /// confirmation.
    pub fn request_end_game(&mut self) -> Result<EndGamePreview, SessionError> {
        self.require_phase(CoordinatorPhase::Active, "end the game")?;
        let session = self.require_session("end the game")?;

        let winner_ids = determine_winner(
            &session.score_entries(),
            session.scoring.scoring_type,
            Some(session.scoring.lower_is_better),
        );
        let is_solo = session.players.len() == 1;
        let solo_has_score = is_solo
            && session
                .players
                .first()
                .is_some_and(|p| counts_as_submitted(p.score, session.scoring.scoring_type));
        let is_tie = !is_solo && winner_ids.len() > 1;

        let preview = EndGamePreview {
            winner_ids,
            is_solo,
            solo_has_score,
            is_tie,
        };
        self.armed_end = Some(ArmedEndGame {
            preview: preview.clone(),
            revision: self.revision,
        });
        Ok(preview)
    }

    pub fn dismiss_end_game(&mut self) {
        self.armed_end = None;
    }

    /// Commits the armed result. Every final value goes to the backend in one
    /// atomic call; if it fails the session stays active and the
    /// confirmation stays armed so the user can retry.
    #[instrument(skip(self))]
    pub async fn confirm_end_game(&mut self) -> Result<CompletionOutcome, SessionError> {
        self.require_phase(CoordinatorPhase::Active, "end the game")?;
        let armed = match &self.armed_end {
            Some(armed) if armed.revision == self.revision => armed.preview.clone(),
            _ => return Err(SessionError::ConfirmationRequired),
        };

        let session = self.require_session("end the game")?;
        let session_id = session.id.clone();
        let results: Vec<CompletionRecord> = session
            .players
            .iter()
            .map(|record| CompletionRecord {
                record: record.clone(),
                is_winner: armed.winner_ids.contains(&record.player_id),
            })
            .collect();
        let player_ids: Vec<String> = session.players.iter().map(|p| p.player_id.clone()).collect();

        if let Err(err) = self.backend.complete_session(&session_id, &results).await {
            error!(session_id = %session_id, error = %err, "Failed to complete session");
            return Err(err.into());
        }

        self.debouncer.cancel_all();
        self.armed_end = None;
        self.backend.close_invitations(&session_id).await;
        let session = self.session_mut()?;
        session.status = SessionStatus::Completed;
        session.completed_at = Some(Utc::now());

        info!(
            session_id = %session_id,
            winners = ?armed.winner_ids,
            is_tie = armed.is_tie,
            "Session completed"
        );

        self.spawn_reward_checks(session_id.clone(), armed.winner_ids.clone(), player_ids);

        Ok(CompletionOutcome {
            session_id,
            winner_ids: armed.winner_ids,
            is_solo: armed.is_solo,
            solo_has_score: armed.solo_has_score,
            is_tie: armed.is_tie,
        })
    }

    /// Cancels the session. Only the creator may, and only before completion.
    #[instrument(skip(self))]
    pub async fn cancel(&mut self, actor_id: &str) -> Result<(), SessionError> {
        match self.phase() {
            CoordinatorPhase::AwaitingInvitations | CoordinatorPhase::Active => {}
            phase => {
                return Err(SessionError::InvalidState {
                    action: "cancel the session",
                    phase: phase.to_string(),
                })
            }
        }
        self.require_creator(actor_id, "cancel the session")?;

        let session_id = self.require_session("cancel the session")?.id.clone();
        let command = OptimisticCommand::new(
            "cancel_session",
            |session: &mut GameSession| std::mem::replace(&mut session.status, SessionStatus::Cancelled),
            |session: &mut GameSession, previous: SessionStatus| session.status = previous,
        );

        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::InvalidState {
                action: "cancel the session",
                phase: CoordinatorPhase::SelectingPlayers.to_string(),
            });
        };
        command
            .run(
                session,
                self.backend
                    .update_session_status(&session_id, SessionStatus::Cancelled, Utc::now()),
            )
            .await?;

        self.debouncer.cancel_all();
        self.armed_end = None;
        self.backend.close_invitations(&session_id).await;
        info!(session_id = %session_id, "Session cancelled");
        Ok(())
    }

    /// Current state for display, with scores formatted for the session's
    /// scoring setup.
    pub fn view(&self) -> Option<SessionView> {
        let session = self.session.as_ref()?;
        Some(SessionView {
            session_id: session.id.clone(),
            game_id: session.game_id.clone(),
            creator_id: session.creator_id.clone(),
            status: session.status,
            scoring_type: session.scoring.scoring_type,
            lower_is_better: session.scoring.lower_is_better,
            can_begin: session.can_begin(),
            players: session
                .players
                .iter()
                .map(|record| PlayerView {
                    player_id: record.player_id.clone(),
                    nickname: record.nickname.clone(),
                    score: record.score,
                    display: record.display_score(&session.scoring),
                })
                .collect(),
            invitations: session
                .invitations
                .iter()
                .map(|invitation| InvitationView {
                    invitee_id: invitation.invitee_id.clone(),
                    nickname: invitation.nickname.clone(),
                    status: invitation.status,
                })
                .collect(),
        })
    }

    /// Drops pending writes. Writes already sent are left to finish.
    pub fn teardown(&mut self) {
        let cancelled = self.debouncer.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "Coordinator torn down with pending writes");
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Builds the write for one player's current value. Writes for the same
    /// player run one at a time, and a write that was overtaken by a newer
    /// one is dropped instead of landing on top of it.
    fn score_write(
        &mut self,
        session_id: String,
        record: PlayerScoreRecord,
    ) -> impl std::future::Future<Output = ()> + Send + 'static {
        let writer = self.writers.entry(record.player_id.clone()).or_default();
        writer.issued += 1;
        let sequence = writer.issued;
        let landed = writer.landed.clone();
        let backend = self.backend.clone();
        let retry_delay = self.config.retry_delay;
        async move {
            let mut landed = landed.lock().await;
            if *landed > sequence {
                debug!(
                    session_id = %session_id,
                    player_id = %record.player_id,
                    sequence,
                    "Skipping superseded score write"
                );
                return;
            }
            persist_score(backend.as_ref(), &session_id, &record, retry_delay).await;
            *landed = sequence;
        }
    }

    async fn insert_score_rows(
        &self,
        session_id: &str,
        rows: &[PlayerScoreRecord],
    ) -> Result<(), BackendError> {
        if rows.is_empty() {
            return Ok(());
        }
        match self.backend.create_score_records(session_id, rows).await {
            Ok(()) => Ok(()),
            Err(BackendError::Conflict(detail)) => {
                debug!(session_id, detail = %detail, "Score rows already existed");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn spawn_reward_checks(&self, session_id: String, winner_ids: Vec<String>, player_ids: Vec<String>) {
        let rewards = self.rewards.clone();
        tokio::spawn(async move {
            for winner_id in &winner_ids {
                match rewards.check_badges(winner_id).await {
                    Ok(badges) if !badges.is_empty() => {
                        info!(session_id = %session_id, winner_id = %winner_id, ?badges, "Badges awarded")
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(session_id = %session_id, winner_id = %winner_id, error = %err, "Badge check failed")
                    }
                }
            }
            for player_id in &player_ids {
                if let Err(err) = rewards.roll_kit_unlock(player_id, &session_id).await {
                    warn!(session_id = %session_id, player_id = %player_id, error = %err, "Kit unlock roll failed");
                }
            }
        });
    }

    fn require_phase(
        &self,
        expected: CoordinatorPhase,
        action: &'static str,
    ) -> Result<(), SessionError> {
        let phase = self.phase();
        if phase == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                action,
                phase: phase.to_string(),
            })
        }
    }

    fn require_creator(&self, actor_id: &str, action: &'static str) -> Result<(), SessionError> {
        if actor_id == self.creator_id() {
            Ok(())
        } else {
            Err(SessionError::NotCreator(action))
        }
    }

    fn require_session(&self, action: &'static str) -> Result<&GameSession, SessionError> {
        self.session.as_ref().ok_or(SessionError::InvalidState {
            action,
            phase: CoordinatorPhase::SelectingPlayers.to_string(),
        })
    }

    fn session_mut(&mut self) -> Result<&mut GameSession, SessionError> {
        self.session.as_mut().ok_or(SessionError::InvalidState {
            action: "update the session",
            phase: CoordinatorPhase::SelectingPlayers.to_string(),
        })
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Upserts one score, retrying once after `retry_delay` on a serialization
/// failure. Failures are logged and the local value is left as is.
async fn persist_score(
    backend: &dyn SessionBackend,
    session_id: &str,
    record: &PlayerScoreRecord,
    retry_delay: Duration,
) {
    let player_id = record.player_id.as_str();
    match backend.upsert_score(session_id, record).await {
        Ok(()) => debug!(session_id, player_id, score = record.score, "Score saved"),
        Err(err) if err.is_serialization_conflict() => {
            warn!(session_id, player_id, error = %err, "Score write conflicted, retrying once");
            tokio::time::sleep(retry_delay).await;
            match backend.upsert_score(session_id, record).await {
                Ok(()) => debug!(session_id, player_id, "Score saved on retry"),
                Err(err) => {
                    error!(session_id, player_id, error = %err, "Score write failed after retry")
                }
            }
        }
        Err(err) => error!(session_id, player_id, error = %err, "Score write failed"),
    }
}
