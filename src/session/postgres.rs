use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgListener, postgres::PgRow, PgPool, Row};
use std::collections::HashSet;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::{
    errors::BackendError,
    invitations::{InvitationFeed, InvitationWatcher},
    models::{
        CompletionRecord, GameDefinition, InputMetadata, InvitationSnapshot, InvitationStatus,
        NewInvitation, NewSession, PlayerScoreRecord, ScoringSnapshot, SessionInvitation,
        SessionRecord, SessionStatus,
    },
    repository::SessionBackend,
    rewards::RewardsService,
};
use crate::scoring::{MeasurementUnit, ScoringType};

/// Channel a trigger on `game_session_invitations` notifies with the session id.
pub const INVITATION_CHANNEL: &str = "game_session_invitations";

const SESSION_COLUMNS: &str = "id, game_id, house_id, creator_id, status, scoring_type, score_unit, \
     score_step, lower_is_better, display_unit, created_at, started_at, completed_at";

const SCORE_COLUMNS: &str = "player_id, nickname, score, accuracy_hits, accuracy_attempts, \
     ratio_numerator, ratio_denominator, input_metadata";

/// Keeps the SQLSTATE so conflicts and serialization failures stay distinguishable.
fn map_db_error(err: sqlx::Error) -> BackendError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(code) = db.code() {
            return BackendError::from_code(&code, db.message());
        }
    }
    BackendError::Database(err.to_string())
}

fn parse_status<T: std::str::FromStr>(value: &str, what: &str) -> Result<T, BackendError> {
    value
        .parse()
        .map_err(|_| BackendError::Database(format!("unknown {} '{}'", what, value)))
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord, BackendError> {
    let status: String = row.get("status");
    let scoring_type: String = row.get("scoring_type");
    let display_unit: Option<String> = row.get("display_unit");

    Ok(SessionRecord {
        id: row.get("id"),
        game_id: row.get("game_id"),
        house_id: row.get("house_id"),
        creator_id: row.get("creator_id"),
        status: parse_status(&status, "session status")?,
        scoring: ScoringSnapshot {
            scoring_type: ScoringType::from_id(&scoring_type),
            unit: row.get("score_unit"),
            step: row.get("score_step"),
            lower_is_better: row.get("lower_is_better"),
            display_unit: display_unit.as_deref().and_then(MeasurementUnit::from_label),
        },
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn score_from_row(row: &PgRow) -> PlayerScoreRecord {
    let hits: Option<i32> = row.get("accuracy_hits");
    let attempts: Option<i32> = row.get("accuracy_attempts");
    let input_metadata: Option<serde_json::Value> = row.get("input_metadata");

    PlayerScoreRecord {
        player_id: row.get("player_id"),
        nickname: row.get("nickname"),
        score: row.get("score"),
        accuracy_hits: hits.and_then(|v| u32::try_from(v).ok()),
        accuracy_attempts: attempts.and_then(|v| u32::try_from(v).ok()),
        ratio_numerator: row.get("ratio_numerator"),
        ratio_denominator: row.get("ratio_denominator"),
        input_metadata: input_metadata
            .and_then(|value| serde_json::from_value::<InputMetadata>(value).ok()),
    }
}

fn metadata_json(record: &PlayerScoreRecord) -> Option<serde_json::Value> {
    record
        .input_metadata
        .as_ref()
        .and_then(|metadata| serde_json::to_value(metadata).ok())
}

fn count_to_db(count: Option<u32>) -> Option<i32> {
    count.map(|v| i32::try_from(v).unwrap_or(i32::MAX))
}

/// [`SessionBackend`] over the hosted Postgres schema.
///
/// Invitation changes are picked up through `LISTEN` on
/// [`INVITATION_CHANNEL`]; call [`PostgresSessionBackend::spawn_invitation_listener`]
/// once at startup so watchers receive snapshots.
pub struct PostgresSessionBackend {
    pool: PgPool,
    feed: InvitationFeed,
}

impl PostgresSessionBackend {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            feed: InvitationFeed::new(),
        }
    }

    /// Relays invitation notifications into the local feed as full snapshots.
    pub async fn spawn_invitation_listener(&self) -> Result<JoinHandle<()>, BackendError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(map_db_error)?;
        listener
            .listen(INVITATION_CHANNEL)
            .await
            .map_err(map_db_error)?;

        let pool = self.pool.clone();
        let feed = self.feed.clone();
        info!(channel = INVITATION_CHANNEL, "Listening for invitation changes");

        Ok(tokio::spawn(async move {
            loop {
                let notification = match listener.recv().await {
                    Ok(notification) => notification,
                    Err(e) => {
                        error!(error = %e, "Invitation listener stopped");
                        break;
                    }
                };
                let session_id = notification.payload().to_string();
                match load_invitations(&pool, &session_id).await {
                    Ok(invitations) => {
                        feed.publish(InvitationSnapshot {
                            session_id,
                            invitations,
                        })
                        .await
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to load invitations after notification")
                    }
                }
            }
        }))
    }
}

async fn load_invitations(
    pool: &PgPool,
    session_id: &str,
) -> Result<Vec<SessionInvitation>, BackendError> {
    let rows = sqlx::query(
        "SELECT session_id, invitee_id, nickname, status FROM game_session_invitations \
         WHERE session_id = $1 ORDER BY created_at, invitee_id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await
    .map_err(map_db_error)?;

    rows.iter()
        .map(|row| {
            let status: String = row.get("status");
            Ok(SessionInvitation {
                session_id: row.get("session_id"),
                invitee_id: row.get("invitee_id"),
                nickname: row.get("nickname"),
                status: parse_status(&status, "invitation status")?,
            })
        })
        .collect()
}

#[async_trait]
impl SessionBackend for PostgresSessionBackend {
    #[instrument(skip(self))]
    async fn fetch_game(&self, game_id: &str) -> Result<Option<GameDefinition>, BackendError> {
        let row = sqlx::query(
            "SELECT id, house_id, name, scoring_type, lower_is_better, display_unit FROM games WHERE id = $1",
        )
        .bind(game_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, game_id = %game_id, "Failed to fetch game from database");
            map_db_error(e)
        })?;

        Ok(row.map(|row| GameDefinition {
            id: row.get("id"),
            house_id: row.get("house_id"),
            name: row.get("name"),
            scoring_type: row.get("scoring_type"),
            lower_is_better: row.get("lower_is_better"),
            display_unit: row.get("display_unit"),
        }))
    }

    #[instrument(skip(self))]
    async fn fetch_house_member_ids(
        &self,
        house_id: &str,
    ) -> Result<HashSet<String>, BackendError> {
        let members: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM house_members WHERE house_id = $1")
                .bind(house_id)
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_error)?;

        debug!(house_id = %house_id, count = members.len(), "Fetched house members");
        Ok(members.into_iter().collect())
    }

    #[instrument(skip(self, session), fields(game_id = %session.game_id))]
    async fn create_session(&self, session: &NewSession) -> Result<String, BackendError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO game_sessions (id, game_id, house_id, creator_id, status, scoring_type, \
             score_unit, score_step, lower_is_better, display_unit, created_at, started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&id)
        .bind(&session.game_id)
        .bind(&session.house_id)
        .bind(&session.creator_id)
        .bind(session.status.as_ref())
        .bind(session.scoring.scoring_type.id())
        .bind(&session.scoring.unit)
        .bind(session.scoring.step)
        .bind(session.scoring.lower_is_better)
        .bind(session.scoring.display_unit.map(|unit| unit.label()))
        .bind(now)
        .bind((session.status == SessionStatus::Active).then_some(now))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create game session in database");
            map_db_error(e)
        })?;

        debug!(session_id = %id, status = session.status.as_ref(), "Game session created in database");
        Ok(id)
    }

    #[instrument(skip(self))]
    async fn fetch_session(&self, session_id: &str) -> Result<Option<SessionRecord>, BackendError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM game_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?;

        row.as_ref().map(session_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn update_session_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        at: DateTime<Utc>,
    ) -> Result<(), BackendError> {
        let result = sqlx::query(
            "UPDATE game_sessions SET status = $2, \
             started_at = CASE WHEN $2 = 'active' THEN $3 ELSE started_at END, \
             completed_at = CASE WHEN $2 = 'completed' THEN $3 ELSE completed_at END \
             WHERE id = $1 AND status NOT IN ('completed', 'cancelled')",
        )
        .bind(session_id)
        .bind(status.as_ref())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            warn!(error = %e, session_id = %session_id, "Failed to update game session status");
            map_db_error(e)
        })?;

        if result.rows_affected() == 0 {
            warn!(session_id = %session_id, "No open session to update");
            return Err(BackendError::NotFound(format!("open session {}", session_id)));
        }
        Ok(())
    }

    #[instrument(skip(self, players), fields(count = players.len()))]
    async fn create_score_records(
        &self,
        session_id: &str,
        players: &[PlayerScoreRecord],
    ) -> Result<(), BackendError> {
        let mut duplicates = Vec::new();

        for player in players {
            let result = sqlx::query(
                "INSERT INTO game_session_scores (session_id, player_id, nickname, score) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (session_id, player_id) DO NOTHING",
            )
            .bind(session_id)
            .bind(&player.player_id)
            .bind(&player.nickname)
            .bind(player.score)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;

            if result.rows_affected() == 0 {
                duplicates.push(player.player_id.clone());
            }
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

    #[instrument(skip(self))]
    async fn fetch_scores(&self, session_id: &str) -> Result<Vec<PlayerScoreRecord>, BackendError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM game_session_scores WHERE session_id = $1 ORDER BY player_id",
            SCORE_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)?;

        Ok(rows.iter().map(score_from_row).collect())
    }

    #[instrument(skip(self, record), fields(player_id = %record.player_id))]
    async fn upsert_score(
        &self,
        session_id: &str,
        record: &PlayerScoreRecord,
    ) -> Result<(), BackendError> {
        let result = sqlx::query(
            "INSERT INTO game_session_scores (session_id, player_id, nickname, score, accuracy_hits, \
             accuracy_attempts, ratio_numerator, ratio_denominator, input_metadata) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9 \
             WHERE EXISTS (SELECT 1 FROM game_sessions WHERE id = $1 AND status IN ('pending', 'active')) \
             ON CONFLICT (session_id, player_id) DO UPDATE SET \
             score = EXCLUDED.score, accuracy_hits = EXCLUDED.accuracy_hits, \
             accuracy_attempts = EXCLUDED.accuracy_attempts, ratio_numerator = EXCLUDED.ratio_numerator, \
             ratio_denominator = EXCLUDED.ratio_denominator, input_metadata = EXCLUDED.input_metadata",
        )
        .bind(session_id)
        .bind(&record.player_id)
        .bind(&record.nickname)
        .bind(record.score)
        .bind(count_to_db(record.accuracy_hits))
        .bind(count_to_db(record.accuracy_attempts))
        .bind(record.ratio_numerator)
        .bind(record.ratio_denominator)
        .bind(metadata_json(record))
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!("open session {}", session_id)));
        }
        Ok(())
    }

    #[instrument(skip(self, invitations), fields(count = invitations.len()))]
    async fn create_invitations(
        &self,
        session_id: &str,
        invitations: &[NewInvitation],
    ) -> Result<(), BackendError> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;
        let now = Utc::now();

        for invitation in invitations {
            sqlx::query(
                "INSERT INTO game_session_invitations (session_id, invitee_id, nickname, status, created_at) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(session_id)
            .bind(&invitation.invitee_id)
            .bind(&invitation.nickname)
            .bind(InvitationStatus::Pending.as_ref())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        tx.commit().await.map_err(map_db_error)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_invitation_status(
        &self,
        session_id: &str,
        invitee_id: &str,
        status: InvitationStatus,
    ) -> Result<(), BackendError> {
        let result = sqlx::query(
            "UPDATE game_session_invitations SET status = $3 WHERE session_id = $1 AND invitee_id = $2",
        )
        .bind(session_id)
        .bind(invitee_id)
        .bind(status.as_ref())
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!(
                "invitation for {} in {}",
                invitee_id, session_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_invitation(
        &self,
        session_id: &str,
        invitee_id: &str,
    ) -> Result<(), BackendError> {
        let result = sqlx::query(
            "DELETE FROM game_session_invitations WHERE session_id = $1 AND invitee_id = $2",
        )
        .bind(session_id)
        .bind(invitee_id)
        .execute(&self.pool)
        .await
        .map_err(map_db_error)?;

        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound(format!(
                "invitation for {} in {}",
                invitee_id, session_id
            )));
        }
        Ok(())
    }

    async fn fetch_invitations(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionInvitation>, BackendError> {
        load_invitations(&self.pool, session_id).await
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

    /// Runs `complete_game_session`, which writes the scores, marks winners
    /// and flips the status inside one transaction.
    #[instrument(skip(self, results), fields(players = results.len()))]
    async fn complete_session(
        &self,
        session_id: &str,
        results: &[CompletionRecord],
    ) -> Result<(), BackendError> {
        let payload = serde_json::to_value(results)
            .map_err(|e| BackendError::Database(format!("invalid completion payload: {}", e)))?;

        sqlx::query("SELECT complete_game_session($1, $2::jsonb)")
            .bind(session_id)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                warn!(error = %e, session_id = %session_id, "complete_game_session failed");
                map_db_error(e)
            })?;

        debug!(session_id = %session_id, "Game session completed in database");
        Ok(())
    }
}

/// Rewards backed by the `check_badge_eligibility` and
/// `check_chance_based_kit_unlock` database functions.
pub struct PostgresRewardsService {
    pool: PgPool,
}

impl PostgresRewardsService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RewardsService for PostgresRewardsService {
    #[instrument(skip(self))]
    async fn check_badges(&self, user_id: &str) -> Result<Vec<String>, BackendError> {
        sqlx::query_scalar("SELECT badge_id FROM check_badge_eligibility($1)")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_error)
    }

    #[instrument(skip(self))]
    async fn roll_kit_unlock(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<Option<String>, BackendError> {
        sqlx::query_scalar("SELECT check_chance_based_kit_unlock($1, $2)")
            .bind(user_id)
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)
    }
}
