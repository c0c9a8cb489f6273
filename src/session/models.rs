use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

use crate::scoring::{
    format_score, get_scoring_type_config, MeasurementUnit, ScoreEntry, ScoreMetadata,
    ScoringType,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
}

/// A game as configured by its house, including the default scoring setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameDefinition {
    pub id: String,
    pub house_id: String,
    pub name: String,
    /// Backend identifier; may name a type newer than this build.
    pub scoring_type: String,
    pub lower_is_better: Option<bool>,
    pub display_unit: Option<String>,
}

/// Scoring configuration frozen into a session when it is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSnapshot {
    pub scoring_type: ScoringType,
    pub unit: String,
    pub step: f64,
    pub lower_is_better: bool,
    pub display_unit: Option<MeasurementUnit>,
}

impl ScoringSnapshot {
    pub fn from_game(game: &GameDefinition) -> Self {
        let definition = get_scoring_type_config(game.scoring_type.as_str());
        let display_unit = game
            .display_unit
            .as_deref()
            .and_then(MeasurementUnit::from_label)
            .filter(|unit| unit.applies_to(definition.id));

        Self {
            scoring_type: definition.id,
            unit: definition.unit.to_string(),
            step: definition.step,
            lower_is_better: game.lower_is_better.unwrap_or(definition.lower_is_better),
            display_unit,
        }
    }
}

/// What the player actually typed for a measurement score, before conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMetadata {
    pub original_value: f64,
    pub unit: MeasurementUnit,
}

/// One player's score within a session. `player_id` is always the account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerScoreRecord {
    pub player_id: String,
    pub nickname: String,
    pub score: f64,
    pub accuracy_hits: Option<u32>,
    pub accuracy_attempts: Option<u32>,
    pub ratio_numerator: Option<f64>,
    pub ratio_denominator: Option<f64>,
    pub input_metadata: Option<InputMetadata>,
}

impl PlayerScoreRecord {
    pub fn zero(player_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            nickname: nickname.into(),
            score: 0.0,
            accuracy_hits: None,
            accuracy_attempts: None,
            ratio_numerator: None,
            ratio_denominator: None,
            input_metadata: None,
        }
    }

    pub fn entry(&self) -> ScoreEntry {
        ScoreEntry::new(self.player_id.clone(), self.score)
    }

    /// Formats the score for the session's scoring setup, converting
    /// measurement scores out of their canonical unit first.
    pub fn display_score(&self, scoring: &ScoringSnapshot) -> String {
        let mut metadata = ScoreMetadata {
            hits: self.accuracy_hits,
            attempts: self.accuracy_attempts,
            numerator: self.ratio_numerator,
            denominator: self.ratio_denominator,
            display_unit: None,
        };

        let display_unit = self
            .input_metadata
            .as_ref()
            .map(|input| input.unit)
            .or(scoring.display_unit)
            .filter(|unit| unit.applies_to(scoring.scoring_type));

        let score = match display_unit {
            Some(unit) => {
                metadata.display_unit = Some(unit.label().to_string());
                unit.from_canonical(self.score)
            }
            None => self.score,
        };

        format_score(score, scoring.scoring_type, Some(&metadata))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInvitation {
    pub session_id: String,
    pub invitee_id: String,
    pub nickname: String,
    pub status: InvitationStatus,
}

/// Full invitation state of one session as last seen from the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvitationSnapshot {
    pub session_id: String,
    pub invitations: Vec<SessionInvitation>,
}

/// True when nothing is pending and nobody declined. No invitations at all
/// also counts as ready.
pub fn can_begin(invitations: &[SessionInvitation]) -> bool {
    invitations
        .iter()
        .all(|invitation| invitation.status == InvitationStatus::Accepted)
}

/// Session row as the backend stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub game_id: String,
    pub house_id: String,
    pub creator_id: String,
    pub status: SessionStatus,
    pub scoring: ScoringSnapshot,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert payload for a new session row; the backend assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub game_id: String,
    pub house_id: String,
    pub creator_id: String,
    pub status: SessionStatus,
    pub scoring: ScoringSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvitation {
    pub invitee_id: String,
    pub nickname: String,
}

/// Final values for one player, submitted with the atomic completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    #[serde(flatten)]
    pub record: PlayerScoreRecord,
    pub is_winner: bool,
}

/// The in-memory aggregate one coordinator owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSession {
    pub id: String,
    pub game_id: String,
    pub house_id: String,
    pub creator_id: String,
    pub status: SessionStatus,
    pub scoring: ScoringSnapshot,
    pub players: Vec<PlayerScoreRecord>,
    pub invitations: Vec<SessionInvitation>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GameSession {
    pub fn can_begin(&self) -> bool {
        can_begin(&self.invitations)
    }

    pub fn player(&self, player_id: &str) -> Option<&PlayerScoreRecord> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut PlayerScoreRecord> {
        self.players.iter_mut().find(|p| p.player_id == player_id)
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.player(player_id).is_some()
    }

    /// Creator, players and invitees, whatever their answer.
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.creator_id == user_id
            || self.has_player(user_id)
            || self
                .invitations
                .iter()
                .any(|invitation| invitation.invitee_id == user_id)
    }

    pub fn score_entries(&self) -> Vec<ScoreEntry> {
        self.players.iter().map(PlayerScoreRecord::entry).collect()
    }
}
