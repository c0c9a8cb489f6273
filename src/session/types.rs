use serde::{Deserialize, Serialize};

use super::models::{InvitationStatus, SessionStatus};
use crate::scoring::{MeasurementUnit, ScoringType};

/// A player row on the selection screen.
///
/// `row_key` only identifies the row in the UI. `user_id` is the account id
/// and is what every persisted record is keyed by; rows without one cannot
/// be turned into a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerCandidate {
    pub row_key: String,
    pub user_id: Option<String>,
    pub nickname: String,
}

impl PlayerCandidate {
    pub fn account(user_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            row_key: user_id.clone(),
            user_id: Some(user_id),
            nickname: nickname.into(),
        }
    }
}

/// Type-specific detail that accompanies a directly entered score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreAnnotation {
    Accuracy { hits: u32, attempts: u32 },
    Ratio { numerator: f64, denominator: f64 },
    Measurement { original_value: f64, unit: MeasurementUnit },
}

impl ScoreAnnotation {
    pub fn kind(&self) -> &'static str {
        match self {
            ScoreAnnotation::Accuracy { .. } => "accuracy",
            ScoreAnnotation::Ratio { .. } => "ratio",
            ScoreAnnotation::Measurement { .. } => "measurement",
        }
    }

    /// Whether this detail can describe a score of the given type. Units
    /// must belong to the type's dimension.
    pub fn fits(&self, scoring_type: ScoringType) -> bool {
        match self {
            ScoreAnnotation::Accuracy { .. } => scoring_type == ScoringType::Accuracy,
            ScoreAnnotation::Ratio { .. } => scoring_type == ScoringType::Ratio,
            ScoreAnnotation::Measurement { unit, .. } => unit.applies_to(scoring_type),
        }
    }
}

/// Result summary shown on the end-game confirmation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndGamePreview {
    pub winner_ids: Vec<String>,
    pub is_solo: bool,
    pub solo_has_score: bool,
    pub is_tie: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub session_id: String,
    pub winner_ids: Vec<String>,
    pub is_solo: bool,
    pub solo_has_score: bool,
    pub is_tie: bool,
}

// HTTP payloads

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub game_id: String,
    pub creator_nickname: String,
    #[serde(default)]
    pub players: Vec<PlayerCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct IncrementScoreRequest {
    pub change: i32,
}

#[derive(Debug, Deserialize)]
pub struct SetScoreRequest {
    pub value: f64,
    pub annotation: Option<ScoreAnnotation>,
}

#[derive(Debug, Deserialize)]
pub struct RespondInvitationRequest {
    pub accept: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub player_id: String,
    pub score: f64,
    pub display: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerView {
    pub player_id: String,
    pub nickname: String,
    pub score: f64,
    pub display: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationView {
    pub invitee_id: String,
    pub nickname: String,
    pub status: InvitationStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub game_id: String,
    pub creator_id: String,
    pub status: SessionStatus,
    pub scoring_type: ScoringType,
    pub lower_is_better: bool,
    pub can_begin: bool,
    pub players: Vec<PlayerView>,
    pub invitations: Vec<InvitationView>,
}

/// JWT claims issued by the auth provider. `sub` is the account id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
}
