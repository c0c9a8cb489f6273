use thiserror::Error;

/// Failures reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Serialization failure ({code}): {message}")]
    SerializationFailure { code: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// Postgres SQLSTATE for unique constraint violations.
pub const UNIQUE_VIOLATION: &str = "23505";
/// Postgres SQLSTATEs for serialization failures and detected deadlocks.
pub const SERIALIZATION_FAILURES: [&str; 2] = ["40001", "40P01"];

impl BackendError {
    /// Classifies a SQLSTATE-style error code.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == UNIQUE_VIOLATION {
            BackendError::Conflict(message)
        } else if SERIALIZATION_FAILURES.contains(&code) {
            BackendError::SerializationFailure {
                code: code.to_string(),
                message,
            }
        } else {
            BackendError::Database(format!("{} ({})", message, code))
        }
    }

    /// The only class of failure worth a retry.
    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self, BackendError::SerializationFailure { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict(_))
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("The session creator cannot be removed")]
    CreatorRequired,

    #[error("Player row {0} has no account id")]
    MissingUserId(String),

    #[error("Player not found: {0}")]
    PlayerNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Only the session creator can {0}")]
    NotCreator(&'static str),

    #[error("Cannot {action} while the session is {phase}")]
    InvalidState { action: &'static str, phase: String },

    #[error("Invitations are still pending or were declined")]
    InvitationsUnresolved,

    #[error("Ending the game requires confirmation")]
    ConfirmationRequired,

    #[error("Invalid score: {0}")]
    InvalidScore(String),

    #[error("Invitation was already {0}")]
    AlreadyAnswered(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}
