// Library crate for the house party game server
// Scoring rules are pure; the session module owns lifecycle and persistence.

pub mod config;
pub mod scoring;
pub mod session;
pub mod shared;

// Re-export commonly used types for easier access in tests
pub use config::AppConfig;
pub use scoring::{determine_winner, format_score, get_scoring_type_config, ScoreEntry, ScoringType};
pub use session::{
    router, CoordinatorConfig, InMemoryRewardsService, InMemorySessionBackend, SessionBackend,
    SessionCoordinator, SessionError,
};
pub use shared::{AppError, AppState};
