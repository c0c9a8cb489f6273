// Public API - what other modules can use
pub use coordinator::{CoordinatorConfig, CoordinatorPhase, PlayerSelection, SessionCoordinator};
pub use errors::{BackendError, SessionError};
pub use invitations::{InvitationFeed, InvitationService, InvitationWatcher};
pub use middleware::jwt_auth;
pub use postgres::{PostgresRewardsService, PostgresSessionBackend, INVITATION_CHANNEL};
pub use registry::{SessionRegistry, SharedCoordinator};
pub use repository::{InMemorySessionBackend, SessionBackend};
pub use rewards::{InMemoryRewardsService, RewardsService};
pub use token::TokenConfig;
pub use types::*;

use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};

use crate::shared::AppState;

// Internal modules
mod coordinator;
mod debouncer;
mod errors;
mod handlers;
mod invitations;
mod middleware;
pub mod models;
mod optimistic;
mod postgres;
mod registry;
mod repository;
mod rewards;
mod token;
mod types;

/// All routes. Everything except the scoring catalog requires a Bearer token.
pub fn router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:id", get(handlers::get_session))
        .route("/sessions/:id/begin", post(handlers::begin_session))
        .route(
            "/sessions/:id/scores/:player_id/increment",
            post(handlers::increment_score),
        )
        .route("/sessions/:id/scores/:player_id", put(handlers::set_score))
        .route("/sessions/:id/end", post(handlers::request_end_game))
        .route("/sessions/:id/end/confirm", post(handlers::confirm_end_game))
        .route("/sessions/:id/cancel", post(handlers::cancel_session))
        .route(
            "/sessions/:id/invitations/respond",
            post(handlers::respond_to_invitation),
        )
        .route(
            "/sessions/:id/invitations/:invitee_id",
            delete(handlers::remove_invitation),
        )
        .route_layer(from_fn_with_state(state.clone(), jwt_auth));

    Router::new()
        .route("/scoring-types", get(handlers::list_scoring_types))
        .merge(authenticated)
        .with_state(state)
}
