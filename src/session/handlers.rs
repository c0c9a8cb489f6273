use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{
    coordinator::SessionCoordinator,
    invitations::InvitationService,
    registry::SharedCoordinator,
    types::{
        CompletionOutcome, CreateSessionRequest, EndGamePreview, IncrementScoreRequest,
        RespondInvitationRequest, ScoreAnnotation, ScoreResponse, SessionView, SetScoreRequest,
        UserClaims,
    },
};
use crate::scoring::{scoring_catalog, ScoringTypeDefinition};
use crate::shared::{AppError, AppState};

async fn coordinator_for(state: &AppState, session_id: &str) -> Result<SharedCoordinator, AppError> {
    state
        .registry
        .get(session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session not found: {}", session_id)))
}

/// The scoreboard is driven from the host's device.
fn require_host(coordinator: &SessionCoordinator, claims: &UserClaims) -> Result<(), AppError> {
    if coordinator.creator_id() == claims.sub {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Only the session creator can change scores".to_string(),
        ))
    }
}

fn view_of(coordinator: &SessionCoordinator) -> Result<Json<SessionView>, AppError> {
    coordinator.view().map(Json).ok_or(AppError::Internal)
}

fn score_response(
    coordinator: &SessionCoordinator,
    player_id: &str,
) -> Result<Json<ScoreResponse>, AppError> {
    let session = coordinator.session().ok_or(AppError::Internal)?;
    let record = session
        .player(player_id)
        .ok_or_else(|| AppError::NotFound(format!("Player not found: {}", player_id)))?;
    Ok(Json(ScoreResponse {
        player_id: record.player_id.clone(),
        score: record.score,
        display: record.display_score(&session.scoring),
    }))
}

/// GET /scoring-types
pub async fn list_scoring_types() -> Json<&'static [ScoringTypeDefinition]> {
    Json(scoring_catalog())
}

/// POST /sessions
#[instrument(skip(state, claims, request), fields(user_id = %claims.sub, game_id = %request.game_id))]
pub async fn create_session(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), AppError> {
    let mut coordinator = SessionCoordinator::open(
        state.backend.clone(),
        state.rewards.clone(),
        state.coordinator_config.clone(),
        &request.game_id,
        claims.sub.clone(),
        request.creator_nickname,
    )
    .await?;

    for candidate in request.players {
        coordinator.select_player(candidate)?;
    }
    coordinator.create_session().await?;

    let view = coordinator.view().ok_or(AppError::Internal)?;
    state
        .registry
        .register(coordinator)
        .await
        .ok_or(AppError::Internal)?;

    info!(session_id = %view.session_id, status = view.status.as_ref(), "Session created");
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /sessions/:id
pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let coordinator = coordinator_for(&state, &session_id).await?;
    let coordinator = coordinator.lock().await;
    let session = coordinator.session().ok_or(AppError::Internal)?;
    if !session.is_participant(&claims.sub) {
        return Err(AppError::Forbidden(
            "Only participants can view this session".to_string(),
        ));
    }
    view_of(&coordinator)
}

/// POST /sessions/:id/begin
#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn begin_session(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let coordinator = coordinator_for(&state, &session_id).await?;
    let mut coordinator = coordinator.lock().await;
    coordinator.begin_active_play(&claims.sub).await?;
    view_of(&coordinator)
}

/// POST /sessions/:id/scores/:player_id/increment
pub async fn increment_score(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path((session_id, player_id)): Path<(String, String)>,
    Json(request): Json<IncrementScoreRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    let coordinator = coordinator_for(&state, &session_id).await?;
    let mut coordinator = coordinator.lock().await;
    require_host(&coordinator, &claims)?;
    coordinator.increment_score(&player_id, request.change)?;
    score_response(&coordinator, &player_id)
}

/// PUT /sessions/:id/scores/:player_id
///
/// Annotated entries derive the score from their operands; `value` is used
/// only for plain entries.
pub async fn set_score(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path((session_id, player_id)): Path<(String, String)>,
    Json(request): Json<SetScoreRequest>,
) -> Result<Json<ScoreResponse>, AppError> {
    let coordinator = coordinator_for(&state, &session_id).await?;
    let mut coordinator = coordinator.lock().await;
    require_host(&coordinator, &claims)?;

    match request.annotation {
        Some(ScoreAnnotation::Accuracy { hits, attempts }) => {
            coordinator.set_accuracy(&player_id, hits, attempts)?
        }
        Some(ScoreAnnotation::Ratio {
            numerator,
            denominator,
        }) => coordinator.set_ratio(&player_id, numerator, denominator)?,
        Some(ScoreAnnotation::Measurement {
            original_value,
            unit,
        }) => coordinator.set_measurement(&player_id, original_value, unit)?,
        None => coordinator.set_score(&player_id, request.value, None)?,
    };
    score_response(&coordinator, &player_id)
}

/// POST /sessions/:id/end
pub async fn request_end_game(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<EndGamePreview>, AppError> {
    let coordinator = coordinator_for(&state, &session_id).await?;
    let mut coordinator = coordinator.lock().await;
    require_host(&coordinator, &claims)?;
    Ok(Json(coordinator.request_end_game()?))
}

/// POST /sessions/:id/end/confirm
///
/// A completed session is dropped from the registry.
#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn confirm_end_game(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<CompletionOutcome>, AppError> {
    let shared = coordinator_for(&state, &session_id).await?;
    let mut coordinator = shared.lock().await;
    require_host(&coordinator, &claims)?;
    let outcome = coordinator.confirm_end_game().await?;
    drop(coordinator);

    state.registry.remove(&session_id).await;
    Ok(Json(outcome))
}

/// POST /sessions/:id/cancel
///
/// A cancelled session is dropped from the registry.
#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn cancel_session(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, AppError> {
    let shared = coordinator_for(&state, &session_id).await?;
    let mut coordinator = shared.lock().await;
    coordinator.cancel(&claims.sub).await?;
    let view = view_of(&coordinator)?;
    drop(coordinator);

    state.registry.remove(&session_id).await;
    Ok(view)
}

/// POST /sessions/:id/invitations/respond
///
/// Answered by the invitee. Works without a live coordinator since the host
/// may be on another server.
#[instrument(skip(state, claims), fields(user_id = %claims.sub))]
pub async fn respond_to_invitation(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path(session_id): Path<String>,
    Json(request): Json<RespondInvitationRequest>,
) -> Result<Json<Value>, AppError> {
    let service = InvitationService::new(state.backend.clone());
    let status = service
        .respond(&session_id, &claims.sub, request.accept)
        .await?;
    Ok(Json(json!({ "status": status })))
}

/// DELETE /sessions/:id/invitations/:invitee_id
pub async fn remove_invitation(
    State(state): State<AppState>,
    Extension(claims): Extension<UserClaims>,
    Path((session_id, invitee_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let coordinator = coordinator_for(&state, &session_id).await?;
    let mut coordinator = coordinator.lock().await;
    coordinator.remove_invitation(&claims.sub, &invitee_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
