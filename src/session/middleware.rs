use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument, warn};

use crate::shared::{AppError, AppState};

/// Validates the `Authorization: Bearer` header and adds [`UserClaims`] to the
/// request extensions.
///
/// Usage: `.layer(middleware::from_fn_with_state(app_state.clone(), session::jwt_auth))`.
/// Handlers then extract `Extension(claims): Extension<UserClaims>`.
///
/// [`UserClaims`]: super::types::UserClaims
#[instrument(skip(state, req, next), fields(uri = %req.uri()))]
pub async fn jwt_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Authorization header in request");
            AppError::Unauthorized("Missing authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        warn!("Invalid Authorization header format (expected Bearer token)");
        AppError::Unauthorized("Invalid authorization header format".to_string())
    })?;

    let claims = match state.tokens.validate_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("JWT authentication failed: {}", e);
            return Err(e);
        }
    };

    debug!(user_id = %claims.sub, "Authenticated request");
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
