use axum::{
    extract::{Extension, Json, State},
    middleware,
    routing::get,
    Router,
};
use seatlock_core::User;

use crate::error::AppError;
use crate::middleware::{user_auth_middleware, AuthenticatedUser};
use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/users/me", get(current_user))
        .route_layer(middleware::from_fn_with_state(state, user_auth_middleware))
}

/// Profile of the token's subject. A valid token for an unregistered id is a 404.
async fn current_user(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user_id)): Extension<AuthenticatedUser>,
) -> Result<Json<User>, AppError> {
    let user = state
        .queries
        .user(user_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError("User not found".to_string()))?;
    Ok(Json(user))
}
