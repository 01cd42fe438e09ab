use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    error::AttemptError,
    services::{attempt_registry::overview_of, AppState},
};

/// Creates the user's assessment if it does not exist yet. Idempotent.
pub async fn create_assessment(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AttemptError> {
    tracing::info!("Ensuring assessment for user_id={}", user_id);
    let session = state.registry.ensure_session(&user_id).await?;
    Ok((StatusCode::CREATED, Json(overview_of(&session))))
}

/// Per-game lock state, results and total score.
pub async fn get_assessment(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AttemptError> {
    Ok(Json(state.registry.overview(&user_id).await?))
}
