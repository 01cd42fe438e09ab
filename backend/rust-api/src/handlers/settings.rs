use axum::{extract::State, response::IntoResponse, Json};
use std::sync::Arc;

use crate::models::system_settings::PublicSettingsResponse;
use crate::services::AppState;

/// Roles and contact links shown on the assessment landing page.
pub async fn get_public_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let settings = state.settings.current().await;
    Json(PublicSettingsResponse::from(settings))
}
