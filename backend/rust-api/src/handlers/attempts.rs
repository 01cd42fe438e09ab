use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AttemptError,
    models::{
        attempt::{
            AttemptMode, CompletionReport, DisqualifyRequest, MountAttemptQuery,
            MountAttemptRequest, ProgressReport, SignalRequest, StartAttemptRequest,
        },
        GameKind,
    },
    services::{attempt_registry::MountRequest, AppState},
};

pub async fn mount_attempt(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MountAttemptQuery>,
    Json(req): Json<MountAttemptRequest>,
) -> Result<impl IntoResponse, AttemptError> {
    req.validate()?;
    let game: GameKind = req.game_type.parse()?;
    let mode = if query.trial {
        AttemptMode::Practice
    } else {
        AttemptMode::Scored
    };

    tracing::info!(
        "Mounting attempt: user_id={}, game={}, mode={:?}",
        req.user_id,
        game.as_str(),
        mode
    );

    let (_, snapshot) = state
        .registry
        .mount(MountRequest {
            user_id: req.user_id,
            game,
            quiz_id: req.quiz_id,
            mode,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn get_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AttemptError> {
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.snapshot().await?))
}

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, AttemptError> {
    tracing::info!(
        "Start requested: attempt={}, fullscreen={:?}",
        attempt_id,
        req.fullscreen
    );
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.start(req.fullscreen).await?))
}

/// Raw visibility/fullscreen signal from the page.
pub async fn report_signal(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SignalRequest>,
) -> Result<impl IntoResponse, AttemptError> {
    let handle = state.registry.get(attempt_id).await?;
    let delivered = handle.signal(req.signal);
    tracing::debug!(
        "Signal received: attempt={}, signal={:?}, subscribers={}",
        attempt_id,
        req.signal,
        delivered
    );

    // Ordered after any monitor event the signal produced
    Ok(Json(handle.snapshot().await?))
}

pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
    Json(report): Json<ProgressReport>,
) -> Result<impl IntoResponse, AttemptError> {
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.report_progress(report).await?))
}

pub async fn complete_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
    Json(report): Json<CompletionReport>,
) -> Result<impl IntoResponse, AttemptError> {
    report.validate()?;
    tracing::info!(
        "Completion reported: attempt={}, score={}, failed={}",
        attempt_id,
        report.score,
        report.failed
    );
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.complete(report).await?))
}

pub async fn quit_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AttemptError> {
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.quit().await?))
}

pub async fn disqualify_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
    body: Option<Json<DisqualifyRequest>>,
) -> Result<impl IntoResponse, AttemptError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;
    tracing::warn!(
        "External disqualification: attempt={}, reason={:?}",
        attempt_id,
        req.reason
    );
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.disqualify(req.reason).await?))
}

pub async fn retry_persist(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AttemptError> {
    let handle = state.registry.get(attempt_id).await?;
    Ok(Json(handle.retry_persist().await?))
}

pub async fn dispose_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse, AttemptError> {
    tracing::info!("Disposing attempt: {}", attempt_id);
    Ok(Json(state.registry.dispose(attempt_id).await?))
}
