use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::models::attempt::AttemptPhase;
use crate::models::GameKind;

/// Where the client is sent after a refused game entry.
pub const OVERVIEW_REDIRECT: &str = "/assessment";

#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("{kind} is locked: finish {} first", join_names(.missing))]
    LockedGame {
        kind: GameKind,
        missing: Vec<GameKind>,
    },

    #[error("{0} has already been completed")]
    AlreadyCompleted(GameKind),

    #[error("fullscreen request was denied by the browser")]
    FullscreenDenied,

    #[error("attempt is {0:?} and cannot accept this action")]
    InvalidPhase(AttemptPhase),

    #[error("attempt {0} not found")]
    AttemptNotFound(Uuid),

    #[error("unknown game type: {0}")]
    UnknownGame(String),

    #[error("invalid report: {0}")]
    InvalidReport(String),

    #[error("failed to persist assessment: {0}")]
    Persistence(String),
}

fn join_names(kinds: &[GameKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.display_name())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AttemptError {
    fn status(&self) -> StatusCode {
        match self {
            AttemptError::LockedGame { .. } => StatusCode::FORBIDDEN,
            AttemptError::AlreadyCompleted(_) | AttemptError::InvalidPhase(_) => {
                StatusCode::CONFLICT
            }
            AttemptError::FullscreenDenied => StatusCode::UNPROCESSABLE_ENTITY,
            AttemptError::AttemptNotFound(_) => StatusCode::NOT_FOUND,
            AttemptError::UnknownGame(_) | AttemptError::InvalidReport(_) => {
                StatusCode::BAD_REQUEST
            }
            AttemptError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AttemptError::LockedGame { .. } => "locked_game",
            AttemptError::AlreadyCompleted(_) => "already_completed",
            AttemptError::FullscreenDenied => "fullscreen_denied",
            AttemptError::InvalidPhase(_) => "invalid_phase",
            AttemptError::AttemptNotFound(_) => "attempt_not_found",
            AttemptError::UnknownGame(_) => "unknown_game",
            AttemptError::InvalidReport(_) => "invalid_report",
            AttemptError::Persistence(_) => "persistence_failure",
        }
    }
}

impl IntoResponse for AttemptError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Attempt request failed: {}", self);
        } else {
            tracing::info!("Attempt request refused: {}", self);
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        match &self {
            AttemptError::LockedGame { missing, .. } => {
                body["missing_prerequisites"] = json!(missing);
                body["redirect"] = json!(OVERVIEW_REDIRECT);
            }
            AttemptError::AlreadyCompleted(_) => {
                body["redirect"] = json!(OVERVIEW_REDIRECT);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for AttemptError {
    fn from(err: validator::ValidationErrors) -> Self {
        AttemptError::InvalidReport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_game_message_names_missing_prerequisites() {
        let err = AttemptError::LockedGame {
            kind: GameKind::QuestionGame,
            missing: vec![GameKind::Minesweeper, GameKind::WaterCapacity],
        };
        assert_eq!(
            err.to_string(),
            "Question Game is locked: finish Minesweeper, Water Capacity first"
        );
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn fullscreen_denied_is_not_a_server_error() {
        assert!(!AttemptError::FullscreenDenied.status().is_server_error());
    }
}
