use chrono::{DateTime, Utc};

use crate::models::{AssessmentSession, GameKind, GameResult};

/// Weight applied to `puzzles_completed` of each game in the total.
fn weight(kind: GameKind) -> u64 {
    match kind {
        GameKind::UnblockMe | GameKind::WaterCapacity => 5,
        // Minesweeper reports points, the quiz reports answer points.
        GameKind::Minesweeper | GameKind::QuestionGame => 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateUpdate {
    pub total_score: Option<u64>,
    /// True only for the write that first made the total valid.
    pub first_completion: bool,
}

/// Total over the recorded results, or `None` while a required game is missing.
pub fn compute_total(session: &AssessmentSession) -> Option<u64> {
    if !GameKind::REQUIRED
        .iter()
        .all(|kind| session.has_attempted(*kind))
    {
        return None;
    }

    Some(
        session
            .results
            .iter()
            .map(|(kind, result)| weight(*kind) * u64::from(result.puzzles_completed))
            .sum(),
    )
}

/// Records `result` for `kind` and recomputes the total when it becomes valid.
pub fn add_result(
    session: &mut AssessmentSession,
    kind: GameKind,
    result: GameResult,
    now: DateTime<Utc>,
) -> AggregateUpdate {
    session.results.insert(kind, result);

    let total_score = compute_total(session);
    let mut first_completion = false;
    if let Some(total) = total_score {
        session.total_score = Some(total);
        if session.completed_at.is_none() {
            session.completed_at = Some(now);
            first_completion = true;
        }
    }

    AggregateUpdate {
        total_score,
        first_completion,
    }
}
