//! Prerequisite chain over the assessment games.
//!
//! A game counts as attempted as soon as it has a recorded result, failed or
//! not. Only the presence of the result matters, never its score.

use std::collections::BTreeMap;

use crate::error::AttemptError;
use crate::models::attempt::AttemptMode;
use crate::models::{GameKind, GameResult};

pub fn is_unlocked(kind: GameKind, results: &BTreeMap<GameKind, GameResult>) -> bool {
    missing_prerequisites(kind, results).is_empty()
}

pub fn missing_prerequisites(
    kind: GameKind,
    results: &BTreeMap<GameKind, GameResult>,
) -> Vec<GameKind> {
    kind.prerequisites()
        .iter()
        .copied()
        .filter(|prerequisite| !results.contains_key(prerequisite))
        .collect()
}

/// Decides whether an attempt at `kind` may be mounted. Practice attempts are
/// never gated.
pub fn check_entry(
    kind: GameKind,
    mode: AttemptMode,
    results: &BTreeMap<GameKind, GameResult>,
) -> Result<(), AttemptError> {
    if mode == AttemptMode::Practice {
        return Ok(());
    }

    let missing = missing_prerequisites(kind, results);
    if !missing.is_empty() {
        return Err(AttemptError::LockedGame { kind, missing });
    }

    if results.contains_key(&kind) {
        return Err(AttemptError::AlreadyCompleted(kind));
    }

    Ok(())
}
