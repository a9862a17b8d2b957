// src/aggregator.rs

use crate::models::{EngineConfig, EngineError, RequirementKind};
use crate::repository;
use chrono::Utc;
use log::debug;
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

/// Computes one progress metric for a player. Pure read over the attempt
/// ledger and player state as of call time; callers re-call after writes.
///
/// `since` restricts ledger-derived kinds to records at or after the
/// given timestamp (the daily task tracker passes start-of-day).
/// Level and mastery are current-state kinds and ignore it.
pub fn value(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
    kind: RequirementKind,
    subject_id: Option<i64>,
    since: Option<i64>,
) -> Result<i64, EngineError> {
    let v = match kind {
        RequirementKind::QuestionsAnswered => {
            repository::count_attempts(conn, player_id, false, subject_id, since)?
        }
        RequirementKind::CorrectAnswers => {
            repository::count_attempts(conn, player_id, true, subject_id, since)?
        }
        RequirementKind::CorrectStreak => repository::correct_streak(conn, player_id, since)?,
        RequirementKind::ExpEarned => repository::sum_granted(conn, player_id, since)?.0,
        RequirementKind::GoldEarned => repository::sum_granted(conn, player_id, since)?.1,
        RequirementKind::LevelReached => {
            let player = repository::get_player(conn, player_id)?
                .ok_or(EngineError::PlayerNotFound(player_id))?;
            player.level
        }
        RequirementKind::ItemsPurchased => repository::items_purchased_total(conn, player_id)?,
        RequirementKind::DailyQuestions => {
            // Always scoped to the current calendar day, whatever the caller passed.
            let day_start = cfg.day_start_ts(Utc::now().timestamp());
            repository::count_attempts(conn, player_id, false, subject_id, Some(day_start))?
        }
        RequirementKind::SubjectMastery => match subject_id {
            Some(sid) => repository::get_subject_mastery(conn, player_id, sid)?.floor() as i64,
            None => {
                debug!(
                    "[Aggregator] subject_mastery requested without a subject for player {}",
                    player_id
                );
                0
            }
        },
        // Defined in the catalog schema but not computable yet. Reported
        // as 0 so conditions over them never fire.
        RequirementKind::GoldSpent | RequirementKind::LoginDays | RequirementKind::PerfectScore => {
            0
        }
    };
    Ok(v)
}

/// All-time snapshot of the requested kinds. Subject-scoped lookups go
/// through [`value`] directly since a snapshot carries no subject axis.
pub fn snapshot(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
    kinds: &HashSet<RequirementKind>,
) -> Result<HashMap<RequirementKind, i64>, EngineError> {
    let mut map = HashMap::with_capacity(kinds.len());
    for &kind in kinds {
        map.insert(kind, value(conn, cfg, player_id, kind, None, None)?);
    }
    debug!("[Aggregator] Snapshot for player {}: {:?}", player_id, map);
    Ok(map)
}
