// src/achievements.rs

use crate::aggregator;
use crate::models::{
    AchievementView, EngineConfig, EngineError, RequirementKind, UnlockedAchievement,
};
use crate::progression;
use crate::repository;
use chrono::Utc;
use log::{debug, info};
use rusqlite::Connection;
use std::collections::HashSet;

/// Re-checks every not-yet-unlocked achievement whose requirement kind
/// was touched by the current event, and performs the one-time unlock
/// plus reward grant for each newly satisfied condition.
///
/// The unlock insert is the race guard: when it reports the row already
/// exists, a concurrent evaluation won and the grant is skipped. Each
/// winning unlock and its grant commit as one unit, so a reward can
/// never be credited without its unlock record or vice versa.
pub fn evaluate(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
    triggered: &HashSet<RequirementKind>,
) -> Result<Vec<UnlockedAchievement>, EngineError> {
    let defs = repository::achievement_defs_for_kinds(conn, triggered)?;
    if defs.is_empty() {
        return Ok(Vec::new());
    }
    let already = repository::unlocked_achievement_ids(conn, player_id)?;
    let snap = aggregator::snapshot(conn, cfg, player_id, triggered)?;
    let now = Utc::now().timestamp();

    let mut unlocked = Vec::new();
    for def in defs {
        if already.contains(&def.id) {
            continue;
        }
        if !def.kind.is_supported() {
            // Catalog kinds with no computation never satisfy.
            continue;
        }
        // Hidden achievements go through the same path; hiding is a
        // display concern only.
        let value = if def.kind == RequirementKind::SubjectMastery {
            aggregator::value(conn, cfg, player_id, def.kind, def.subject_id, None)?
        } else {
            snap.get(&def.kind).copied().unwrap_or(0)
        };
        if value < def.threshold {
            debug!(
                "[Achievement] {} not met for player {} ({}/{})",
                def.code, player_id, value, def.threshold
            );
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        if repository::try_insert_unlock(&tx, player_id, def.id, now)? {
            progression::grant(&tx, player_id, def.exp_reward, def.gold_reward)?;
            tx.commit()?;
            info!(
                "[Achievement] Player {} unlocked {} (+{} exp, +{} gold)",
                player_id, def.code, def.exp_reward, def.gold_reward
            );
            unlocked.push(UnlockedAchievement {
                achievement_id: def.id,
                code: def.code,
                exp_reward: def.exp_reward,
                gold_reward: def.gold_reward,
            });
        }
    }
    Ok(unlocked)
}

/// Full catalog with per-achievement unlock state and clamped progress,
/// for the achievements screen.
pub fn overview(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
) -> Result<Vec<AchievementView>, EngineError> {
    let defs = repository::all_achievement_defs(conn)?;
    let unlocks = repository::unlock_info(conn, player_id)?;

    let mut views = Vec::with_capacity(defs.len());
    for def in defs {
        let unlock = unlocks.get(&def.id);
        let progress = match unlock {
            Some(_) => def.threshold,
            None => {
                let value =
                    aggregator::value(conn, cfg, player_id, def.kind, def.subject_id, None)?;
                value.min(def.threshold)
            }
        };
        views.push(AchievementView {
            achievement_id: def.id,
            code: def.code,
            kind: def.kind.as_str().to_string(),
            threshold: def.threshold,
            progress,
            is_unlocked: unlock.is_some(),
            is_hidden: def.hidden,
            unlocked_ts: unlock.map(|&(ts, _)| ts),
            unseen: unlock.map(|&(_, seen)| !seen).unwrap_or(false),
            exp_reward: def.exp_reward,
            gold_reward: def.gold_reward,
        });
    }
    Ok(views)
}

/// Clears the notification flag on one unlock. Display state only.
pub fn mark_seen(
    conn: &Connection,
    player_id: i64,
    achievement_id: i64,
) -> Result<bool, EngineError> {
    Ok(repository::mark_achievement_seen(conn, player_id, achievement_id)? > 0)
}

/// Clears the notification flag on every unseen unlock.
pub fn mark_all_seen(conn: &Connection, player_id: i64) -> Result<i64, EngineError> {
    Ok(repository::mark_all_achievements_seen(conn, player_id)? as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::models::{AttemptSource, AttemptSubmission};
    use rusqlite::params;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        database::init_schema(&conn).unwrap();
        let pid = repository::insert_player(&conn, "tester", 1_000).unwrap();
        (conn, pid)
    }

    fn define_achievement(conn: &Connection, code: &str, kind: &str, threshold: i64) -> i64 {
        conn.execute(
            "INSERT INTO achievement_defs (code, kind, threshold, exp_reward, gold_reward)
             VALUES (?, ?, ?, 100, 50)",
            params![code, kind, threshold],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn record_correct(conn: &Connection, pid: i64) {
        let sub = AttemptSubmission {
            player_id: pid,
            question_id: 1,
            subject_id: None,
            source: AttemptSource::Practice,
            answer: "ok".into(),
            correct: true,
            time_ms: 1000,
            base_exp: 10,
            base_gold: 5,
        };
        repository::append_attempt(conn, &sub, 10, 5, Utc::now().timestamp()).unwrap();
    }

    #[test]
    fn streak_achievement_unlocks_once_with_rewards() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_achievement(&conn, "unstoppable", "correct_streak", 10);
        for _ in 0..10 {
            record_correct(&conn, pid);
        }

        let triggered = HashSet::from([RequirementKind::CorrectStreak]);
        let unlocked = evaluate(&conn, &cfg, pid, &triggered).unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].code, "unstoppable");

        let p = repository::get_player(&conn, pid).unwrap().unwrap();
        assert_eq!(p.exp, 0); // 100 exp exactly crossed the level-1 threshold
        assert_eq!(p.level, 2);
        assert_eq!(p.gold, 50);
    }

    #[test]
    fn evaluation_is_idempotent_after_unlock() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_achievement(&conn, "sharp_eye", "correct_answers", 2);
        record_correct(&conn, pid);
        record_correct(&conn, pid);

        let triggered = HashSet::from([RequirementKind::CorrectAnswers]);
        let first = evaluate(&conn, &cfg, pid, &triggered).unwrap();
        let second = evaluate(&conn, &cfg, pid, &triggered).unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let p = repository::get_player(&conn, pid).unwrap().unwrap();
        assert_eq!(p.gold, 50); // reward granted exactly once
    }

    #[test]
    fn losing_the_unlock_race_skips_the_grant() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        let aid = define_achievement(&conn, "first_steps", "questions_answered", 1);
        record_correct(&conn, pid);

        // A concurrent evaluation already inserted the unlock row.
        conn.execute(
            "INSERT INTO player_achievements (player_id, achievement_id, unlocked_ts)
             VALUES (?, ?, 0)",
            params![pid, aid],
        )
        .unwrap();

        let triggered = HashSet::from([RequirementKind::QuestionsAnswered]);
        let unlocked = evaluate(&conn, &cfg, pid, &triggered).unwrap();
        assert!(unlocked.is_empty());

        // The guarded insert itself also reports the lost race.
        assert!(!repository::try_insert_unlock(&conn, pid, aid, 1).unwrap());

        let p = repository::get_player(&conn, pid).unwrap().unwrap();
        assert_eq!(p.gold, 0);
        assert_eq!(p.exp, 0);
    }

    #[test]
    fn mastery_achievements_match_their_subject_scope() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        conn.execute(
            "INSERT INTO achievement_defs (code, kind, threshold, subject_id, exp_reward, gold_reward)
             VALUES ('math_virtuoso', 'subject_mastery', 80, 1, 150, 75)",
            [],
        )
        .unwrap();

        // High mastery in the wrong subject does not count.
        repository::apply_mastery_delta(&conn, pid, 2, 90.0, 0.0, 100.0).unwrap();
        let triggered = HashSet::from([RequirementKind::SubjectMastery]);
        assert!(evaluate(&conn, &cfg, pid, &triggered).unwrap().is_empty());

        repository::apply_mastery_delta(&conn, pid, 1, 85.0, 0.0, 100.0).unwrap();
        let unlocked = evaluate(&conn, &cfg, pid, &triggered).unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].code, "math_virtuoso");
    }

    #[test]
    fn unmet_thresholds_do_not_unlock() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_achievement(&conn, "century_scholar", "questions_answered", 100);
        record_correct(&conn, pid);

        let triggered = HashSet::from([RequirementKind::QuestionsAnswered]);
        assert!(evaluate(&conn, &cfg, pid, &triggered).unwrap().is_empty());
    }

    #[test]
    fn unsupported_kind_achievements_never_fire() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_achievement(&conn, "big_spender", "gold_spent", 1);
        record_correct(&conn, pid);

        let triggered = HashSet::from([RequirementKind::GoldSpent]);
        assert!(evaluate(&conn, &cfg, pid, &triggered).unwrap().is_empty());
    }

    #[test]
    fn overview_reports_progress_and_unlock_state() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_achievement(&conn, "sharp_eye", "correct_answers", 5);
        record_correct(&conn, pid);
        record_correct(&conn, pid);

        let views = overview(&conn, &cfg, pid).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].progress, 2);
        assert!(!views[0].is_unlocked);

        for _ in 0..3 {
            record_correct(&conn, pid);
        }
        let triggered = HashSet::from([RequirementKind::CorrectAnswers]);
        evaluate(&conn, &cfg, pid, &triggered).unwrap();

        let views = overview(&conn, &cfg, pid).unwrap();
        assert!(views[0].is_unlocked);
        assert_eq!(views[0].progress, 5);
        assert!(views[0].unseen);

        assert!(mark_seen(&conn, pid, views[0].achievement_id).unwrap());
        let views = overview(&conn, &cfg, pid).unwrap();
        assert!(!views[0].unseen);
    }
}
