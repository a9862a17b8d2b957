// src/daily_tasks.rs

use crate::aggregator;
use crate::models::{
    ClaimAllOutcome, CompletedTask, DailyTaskStats, EngineConfig, EngineError, TaskReward,
    TaskView,
};
use crate::progression;
use crate::repository;
use chrono::Utc;
use log::{debug, info};
use rusqlite::Connection;

/// Lazily creates today's instance for every active task definition.
/// Existing rows are left untouched; progress never carries over from a
/// previous day because each day keys its own instances.
pub fn ensure_today(conn: &Connection, cfg: &EngineConfig, player_id: i64) -> Result<(), EngineError> {
    let day = cfg.day_index(Utc::now().timestamp());
    for def in repository::active_task_defs(conn)? {
        repository::ensure_task_instance(conn, player_id, &def, day)?;
    }
    Ok(())
}

/// Today's task list with progress recomputed from the ledger. Derived,
/// never incremented in place, so repeated calls cannot drift or
/// double-count.
pub fn progress_today(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
) -> Result<Vec<TaskView>, EngineError> {
    require_player(conn, player_id)?;
    ensure_today(conn, cfg, player_id)?;

    let now = Utc::now().timestamp();
    let day = cfg.day_index(now);
    let day_start = cfg.day_start_ts(now);

    let mut views = Vec::new();
    for inst in repository::task_instances_for_day(conn, player_id, day)? {
        let (progress, completed) = if inst.is_completed {
            // Completed instances are frozen; a streak that later broke
            // must not un-complete the task.
            (inst.target, true)
        } else {
            let value = aggregator::value(
                conn,
                cfg,
                player_id,
                inst.kind,
                inst.subject_id,
                Some(day_start),
            )?;
            repository::set_task_progress(conn, player_id, inst.task_id, day, value.min(inst.target))?;
            (value.min(inst.target), value >= inst.target)
        };
        views.push(TaskView {
            task_id: inst.task_id,
            code: inst.code,
            kind: inst.kind.as_str().to_string(),
            difficulty: inst.difficulty,
            progress,
            target: inst.target,
            is_completed: completed,
            is_claimed: inst.is_claimed,
            exp_reward: inst.exp_reward,
            gold_reward: inst.gold_reward,
        });
    }
    Ok(views)
}

/// Re-evaluates today's tasks after an attempt and marks the ones that
/// newly reached their target. Returns only the instances this call
/// transitioned; a task completed by a concurrent call is excluded.
pub fn advance(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
) -> Result<Vec<CompletedTask>, EngineError> {
    require_player(conn, player_id)?;
    ensure_today(conn, cfg, player_id)?;

    let now = Utc::now().timestamp();
    let day = cfg.day_index(now);
    let day_start = cfg.day_start_ts(now);

    let mut completed = Vec::new();
    for inst in repository::task_instances_for_day(conn, player_id, day)? {
        if inst.is_completed {
            continue;
        }
        let value = aggregator::value(
            conn,
            cfg,
            player_id,
            inst.kind,
            inst.subject_id,
            Some(day_start),
        )?;
        repository::set_task_progress(conn, player_id, inst.task_id, day, value.min(inst.target))?;
        if value >= inst.target {
            if repository::try_complete_task(conn, player_id, inst.task_id, day, now)? {
                info!(
                    "[DailyTask] Player {} completed {} ({}/{})",
                    player_id, inst.code, value.min(inst.target), inst.target
                );
                completed.push(CompletedTask {
                    task_id: inst.task_id,
                    code: inst.code,
                    exp_reward: inst.exp_reward,
                    gold_reward: inst.gold_reward,
                });
            } else {
                debug!(
                    "[DailyTask] {} already completed for player {}, skipping",
                    inst.code, player_id
                );
            }
        }
    }
    Ok(completed)
}

/// One-time payout for a single completed task. Returns `None` whenever
/// there is nothing to claim: unknown task, not yet completed, or
/// already claimed — indistinguishable by design.
pub fn claim(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
    task_id: i64,
) -> Result<Option<TaskReward>, EngineError> {
    require_player(conn, player_id)?;
    let now = Utc::now().timestamp();
    let day = cfg.day_index(now);

    let tx = conn.unchecked_transaction()?;
    let claimed = repository::try_claim_task(&tx, player_id, task_id, day, now)?;
    match claimed {
        Some((exp, gold)) => {
            progression::grant(&tx, player_id, exp, gold)?;
            tx.commit()?;
            info!(
                "[DailyTask] Player {} claimed task {} (+{} exp, +{} gold)",
                player_id, task_id, exp, gold
            );
            Ok(Some(TaskReward { exp, gold }))
        }
        None => Ok(None),
    }
}

/// Claims every completed-unclaimed task for today in one guarded bulk
/// update. Totals are summed from the instances actually transitioned.
pub fn claim_all(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
) -> Result<ClaimAllOutcome, EngineError> {
    require_player(conn, player_id)?;
    let now = Utc::now().timestamp();
    let day = cfg.day_index(now);

    let tx = conn.unchecked_transaction()?;
    let rewards = repository::claim_all_tasks(&tx, player_id, day, now)?;
    if rewards.is_empty() {
        return Ok(ClaimAllOutcome {
            total_exp: 0,
            total_gold: 0,
            count: 0,
        });
    }
    let total_exp: i64 = rewards.iter().map(|r| r.0).sum();
    let total_gold: i64 = rewards.iter().map(|r| r.1).sum();
    progression::grant(&tx, player_id, total_exp, total_gold)?;
    tx.commit()?;

    info!(
        "[DailyTask] Player {} claimed {} tasks (+{} exp, +{} gold)",
        player_id,
        rewards.len(),
        total_exp,
        total_gold
    );
    Ok(ClaimAllOutcome {
        total_exp,
        total_gold,
        count: rewards.len() as i64,
    })
}

/// Completion/claim counters for the daily tasks screen.
pub fn stats(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
) -> Result<DailyTaskStats, EngineError> {
    require_player(conn, player_id)?;
    ensure_today(conn, cfg, player_id)?;
    let day = cfg.day_index(Utc::now().timestamp());

    let mut stats = DailyTaskStats {
        total: 0,
        completed: 0,
        claimed: 0,
    };
    for inst in repository::task_instances_for_day(conn, player_id, day)? {
        stats.total += 1;
        if inst.is_completed {
            stats.completed += 1;
        }
        if inst.is_claimed {
            stats.claimed += 1;
        }
    }
    Ok(stats)
}

fn require_player(conn: &Connection, player_id: i64) -> Result<(), EngineError> {
    repository::get_player(conn, player_id)?
        .ok_or(EngineError::PlayerNotFound(player_id))
        .map(|_| ())
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

    fn define_task(conn: &Connection, code: &str, kind: &str, target: i64, exp: i64, gold: i64) -> i64 {
        conn.execute(
            "INSERT INTO daily_task_defs (code, kind, target, exp_reward, gold_reward, difficulty)
             VALUES (?, ?, ?, ?, ?, 'normal')",
            params![code, kind, target, exp, gold],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn record_correct(conn: &Connection, pid: i64) {
        let sub = AttemptSubmission {
            player_id: pid,
            question_id: 7,
            subject_id: None,
            source: AttemptSource::Practice,
            answer: "ok".into(),
            correct: true,
            time_ms: 900,
            base_exp: 10,
            base_gold: 5,
        };
        repository::append_attempt(conn, &sub, 10, 5, Utc::now().timestamp()).unwrap();
    }

    #[test]
    fn instances_are_created_once_per_day() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_task(&conn, "warmup", "questions_answered", 5, 20, 10);

        ensure_today(&conn, &cfg, pid).unwrap();
        ensure_today(&conn, &cfg, pid).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM player_daily_tasks WHERE player_id = ?",
                [pid],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn advance_reports_a_completion_exactly_once() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_task(&conn, "two_correct", "correct_answers", 2, 30, 15);

        record_correct(&conn, pid);
        assert!(advance(&conn, &cfg, pid).unwrap().is_empty());

        record_correct(&conn, pid);
        let first = advance(&conn, &cfg, pid).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].code, "two_correct");

        // Further recomputation finds the task already completed.
        let second = advance(&conn, &cfg, pid).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn progress_is_derived_and_clamped() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_task(&conn, "warmup", "questions_answered", 2, 20, 10);

        for _ in 0..5 {
            record_correct(&conn, pid);
        }
        let views = progress_today(&conn, &cfg, pid).unwrap();
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].progress, 2); // min(value, target)
        assert!(views[0].is_completed);
        assert!(!views[0].is_claimed);
    }

    #[test]
    fn claim_pays_once_then_returns_none() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        let tid = define_task(&conn, "two_correct", "correct_answers", 2, 30, 15);

        record_correct(&conn, pid);
        record_correct(&conn, pid);
        advance(&conn, &cfg, pid).unwrap();

        let first = claim(&conn, &cfg, pid, tid).unwrap();
        assert!(matches!(first, Some(TaskReward { exp: 30, gold: 15 })));

        let second = claim(&conn, &cfg, pid, tid).unwrap();
        assert!(second.is_none());

        let p = repository::get_player(&conn, pid).unwrap().unwrap();
        assert_eq!(p.gold, 15);
    }

    #[test]
    fn claim_before_completion_returns_none() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        let tid = define_task(&conn, "ten_today", "questions_answered", 10, 50, 25);

        record_correct(&conn, pid);
        advance(&conn, &cfg, pid).unwrap();

        assert!(claim(&conn, &cfg, pid, tid).unwrap().is_none());
    }

    #[test]
    fn claim_all_pays_each_task_once_across_callers() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_task(&conn, "warmup", "questions_answered", 1, 20, 10);
        define_task(&conn, "two_correct", "correct_answers", 2, 30, 15);

        record_correct(&conn, pid);
        record_correct(&conn, pid);
        advance(&conn, &cfg, pid).unwrap();

        // Two devices hitting claim-all: the bulk guarded update hands
        // every instance to exactly one of them.
        let first = claim_all(&conn, &cfg, pid).unwrap();
        let second = claim_all(&conn, &cfg, pid).unwrap();

        assert_eq!(first.count + second.count, 2);
        assert_eq!(first.total_exp + second.total_exp, 50);
        assert_eq!(first.total_gold + second.total_gold, 25);
        assert_eq!(second.count, 0);

        let p = repository::get_player(&conn, pid).unwrap().unwrap();
        assert_eq!(p.gold, 25);
    }

    #[test]
    fn stats_count_completion_and_claims() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        let tid = define_task(&conn, "warmup", "questions_answered", 1, 20, 10);
        define_task(&conn, "ten_today", "questions_answered", 10, 50, 25);

        record_correct(&conn, pid);
        advance(&conn, &cfg, pid).unwrap();
        claim(&conn, &cfg, pid, tid).unwrap();

        let s = stats(&conn, &cfg, pid).unwrap();
        assert_eq!(s.total, 2);
        assert_eq!(s.completed, 1);
        assert_eq!(s.claimed, 1);
    }

    #[test]
    fn completed_tasks_stay_completed_when_the_metric_drops() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        define_task(&conn, "streak_spark", "correct_streak", 2, 30, 15);

        record_correct(&conn, pid);
        record_correct(&conn, pid);
        advance(&conn, &cfg, pid).unwrap();

        // An incorrect answer breaks the streak afterwards.
        let sub = AttemptSubmission {
            player_id: pid,
            question_id: 9,
            subject_id: None,
            source: AttemptSource::Practice,
            answer: "no".into(),
            correct: false,
            time_ms: 800,
            base_exp: 0,
            base_gold: 0,
        };
        repository::append_attempt(&conn, &sub, 0, 0, Utc::now().timestamp()).unwrap();

        let views = progress_today(&conn, &cfg, pid).unwrap();
        assert!(views[0].is_completed);
        assert_eq!(views[0].progress, 2);
    }
}
