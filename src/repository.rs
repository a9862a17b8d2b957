// src/repository.rs

use crate::constants::{EXP_TO_NEXT_START, LEVEL_START};
use crate::models::{
    AchievementDef, AttemptRecord, AttemptSubmission, DailyTaskDef, Player, RequirementKind,
    TaskInstance,
};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;

// --- Players ---

pub fn insert_player(conn: &Connection, name: &str, now: i64) -> Result<i64> {
    conn.execute(
        "INSERT INTO players (name, level, exp, exp_to_next, gold, created_ts)
         VALUES (?, ?, 0, ?, 0, ?)",
        params![name, LEVEL_START, EXP_TO_NEXT_START, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_player(conn: &Connection, player_id: i64) -> Result<Option<Player>> {
    conn.query_row(
        "SELECT id, name, level, exp, exp_to_next, gold,
                practice_day, practice_answered, practice_rewarded, created_ts
         FROM players WHERE id = ?",
        [player_id],
        |row| {
            Ok(Player {
                id: row.get(0)?,
                name: row.get(1)?,
                level: row.get(2)?,
                exp: row.get(3)?,
                exp_to_next: row.get(4)?,
                gold: row.get(5)?,
                practice_day: row.get(6)?,
                practice_answered: row.get(7)?,
                practice_rewarded: row.get(8)?,
                created_ts: row.get(9)?,
            })
        },
    )
    .optional()
}

pub fn get_player_by_name(conn: &Connection, name: &str) -> Result<Option<Player>> {
    let id: Option<i64> = conn
        .query_row("SELECT id FROM players WHERE name = ?", [name], |row| {
            row.get(0)
        })
        .optional()?;
    match id {
        Some(id) => get_player(conn, id),
        None => Ok(None),
    }
}

/// Atomic relative increment of a player's exp and gold. Never a
/// read-modify-write of the whole row.
pub fn add_exp_gold(conn: &Connection, player_id: i64, exp: i64, gold: i64) -> Result<usize> {
    conn.execute(
        "UPDATE players SET exp = exp + ?1, gold = gold + ?2 WHERE id = ?3",
        params![exp, gold, player_id],
    )
}

/// Guarded write of the level-up result. Affects zero rows if a
/// concurrent grant moved the row since it was read.
pub fn try_swap_level(
    conn: &Connection,
    player_id: i64,
    old_level: i64,
    old_exp: i64,
    new_level: i64,
    new_exp: i64,
    new_exp_to_next: i64,
) -> Result<usize> {
    conn.execute(
        "UPDATE players SET level = ?1, exp = ?2, exp_to_next = ?3
         WHERE id = ?4 AND level = ?5 AND exp = ?6",
        params![new_level, new_exp, new_exp_to_next, player_id, old_level, old_exp],
    )
}

/// Guarded write of the daily practice triple, keyed on the values the
/// caller read. Zero rows affected means a concurrent call won.
pub fn try_advance_practice(
    conn: &Connection,
    player_id: i64,
    expected: (i64, i64, i64),
    next: (i64, i64, i64),
) -> Result<usize> {
    conn.execute(
        "UPDATE players SET practice_day = ?1, practice_answered = ?2, practice_rewarded = ?3
         WHERE id = ?4 AND practice_day = ?5 AND practice_answered = ?6 AND practice_rewarded = ?7",
        params![next.0, next.1, next.2, player_id, expected.0, expected.1, expected.2],
    )
}

// --- Attempt Ledger (append-only) ---

pub fn append_attempt(
    conn: &Connection,
    sub: &AttemptSubmission,
    exp_granted: i64,
    gold_granted: i64,
    now: i64,
) -> Result<AttemptRecord> {
    conn.execute(
        "INSERT INTO attempts
         (player_id, question_id, subject_id, source, answer, correct, time_ms,
          exp_granted, gold_granted, created_ts)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            sub.player_id,
            sub.question_id,
            sub.subject_id,
            sub.source.as_str(),
            sub.answer,
            sub.correct as i64,
            sub.time_ms,
            exp_granted,
            gold_granted,
            now
        ],
    )?;
    Ok(AttemptRecord {
        id: conn.last_insert_rowid(),
        player_id: sub.player_id,
        question_id: sub.question_id,
        subject_id: sub.subject_id,
        source: sub.source.as_str().to_string(),
        answer: sub.answer.clone(),
        correct: sub.correct,
        time_ms: sub.time_ms,
        exp_granted,
        gold_granted,
        created_ts: now,
    })
}

pub fn count_attempts(
    conn: &Connection,
    player_id: i64,
    correct_only: bool,
    subject_id: Option<i64>,
    since: Option<i64>,
) -> Result<i64> {
    let mut sql = String::from(
        "SELECT count(*) FROM attempts
         WHERE player_id = ?1
           AND (?2 IS NULL OR subject_id = ?2)
           AND (?3 IS NULL OR created_ts >= ?3)",
    );
    if correct_only {
        sql.push_str(" AND correct = 1");
    }
    conn.query_row(&sql, params![player_id, subject_id, since], |row| row.get(0))
}

/// Sum of (exp_granted, gold_granted) over the ledger, optionally
/// restricted to records at or after `since`.
pub fn sum_granted(conn: &Connection, player_id: i64, since: Option<i64>) -> Result<(i64, i64)> {
    conn.query_row(
        "SELECT COALESCE(SUM(exp_granted), 0), COALESCE(SUM(gold_granted), 0)
         FROM attempts
         WHERE player_id = ?1 AND (?2 IS NULL OR created_ts >= ?2)",
        params![player_id, since],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

/// Length of the run of consecutive correct records ending at the most
/// recent one. Walks newest-first and stops at the first incorrect row.
pub fn correct_streak(conn: &Connection, player_id: i64, since: Option<i64>) -> Result<i64> {
    let mut stmt = conn.prepare(
        "SELECT correct FROM attempts
         WHERE player_id = ?1 AND (?2 IS NULL OR created_ts >= ?2)
         ORDER BY id DESC",
    )?;
    let mut rows = stmt.query(params![player_id, since])?;
    let mut streak = 0i64;
    while let Some(row) = rows.next()? {
        let correct: bool = row.get(0)?;
        if !correct {
            break;
        }
        streak += 1;
    }
    Ok(streak)
}

pub fn recent_attempts(conn: &Connection, player_id: i64, limit: i64) -> Result<Vec<AttemptRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, player_id, question_id, subject_id, source, answer, correct,
                time_ms, exp_granted, gold_granted, created_ts
         FROM attempts WHERE player_id = ?
         ORDER BY id DESC LIMIT ?",
    )?;
    let records = stmt
        .query_map(params![player_id, limit], |row| {
            Ok(AttemptRecord {
                id: row.get(0)?,
                player_id: row.get(1)?,
                question_id: row.get(2)?,
                subject_id: row.get(3)?,
                source: row.get(4)?,
                answer: row.get(5)?,
                correct: row.get(6)?,
                time_ms: row.get(7)?,
                exp_granted: row.get(8)?,
                gold_granted: row.get(9)?,
                created_ts: row.get(10)?,
            })
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(records)
}

pub fn total_and_correct(conn: &Connection, player_id: i64) -> Result<(i64, i64)> {
    conn.query_row(
        "SELECT count(*), COALESCE(SUM(correct), 0) FROM attempts WHERE player_id = ?",
        [player_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

// --- Collaborator reads (inventory subsystem) ---

pub fn items_purchased_total(conn: &Connection, player_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(SUM(quantity), 0) FROM inventory_items WHERE player_id = ?",
        [player_id],
        |row| row.get(0),
    )
}

/// Product of the player's non-expired multipliers for one currency.
pub fn effect_multiplier(
    conn: &Connection,
    player_id: i64,
    currency: &str,
    now: i64,
) -> Result<f64> {
    let mut stmt = conn.prepare(
        "SELECT multiplier FROM active_effects
         WHERE player_id = ? AND currency = ? AND expires_ts > ?",
    )?;
    let mut rows = stmt.query(params![player_id, currency, now])?;
    let mut factor = 1.0f64;
    while let Some(row) = rows.next()? {
        let m: f64 = row.get(0)?;
        factor *= m;
    }
    Ok(factor)
}

// --- Subject Mastery ---

pub fn get_subject_mastery(conn: &Connection, player_id: i64, subject_id: i64) -> Result<f64> {
    let mastery = conn
        .query_row(
            "SELECT mastery FROM subject_state WHERE player_id = ? AND subject_id = ?",
            params![player_id, subject_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(mastery.unwrap_or(0.0))
}

/// Upsert that applies the delta and clamps in one statement, so
/// concurrent attempts never lose an update.
pub fn apply_mastery_delta(
    conn: &Connection,
    player_id: i64,
    subject_id: i64,
    delta: f64,
    min: f64,
    max: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO subject_state (player_id, subject_id, mastery, attempts)
         VALUES (?1, ?2, max(?4, min(?5, ?3)), 1)
         ON CONFLICT (player_id, subject_id) DO UPDATE SET
            mastery = max(?4, min(?5, mastery + ?3)),
            attempts = attempts + 1",
        params![player_id, subject_id, delta, min, max],
    )?;
    Ok(())
}

// --- Achievement Catalog & Unlocks ---

fn achievement_from_row(row: &rusqlite::Row) -> Result<(AchievementDef, String)> {
    let kind_str: String = row.get(2)?;
    Ok((
        AchievementDef {
            id: row.get(0)?,
            code: row.get(1)?,
            kind: RequirementKind::QuestionsAnswered, // Placeholder, parsed below
            threshold: row.get(3)?,
            subject_id: row.get(4)?,
            exp_reward: row.get(5)?,
            gold_reward: row.get(6)?,
            hidden: row.get(7)?,
        },
        kind_str,
    ))
}

fn parse_achievement_rows(raw: Vec<(AchievementDef, String)>) -> Vec<AchievementDef> {
    let mut defs = Vec::with_capacity(raw.len());
    for (mut def, kind_str) in raw {
        match RequirementKind::from_str(&kind_str) {
            Ok(kind) => {
                def.kind = kind;
                defs.push(def);
            }
            Err(e) => warn!("[Catalog] Skipping achievement {}: {}", def.code, e),
        }
    }
    defs
}

pub fn achievement_defs_for_kinds(
    conn: &Connection,
    kinds: &HashSet<RequirementKind>,
) -> Result<Vec<AchievementDef>> {
    if kinds.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = kinds.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT id, code, kind, threshold, subject_id, exp_reward, gold_reward, hidden
         FROM achievement_defs
         WHERE active = 1 AND kind IN ({})",
        placeholders
    );
    let params: Vec<Box<dyn rusqlite::ToSql>> = kinds
        .iter()
        .map(|k| Box::new(k.as_str()) as Box<dyn rusqlite::ToSql>)
        .collect();

    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            achievement_from_row(row)
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(parse_achievement_rows(raw))
}

pub fn all_achievement_defs(conn: &Connection) -> Result<Vec<AchievementDef>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, kind, threshold, subject_id, exp_reward, gold_reward, hidden
         FROM achievement_defs WHERE active = 1 ORDER BY id",
    )?;
    let raw = stmt
        .query_map([], |row| achievement_from_row(row))?
        .collect::<Result<Vec<_>>>()?;
    Ok(parse_achievement_rows(raw))
}

pub fn unlocked_achievement_ids(conn: &Connection, player_id: i64) -> Result<HashSet<i64>> {
    let mut stmt =
        conn.prepare("SELECT achievement_id FROM player_achievements WHERE player_id = ?")?;
    let ids = stmt
        .query_map([player_id], |row| row.get(0))?
        .collect::<Result<HashSet<i64>>>()?;
    Ok(ids)
}

/// Map of achievement_id -> (unlocked_ts, seen) for one player.
pub fn unlock_info(conn: &Connection, player_id: i64) -> Result<HashMap<i64, (i64, bool)>> {
    let mut stmt = conn.prepare(
        "SELECT achievement_id, unlocked_ts, seen FROM player_achievements WHERE player_id = ?",
    )?;
    let mut rows = stmt.query([player_id])?;
    let mut info = HashMap::new();
    while let Some(row) = rows.next()? {
        info.insert(row.get::<_, i64>(0)?, (row.get(1)?, row.get(2)?));
    }
    Ok(info)
}

/// One-time unlock insert. Returns false when the (player, achievement)
/// row already exists, i.e. a concurrent evaluation won the race.
pub fn try_insert_unlock(
    conn: &Connection,
    player_id: i64,
    achievement_id: i64,
    now: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO player_achievements (player_id, achievement_id, unlocked_ts)
         VALUES (?, ?, ?)",
        params![player_id, achievement_id, now],
    )?;
    if changed == 0 {
        debug!(
            "[Unlock] Race lost for player {} achievement {}, skipping",
            player_id, achievement_id
        );
    }
    Ok(changed == 1)
}

pub fn mark_achievement_seen(conn: &Connection, player_id: i64, achievement_id: i64) -> Result<usize> {
    conn.execute(
        "UPDATE player_achievements SET seen = 1
         WHERE player_id = ? AND achievement_id = ? AND seen = 0",
        params![player_id, achievement_id],
    )
}

pub fn mark_all_achievements_seen(conn: &Connection, player_id: i64) -> Result<usize> {
    conn.execute(
        "UPDATE player_achievements SET seen = 1 WHERE player_id = ? AND seen = 0",
        [player_id],
    )
}

// --- Daily Task Catalog & Instances ---

pub fn active_task_defs(conn: &Connection) -> Result<Vec<DailyTaskDef>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, kind, target, subject_id, exp_reward, gold_reward, difficulty
         FROM daily_task_defs WHERE active = 1 ORDER BY id",
    )?;
    let raw = stmt
        .query_map([], |row| {
            let kind_str: String = row.get(2)?;
            Ok((
                DailyTaskDef {
                    id: row.get(0)?,
                    code: row.get(1)?,
                    kind: RequirementKind::QuestionsAnswered, // Placeholder, parsed below
                    target: row.get(3)?,
                    subject_id: row.get(4)?,
                    exp_reward: row.get(5)?,
                    gold_reward: row.get(6)?,
                    difficulty: row.get(7)?,
                },
                kind_str,
            ))
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut defs = Vec::with_capacity(raw.len());
    for (mut def, kind_str) in raw {
        match RequirementKind::from_str(&kind_str) {
            Ok(kind) => {
                def.kind = kind;
                defs.push(def);
            }
            Err(e) => warn!("[Catalog] Skipping daily task {}: {}", def.code, e),
        }
    }
    Ok(defs)
}

/// Lazy per-day instance creation; a no-op when today's row exists.
/// Rewards are copied from the definition so claims pay out exactly what
/// the instance was created with.
pub fn ensure_task_instance(
    conn: &Connection,
    player_id: i64,
    def: &DailyTaskDef,
    day: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO player_daily_tasks
         (player_id, task_id, day, exp_reward, gold_reward)
         VALUES (?, ?, ?, ?, ?)",
        params![player_id, def.id, day, def.exp_reward, def.gold_reward],
    )?;
    Ok(())
}

pub fn task_instances_for_day(
    conn: &Connection,
    player_id: i64,
    day: i64,
) -> Result<Vec<TaskInstance>> {
    let mut stmt = conn.prepare(
        "SELECT t.task_id, d.code, d.kind, d.subject_id, d.target, d.difficulty,
                t.progress, t.is_completed, t.is_claimed, t.exp_reward, t.gold_reward
         FROM player_daily_tasks t
         JOIN daily_task_defs d ON d.id = t.task_id
         WHERE t.player_id = ? AND t.day = ?
         ORDER BY t.task_id",
    )?;
    let raw = stmt
        .query_map(params![player_id, day], |row| {
            let kind_str: String = row.get(2)?;
            Ok((
                TaskInstance {
                    task_id: row.get(0)?,
                    code: row.get(1)?,
                    kind: RequirementKind::QuestionsAnswered, // Placeholder, parsed below
                    subject_id: row.get(3)?,
                    target: row.get(4)?,
                    difficulty: row.get(5)?,
                    progress: row.get(6)?,
                    is_completed: row.get(7)?,
                    is_claimed: row.get(8)?,
                    exp_reward: row.get(9)?,
                    gold_reward: row.get(10)?,
                },
                kind_str,
            ))
        })?
        .collect::<Result<Vec<_>>>()?;

    let mut instances = Vec::with_capacity(raw.len());
    for (mut inst, kind_str) in raw {
        match RequirementKind::from_str(&kind_str) {
            Ok(kind) => {
                inst.kind = kind;
                instances.push(inst);
            }
            Err(e) => warn!("[Catalog] Skipping task instance {}: {}", inst.code, e),
        }
    }
    Ok(instances)
}

/// Progress writes never touch completed instances; their progress is
/// frozen at the value that completed them.
pub fn set_task_progress(
    conn: &Connection,
    player_id: i64,
    task_id: i64,
    day: i64,
    progress: i64,
) -> Result<usize> {
    conn.execute(
        "UPDATE player_daily_tasks SET progress = ?1
         WHERE player_id = ?2 AND task_id = ?3 AND day = ?4 AND is_completed = 0",
        params![progress, player_id, task_id, day],
    )
}

/// Guarded incomplete -> completed transition. Returns false when a
/// concurrent call already completed the instance.
pub fn try_complete_task(
    conn: &Connection,
    player_id: i64,
    task_id: i64,
    day: i64,
    now: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE player_daily_tasks SET is_completed = 1, completed_ts = ?1
         WHERE player_id = ?2 AND task_id = ?3 AND day = ?4 AND is_completed = 0",
        params![now, player_id, task_id, day],
    )?;
    Ok(changed == 1)
}

/// Guarded completed-and-unclaimed -> claimed transition. Returns the
/// instance's rewards only when this call performed the transition.
pub fn try_claim_task(
    conn: &Connection,
    player_id: i64,
    task_id: i64,
    day: i64,
    now: i64,
) -> Result<Option<(i64, i64)>> {
    conn.query_row(
        "UPDATE player_daily_tasks SET is_claimed = 1, claimed_ts = ?1
         WHERE player_id = ?2 AND task_id = ?3 AND day = ?4
           AND is_completed = 1 AND is_claimed = 0
         RETURNING exp_reward, gold_reward",
        params![now, player_id, task_id, day],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

/// Bulk guarded claim over all completed-unclaimed instances for one
/// day. The returned rows are exactly the instances this call
/// transitioned, so totals are summed from them and nothing else.
pub fn claim_all_tasks(
    conn: &Connection,
    player_id: i64,
    day: i64,
    now: i64,
) -> Result<Vec<(i64, i64)>> {
    let mut stmt = conn.prepare(
        "UPDATE player_daily_tasks SET is_claimed = 1, claimed_ts = ?1
         WHERE player_id = ?2 AND day = ?3 AND is_completed = 1 AND is_claimed = 0
         RETURNING exp_reward, gold_reward",
    )?;
    let rewards = stmt
        .query_map(params![now, player_id, day], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>>>()?;
    Ok(rewards)
}
