// src/progression.rs

use crate::constants::*;
use crate::models::{EngineConfig, EngineError, GrantOutcome, PracticeStatus};
use crate::repository;
use chrono::Utc;
use log::{debug, info};
use rusqlite::Connection;

/// Applies non-negative exp/gold deltas to a player and runs the
/// level-up loop. The only path through which a player's numeric
/// progression fields change.
///
/// The increment itself is a single atomic statement; normalization is a
/// compare-and-swap loop so two concurrent grants both land exactly once
/// whatever the interleaving.
pub fn grant(
    conn: &Connection,
    player_id: i64,
    exp_delta: i64,
    gold_delta: i64,
) -> Result<GrantOutcome, EngineError> {
    let exp_delta = exp_delta.max(0);
    let gold_delta = gold_delta.max(0);

    let changed = repository::add_exp_gold(conn, player_id, exp_delta, gold_delta)?;
    if changed == 0 {
        return Err(EngineError::PlayerNotFound(player_id));
    }

    let mut leveled_up = false;
    loop {
        let p = repository::get_player(conn, player_id)?
            .ok_or(EngineError::PlayerNotFound(player_id))?;
        if p.exp < p.exp_to_next {
            return Ok(GrantOutcome {
                level: p.level,
                exp: p.exp,
                exp_to_next: p.exp_to_next,
                gold: p.gold,
                leveled_up,
            });
        }

        // Carry exp across as many thresholds as the grant covers.
        let (mut level, mut exp, mut next) = (p.level, p.exp, p.exp_to_next);
        while exp >= next {
            exp -= next;
            level += 1;
            next = (next as f64 * EXP_GROWTH_FACTOR).floor() as i64;
        }

        if repository::try_swap_level(conn, player_id, p.level, p.exp, level, exp, next)? == 1 {
            leveled_up = true;
            info!(
                "[Level] Player {}: {} -> {} (exp {}/{})",
                player_id, p.level, level, exp, next
            );
        } else {
            debug!("[Level] Swap lost for player {}, re-reading", player_id);
        }
    }
}

/// Counts this practice answer against the daily reward cap.
///
/// Decides eligibility only; the submission flow zeroes out the
/// attempt's rewards when `can_earn_rewards` is false. The day rollover
/// is evaluated lazily here, never by a scheduled job.
pub fn check_and_advance(
    conn: &Connection,
    cfg: &EngineConfig,
    player_id: i64,
    is_correct: bool,
) -> Result<PracticeStatus, EngineError> {
    let today = cfg.day_index(Utc::now().timestamp());
    loop {
        let p = repository::get_player(conn, player_id)?
            .ok_or(EngineError::PlayerNotFound(player_id))?;

        let (answered, rewarded) = if p.practice_day != today {
            (0, 0)
        } else {
            (p.practice_answered, p.practice_rewarded)
        };

        let eligible = is_correct && rewarded < DAILY_PRACTICE_REWARD_CAP;
        let next = (
            today,
            answered + 1,
            if eligible { rewarded + 1 } else { rewarded },
        );
        let expected = (p.practice_day, p.practice_answered, p.practice_rewarded);

        if repository::try_advance_practice(conn, player_id, expected, next)? == 1 {
            return Ok(PracticeStatus {
                can_earn_rewards: eligible,
                questions_answered_today: next.1,
                rewarded_today: next.2,
            });
        }
        debug!("[Practice] Counter moved under player {}, retrying", player_id);
    }
}

/// Moves the (player, subject) mastery stat for one attempt: a gain when
/// correct, a smaller decay when not, clamped to the stat range.
pub fn update_subject_mastery(
    conn: &Connection,
    player_id: i64,
    subject_id: i64,
    correct: bool,
) -> Result<(), EngineError> {
    let delta = if correct {
        MASTERY_GAIN_CORRECT
    } else {
        -MASTERY_DECAY_INCORRECT
    };
    repository::apply_mastery_delta(conn, player_id, subject_id, delta, MASTERY_MIN, MASTERY_MAX)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        database::init_schema(&conn).unwrap();
        let pid = repository::insert_player(&conn, "tester", 1_000).unwrap();
        (conn, pid)
    }

    #[test]
    fn grant_accumulates_without_leveling_below_threshold() {
        let (conn, pid) = setup();
        let out = grant(&conn, pid, 40, 7).unwrap();
        assert_eq!(out.level, 1);
        assert_eq!(out.exp, 40);
        assert_eq!(out.exp_to_next, 100);
        assert_eq!(out.gold, 7);
        assert!(!out.leveled_up);
    }

    #[test]
    fn grant_levels_up_and_carries_remainder() {
        let (conn, pid) = setup();
        grant(&conn, pid, 90, 0).unwrap();
        let out = grant(&conn, pid, 30, 0).unwrap();
        assert_eq!(out.level, 2);
        assert_eq!(out.exp, 20);
        assert_eq!(out.exp_to_next, 120);
        assert!(out.leveled_up);
    }

    #[test]
    fn one_large_grant_matches_stepwise_grants() {
        let (conn, pid_a) = setup();
        let pid_b = repository::insert_player(&conn, "other", 1_000).unwrap();

        // 100 + 120 + 50 crosses two thresholds.
        let big = grant(&conn, pid_a, 270, 0).unwrap();
        grant(&conn, pid_b, 100, 0).unwrap();
        grant(&conn, pid_b, 120, 0).unwrap();
        let step = grant(&conn, pid_b, 50, 0).unwrap();

        assert_eq!(big.level, step.level);
        assert_eq!(big.exp, step.exp);
        assert_eq!(big.exp_to_next, step.exp_to_next);
        assert_eq!(big.level, 3);
        assert_eq!(big.exp, 50);
        assert_eq!(big.exp_to_next, 144);
    }

    #[test]
    fn exp_stays_normalized_over_arbitrary_sequences() {
        let (conn, pid) = setup();
        let mut prev_threshold = 0;
        for delta in [13, 0, 250, 7, 99, 1000, 1] {
            let out = grant(&conn, pid, delta, delta).unwrap();
            assert!(out.exp >= 0);
            assert!(out.exp < out.exp_to_next);
            assert!(out.exp_to_next >= prev_threshold);
            prev_threshold = out.exp_to_next;
        }
    }

    #[test]
    fn grant_for_unknown_player_is_not_found() {
        let (conn, _) = setup();
        let err = grant(&conn, 9999, 10, 0).unwrap_err();
        assert!(matches!(err, EngineError::PlayerNotFound(9999)));
    }

    #[test]
    fn practice_cap_blocks_rewards_after_twenty_correct() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        for i in 0..20 {
            let s = check_and_advance(&conn, &cfg, pid, true).unwrap();
            assert!(s.can_earn_rewards, "answer {} should be rewarded", i);
        }
        let s = check_and_advance(&conn, &cfg, pid, true).unwrap();
        assert!(!s.can_earn_rewards);
        assert_eq!(s.questions_answered_today, 21);
        assert_eq!(s.rewarded_today, 20);
    }

    #[test]
    fn incorrect_answers_count_but_never_earn() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        let s = check_and_advance(&conn, &cfg, pid, false).unwrap();
        assert!(!s.can_earn_rewards);
        assert_eq!(s.questions_answered_today, 1);
        assert_eq!(s.rewarded_today, 0);
    }

    #[test]
    fn day_rollover_resets_the_counters() {
        let (conn, pid) = setup();
        let cfg = EngineConfig::default();
        for _ in 0..21 {
            check_and_advance(&conn, &cfg, pid, true).unwrap();
        }
        // Pretend the counters were written yesterday.
        conn.execute(
            "UPDATE players SET practice_day = practice_day - 1 WHERE id = ?",
            [pid],
        )
        .unwrap();

        let s = check_and_advance(&conn, &cfg, pid, true).unwrap();
        assert!(s.can_earn_rewards);
        assert_eq!(s.questions_answered_today, 1);
        assert_eq!(s.rewarded_today, 1);
    }

    #[test]
    fn mastery_moves_and_clamps() {
        let (conn, pid) = setup();
        for _ in 0..60 {
            update_subject_mastery(&conn, pid, 1, true).unwrap();
        }
        let m = repository::get_subject_mastery(&conn, pid, 1).unwrap();
        assert_eq!(m, 100.0);

        update_subject_mastery(&conn, pid, 1, false).unwrap();
        let m = repository::get_subject_mastery(&conn, pid, 1).unwrap();
        assert_eq!(m, 99.5);
    }
}
