// src/engine.rs

use crate::achievements;
use crate::daily_tasks;
use crate::models::{
    AttemptOutcome, AttemptRecord, AttemptSource, AttemptSubmission, EngineConfig, EngineError,
    PlayerView, RequirementKind,
};
use crate::progression;
use crate::repository;
use chrono::Utc;
use log::info;
use rusqlite::Connection;
use std::collections::HashSet;

/// Processes one submitted answer end to end: practice eligibility,
/// reward computation, ledger append, leveling, mastery, achievement
/// evaluation and daily task advancement, strictly in that order.
pub fn submit_attempt(
    conn: &Connection,
    cfg: &EngineConfig,
    sub: &AttemptSubmission,
) -> Result<AttemptOutcome, EngineError> {
    repository::get_player(conn, sub.player_id)?
        .ok_or(EngineError::PlayerNotFound(sub.player_id))?;
    let now = Utc::now().timestamp();

    // Only ordinary practice is capped; stage and exploration attempts
    // reward every correct answer.
    let practice = match sub.source {
        AttemptSource::Practice => Some(progression::check_and_advance(
            conn,
            cfg,
            sub.player_id,
            sub.correct,
        )?),
        AttemptSource::Stage | AttemptSource::Exploration => None,
    };
    let eligible = match &practice {
        Some(p) => p.can_earn_rewards,
        None => sub.correct,
    };

    let (exp, gold) = if eligible {
        let exp_mult = repository::effect_multiplier(conn, sub.player_id, "exp", now)?;
        let gold_mult = repository::effect_multiplier(conn, sub.player_id, "gold", now)?;
        (
            ((sub.base_exp.max(0) as f64) * exp_mult).floor() as i64,
            ((sub.base_gold.max(0) as f64) * gold_mult).floor() as i64,
        )
    } else {
        (0, 0)
    };

    repository::append_attempt(conn, sub, exp, gold, now)?;
    let leveling = progression::grant(conn, sub.player_id, exp, gold)?;

    if let Some(subject_id) = sub.subject_id {
        progression::update_subject_mastery(conn, sub.player_id, subject_id, sub.correct)?;
    }

    let mut triggered = HashSet::from([
        RequirementKind::QuestionsAnswered,
        RequirementKind::DailyQuestions,
    ]);
    if sub.correct {
        triggered.insert(RequirementKind::CorrectAnswers);
        triggered.insert(RequirementKind::CorrectStreak);
    }
    if exp > 0 {
        triggered.insert(RequirementKind::ExpEarned);
    }
    if gold > 0 {
        triggered.insert(RequirementKind::GoldEarned);
    }
    if leveling.leveled_up {
        triggered.insert(RequirementKind::LevelReached);
    }
    if sub.subject_id.is_some() {
        triggered.insert(RequirementKind::SubjectMastery);
    }

    let unlocked_achievements = achievements::evaluate(conn, cfg, sub.player_id, &triggered)?;
    let completed_tasks = daily_tasks::advance(conn, cfg, sub.player_id)?;

    info!(
        "[Attempt] Player {} question {}: correct={} +{} exp +{} gold, {} unlocks, {} tasks done",
        sub.player_id,
        sub.question_id,
        sub.correct,
        exp,
        gold,
        unlocked_achievements.len(),
        completed_tasks.len()
    );

    Ok(AttemptOutcome {
        is_correct: sub.correct,
        exp_awarded: exp,
        gold_awarded: gold,
        leveling,
        unlocked_achievements,
        completed_tasks,
        practice,
    })
}

pub fn create_player(conn: &Connection, name: &str) -> Result<i64, EngineError> {
    let id = repository::insert_player(conn, name, Utc::now().timestamp())?;
    info!("[Player] Created {} (id {})", name, id);
    Ok(id)
}

/// Profile surface: stored progression plus ledger-derived totals.
pub fn player_view(conn: &Connection, player_id: i64) -> Result<PlayerView, EngineError> {
    let p = repository::get_player(conn, player_id)?
        .ok_or(EngineError::PlayerNotFound(player_id))?;
    let (total, correct) = repository::total_and_correct(conn, player_id)?;
    let streak = repository::correct_streak(conn, player_id, None)?;
    Ok(PlayerView {
        id: p.id,
        name: p.name,
        level: p.level,
        exp: p.exp,
        exp_to_next: p.exp_to_next,
        gold: p.gold,
        total_questions_answered: total,
        correct_rate: if total > 0 { correct * 100 / total } else { 0 },
        correct_streak: streak,
    })
}

pub fn recent_history(
    conn: &Connection,
    player_id: i64,
    limit: i64,
) -> Result<Vec<AttemptRecord>, EngineError> {
    repository::get_player(conn, player_id)?
        .ok_or(EngineError::PlayerNotFound(player_id))?;
    Ok(repository::recent_attempts(conn, player_id, limit)?)
}
