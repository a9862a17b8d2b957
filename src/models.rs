// src/models.rs

use crate::constants::DAY_SECONDS;
use chrono::{FixedOffset, Offset, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use thiserror::Error;

// --- App State ---

pub struct AppState {
    pub db: Mutex<Connection>,
}

impl AppState {
    pub fn new(conn: Connection) -> Self {
        AppState {
            db: Mutex::new(conn),
        }
    }
}

// --- Errors ---

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("player {0} not found")]
    PlayerNotFound(i64),
    #[error(transparent)]
    Storage(#[from] rusqlite::Error),
}

// --- Engine Configuration ---

/// Reference timezone for all "calendar day" decisions (daily practice
/// reset, daily task windows). Kept explicit so the engine never depends
/// on the host clock's timezone.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub utc_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            utc_offset: Utc.fix(),
        }
    }
}

impl EngineConfig {
    pub fn with_offset(utc_offset: FixedOffset) -> Self {
        EngineConfig { utc_offset }
    }

    /// Days since the Unix epoch in the reference timezone.
    pub fn day_index(&self, ts: i64) -> i64 {
        let off = self.utc_offset.local_minus_utc() as i64;
        (ts + off).div_euclid(DAY_SECONDS)
    }

    /// Unix timestamp of the start of the calendar day containing `ts`.
    pub fn day_start_ts(&self, ts: i64) -> i64 {
        let off = self.utc_offset.local_minus_utc() as i64;
        self.day_index(ts) * DAY_SECONDS - off
    }
}

// --- Requirement Kinds ---

/// Measurable categories of player progress shared by achievements and
/// daily tasks. `GoldSpent`, `LoginDays` and `PerfectScore` exist in the
/// catalog schema but have no computation yet; the aggregator reports 0
/// for them so conditions over them never fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequirementKind {
    QuestionsAnswered,
    CorrectAnswers,
    CorrectStreak,
    ExpEarned,
    GoldEarned,
    LevelReached,
    ItemsPurchased,
    DailyQuestions,
    SubjectMastery,
    GoldSpent,
    LoginDays,
    PerfectScore,
}

impl RequirementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::QuestionsAnswered => "questions_answered",
            RequirementKind::CorrectAnswers => "correct_answers",
            RequirementKind::CorrectStreak => "correct_streak",
            RequirementKind::ExpEarned => "exp_earned",
            RequirementKind::GoldEarned => "gold_earned",
            RequirementKind::LevelReached => "level_reached",
            RequirementKind::ItemsPurchased => "items_purchased",
            RequirementKind::DailyQuestions => "daily_questions",
            RequirementKind::SubjectMastery => "subject_mastery",
            RequirementKind::GoldSpent => "gold_spent",
            RequirementKind::LoginDays => "login_days",
            RequirementKind::PerfectScore => "perfect_score",
        }
    }

    /// Kinds the aggregator cannot compute yet.
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            RequirementKind::GoldSpent
                | RequirementKind::LoginDays
                | RequirementKind::PerfectScore
        )
    }
}

impl FromStr for RequirementKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "questions_answered" => Ok(RequirementKind::QuestionsAnswered),
            "correct_answers" => Ok(RequirementKind::CorrectAnswers),
            "correct_streak" => Ok(RequirementKind::CorrectStreak),
            "exp_earned" => Ok(RequirementKind::ExpEarned),
            "gold_earned" => Ok(RequirementKind::GoldEarned),
            "level_reached" => Ok(RequirementKind::LevelReached),
            "items_purchased" => Ok(RequirementKind::ItemsPurchased),
            "daily_questions" => Ok(RequirementKind::DailyQuestions),
            "subject_mastery" => Ok(RequirementKind::SubjectMastery),
            "gold_spent" => Ok(RequirementKind::GoldSpent),
            "login_days" => Ok(RequirementKind::LoginDays),
            "perfect_score" => Ok(RequirementKind::PerfectScore),
            other => Err(format!("unknown requirement kind: {}", other)),
        }
    }
}

// --- Attempt Sources ---

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttemptSource {
    Practice,
    Stage,
    Exploration,
}

impl AttemptSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptSource::Practice => "practice",
            AttemptSource::Stage => "stage",
            AttemptSource::Exploration => "exploration",
        }
    }
}

// --- Data Models ---

/// Player row as stored. Numeric progression fields are only ever
/// mutated through the leveling ledger and the practice limiter.
#[derive(Debug, Clone)]
pub struct Player {
    pub id: i64,
    pub name: String,
    pub level: i64,
    pub exp: i64,
    pub exp_to_next: i64,
    pub gold: i64,
    pub practice_day: i64,
    pub practice_answered: i64,
    pub practice_rewarded: i64,
    pub created_ts: i64,
}

/// Profile surface: stored fields plus ledger-derived totals.
#[derive(Serialize, Debug)]
pub struct PlayerView {
    pub id: i64,
    pub name: String,
    pub level: i64,
    pub exp: i64,
    pub exp_to_next: i64,
    pub gold: i64,
    pub total_questions_answered: i64,
    pub correct_rate: i64,
    pub correct_streak: i64,
}

/// Immutable ledger record of one submitted answer.
#[derive(Serialize, Debug, Clone)]
pub struct AttemptRecord {
    pub id: i64,
    pub player_id: i64,
    pub question_id: i64,
    pub subject_id: Option<i64>,
    pub source: String,
    pub answer: String,
    pub correct: bool,
    pub time_ms: i64,
    pub exp_granted: i64,
    pub gold_granted: i64,
    pub created_ts: i64,
}

/// One answer submission as handed over by the question-answering flow.
#[derive(Deserialize, Debug)]
pub struct AttemptSubmission {
    pub player_id: i64,
    pub question_id: i64,
    pub subject_id: Option<i64>,
    pub source: AttemptSource,
    pub answer: String,
    pub correct: bool,
    pub time_ms: i64,
    pub base_exp: i64,
    pub base_gold: i64,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct GrantOutcome {
    pub level: i64,
    pub exp: i64,
    pub exp_to_next: i64,
    pub gold: i64,
    pub leveled_up: bool,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct PracticeStatus {
    pub can_earn_rewards: bool,
    pub questions_answered_today: i64,
    pub rewarded_today: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct UnlockedAchievement {
    pub achievement_id: i64,
    pub code: String,
    pub exp_reward: i64,
    pub gold_reward: i64,
}

#[derive(Serialize, Debug)]
pub struct AchievementView {
    pub achievement_id: i64,
    pub code: String,
    pub kind: String,
    pub threshold: i64,
    pub progress: i64,
    pub is_unlocked: bool,
    pub is_hidden: bool,
    pub unlocked_ts: Option<i64>,
    pub unseen: bool,
    pub exp_reward: i64,
    pub gold_reward: i64,
}

#[derive(Serialize, Debug, Clone)]
pub struct CompletedTask {
    pub task_id: i64,
    pub code: String,
    pub exp_reward: i64,
    pub gold_reward: i64,
}

#[derive(Serialize, Debug)]
pub struct TaskView {
    pub task_id: i64,
    pub code: String,
    pub kind: String,
    pub difficulty: String,
    pub progress: i64,
    pub target: i64,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub exp_reward: i64,
    pub gold_reward: i64,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct TaskReward {
    pub exp: i64,
    pub gold: i64,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct ClaimAllOutcome {
    pub total_exp: i64,
    pub total_gold: i64,
    pub count: i64,
}

#[derive(Serialize, Debug, Clone, Copy)]
pub struct DailyTaskStats {
    pub total: i64,
    pub completed: i64,
    pub claimed: i64,
}

/// Everything one answer submission changed, for the controller layer.
#[derive(Serialize, Debug)]
pub struct AttemptOutcome {
    pub is_correct: bool,
    pub exp_awarded: i64,
    pub gold_awarded: i64,
    pub leveling: GrantOutcome,
    pub unlocked_achievements: Vec<UnlockedAchievement>,
    pub completed_tasks: Vec<CompletedTask>,
    pub practice: Option<PracticeStatus>,
}

// --- Catalog Models ---

#[derive(Debug, Clone)]
pub struct AchievementDef {
    pub id: i64,
    pub code: String,
    pub kind: RequirementKind,
    pub threshold: i64,
    pub subject_id: Option<i64>,
    pub exp_reward: i64,
    pub gold_reward: i64,
    pub hidden: bool,
}

/// Task instance joined with its definition, as read for one day.
#[derive(Debug, Clone)]
pub struct TaskInstance {
    pub task_id: i64,
    pub code: String,
    pub kind: RequirementKind,
    pub subject_id: Option<i64>,
    pub target: i64,
    pub difficulty: String,
    pub progress: i64,
    pub is_completed: bool,
    pub is_claimed: bool,
    pub exp_reward: i64,
    pub gold_reward: i64,
}

#[derive(Debug, Clone)]
pub struct DailyTaskDef {
    pub id: i64,
    pub code: String,
    pub kind: RequirementKind,
    pub target: i64,
    pub subject_id: Option<i64>,
    pub exp_reward: i64,
    pub gold_reward: i64,
    pub difficulty: String,
}

// Used for seeding
#[derive(Deserialize)]
pub struct JsonCatalog {
    pub achievements: Vec<JsonAchievement>,
    pub daily_tasks: Vec<JsonDailyTask>,
}

#[derive(Deserialize)]
pub struct JsonAchievement {
    pub code: String,
    pub kind: String,
    pub threshold: i64,
    #[serde(default)]
    pub subject_id: Option<i64>,
    pub exp_reward: i64,
    pub gold_reward: i64,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Deserialize)]
pub struct JsonDailyTask {
    pub code: String,
    pub kind: String,
    pub target: i64,
    #[serde(default)]
    pub subject_id: Option<i64>,
    pub exp_reward: i64,
    pub gold_reward: i64,
    pub difficulty: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_boundaries_follow_the_reference_offset() {
        let utc = EngineConfig::default();
        assert_eq!(utc.day_index(0), 0);
        assert_eq!(utc.day_index(86_399), 0);
        assert_eq!(utc.day_index(86_400), 1);
        assert_eq!(utc.day_start_ts(86_399), 0);

        // 23:00 UTC is already the next day two hours east.
        let east = EngineConfig::with_offset(FixedOffset::east_opt(7_200).unwrap());
        assert_eq!(east.day_index(82_800), 1);
        assert_eq!(east.day_start_ts(82_800), 79_200);

        // ...but still the previous day three hours west.
        let west = EngineConfig::with_offset(FixedOffset::west_opt(10_800).unwrap());
        assert_eq!(west.day_index(7_200), -1);
    }
}
