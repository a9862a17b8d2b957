// src/constants.rs

// --- Time Constants ---
pub const DAY_SECONDS: i64 = 86400;

// --- Leveling ---
pub const LEVEL_START: i64 = 1;
pub const EXP_TO_NEXT_START: i64 = 100; // Threshold at level 1
pub const EXP_GROWTH_FACTOR: f64 = 1.2; // Threshold multiplier per level-up, floored

// --- Daily Practice ---
pub const DAILY_PRACTICE_REWARD_CAP: i64 = 20; // Rewarded correct answers per day

// --- Subject Mastery ---
pub const MASTERY_MIN: f64 = 0.0;
pub const MASTERY_MAX: f64 = 100.0;
pub const MASTERY_GAIN_CORRECT: f64 = 2.0;
pub const MASTERY_DECAY_INCORRECT: f64 = 0.5;
