// src/lib.rs

pub mod achievements;
pub mod aggregator;
pub mod constants;
pub mod daily_tasks;
pub mod database;
pub mod engine;
pub mod models;
pub mod progression;
pub mod repository;

pub use models::{
    AppState, AttemptOutcome, AttemptRecord, AttemptSource, AttemptSubmission, EngineConfig,
    EngineError, RequirementKind,
};
