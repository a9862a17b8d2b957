// src/main.rs

use log::info;
use rusqlite::Connection;
use std::env;

use studyquest_engine::models::AppState;
use studyquest_engine::{
    achievements, daily_tasks, database, engine, repository, AttemptSource, AttemptSubmission,
    EngineConfig,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db_path = env::args().nth(1).unwrap_or_else(|| "studyquest.db".to_string());
    info!("Starting StudyQuest engine demo (db: {})", db_path);

    let conn = Connection::open(&db_path).expect("Failed to open DB");
    database::init_db(&conn).expect("Failed to init DB");

    let state = AppState::new(conn);
    let conn = state.db.lock().unwrap();
    let cfg = EngineConfig::default();

    let player_id = match repository::get_player_by_name(&conn, "demo_learner")
        .expect("Failed to look up demo player")
    {
        Some(p) => p.id,
        None => engine::create_player(&conn, "demo_learner").expect("Failed to create player"),
    };

    // A short practice session: two subjects, one slip-up in the middle.
    let answers = [
        (1, Some(1), true),
        (2, Some(1), true),
        (3, Some(2), true),
        (4, Some(2), false),
        (5, Some(1), true),
        (6, Some(1), true),
        (7, Some(2), true),
        (8, Some(1), true),
    ];
    for (question_id, subject_id, correct) in answers {
        let outcome = engine::submit_attempt(
            &conn,
            &cfg,
            &AttemptSubmission {
                player_id,
                question_id,
                subject_id,
                source: AttemptSource::Practice,
                answer: "demo".to_string(),
                correct,
                time_ms: 4200,
                base_exp: 15,
                base_gold: 6,
            },
        )
        .expect("Failed to submit attempt");

        for a in &outcome.unlocked_achievements {
            println!(
                "Achievement unlocked: {} (+{} exp, +{} gold)",
                a.code, a.exp_reward, a.gold_reward
            );
        }
        for t in &outcome.completed_tasks {
            println!("Daily task completed: {}", t.code);
        }
    }

    let claimed = daily_tasks::claim_all(&conn, &cfg, player_id).expect("Failed to claim tasks");
    if claimed.count > 0 {
        println!(
            "Claimed {} tasks for +{} exp, +{} gold",
            claimed.count, claimed.total_exp, claimed.total_gold
        );
    }

    let view = engine::player_view(&conn, player_id).expect("Failed to load profile");
    println!(
        "{}: level {} ({} / {} exp), {} gold, {} answered, {}% correct, streak {}",
        view.name,
        view.level,
        view.exp,
        view.exp_to_next,
        view.gold,
        view.total_questions_answered,
        view.correct_rate,
        view.correct_streak
    );

    let unlocked = achievements::overview(&conn, &cfg, player_id)
        .expect("Failed to load achievements")
        .into_iter()
        .filter(|a| a.is_unlocked)
        .count();
    let task_stats = daily_tasks::stats(&conn, &cfg, player_id).expect("Failed to load task stats");
    println!(
        "{} achievements unlocked; daily tasks {}/{} completed, {} claimed",
        unlocked, task_stats.completed, task_stats.total, task_stats.claimed
    );

    achievements::mark_all_seen(&conn, player_id).expect("Failed to mark achievements seen");
}
