// src/database.rs

use crate::models::JsonCatalog;
use log::info;
use rusqlite::{params, Connection, Result};

pub fn init_db(conn: &Connection) -> Result<()> {
    init_schema(conn)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM achievement_defs", [], |row| row.get(0))?;
    if count == 0 {
        info!("[DB] Catalog empty. Seeding definitions...");
        seed_catalog(conn)?;
    }

    Ok(())
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS players (
            id INTEGER PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            level INTEGER NOT NULL DEFAULT 1,
            exp INTEGER NOT NULL DEFAULT 0,
            exp_to_next INTEGER NOT NULL DEFAULT 100,
            gold INTEGER NOT NULL DEFAULT 0,
            practice_day INTEGER NOT NULL DEFAULT 0,
            practice_answered INTEGER NOT NULL DEFAULT 0,
            practice_rewarded INTEGER NOT NULL DEFAULT 0,
            created_ts INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY,
            player_id INTEGER NOT NULL,
            question_id INTEGER NOT NULL,
            subject_id INTEGER,
            source TEXT NOT NULL CHECK (source IN ('practice','stage','exploration')),
            answer TEXT NOT NULL,
            correct INTEGER NOT NULL,
            time_ms INTEGER NOT NULL,
            exp_granted INTEGER NOT NULL,
            gold_granted INTEGER NOT NULL,
            created_ts INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_attempts_player_ts
            ON attempts (player_id, created_ts);
        CREATE TABLE IF NOT EXISTS achievement_defs (
            id INTEGER PRIMARY KEY,
            code TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL,
            threshold INTEGER NOT NULL CHECK (threshold >= 1),
            subject_id INTEGER,
            exp_reward INTEGER NOT NULL DEFAULT 0,
            gold_reward INTEGER NOT NULL DEFAULT 0,
            hidden INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS player_achievements (
            player_id INTEGER NOT NULL,
            achievement_id INTEGER NOT NULL,
            unlocked_ts INTEGER NOT NULL,
            seen INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (player_id, achievement_id)
        );
        CREATE TABLE IF NOT EXISTS daily_task_defs (
            id INTEGER PRIMARY KEY,
            code TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL,
            target INTEGER NOT NULL CHECK (target >= 1),
            subject_id INTEGER,
            exp_reward INTEGER NOT NULL DEFAULT 0,
            gold_reward INTEGER NOT NULL DEFAULT 0,
            difficulty TEXT NOT NULL DEFAULT 'normal',
            active INTEGER NOT NULL DEFAULT 1
        );
        CREATE TABLE IF NOT EXISTS player_daily_tasks (
            player_id INTEGER NOT NULL,
            task_id INTEGER NOT NULL,
            day INTEGER NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            is_completed INTEGER NOT NULL DEFAULT 0,
            is_claimed INTEGER NOT NULL DEFAULT 0,
            completed_ts INTEGER,
            claimed_ts INTEGER,
            exp_reward INTEGER NOT NULL,
            gold_reward INTEGER NOT NULL,
            PRIMARY KEY (player_id, task_id, day)
        );
        CREATE TABLE IF NOT EXISTS subject_state (
            player_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL,
            mastery REAL NOT NULL DEFAULT 0.0,
            attempts INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (player_id, subject_id)
        );
        -- Owned by the inventory subsystem; this engine only reads them.
        CREATE TABLE IF NOT EXISTS inventory_items (
            player_id INTEGER NOT NULL,
            item_id INTEGER NOT NULL,
            quantity INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (player_id, item_id)
        );
        CREATE TABLE IF NOT EXISTS active_effects (
            id INTEGER PRIMARY KEY,
            player_id INTEGER NOT NULL,
            currency TEXT NOT NULL CHECK (currency IN ('exp','gold')),
            multiplier REAL NOT NULL,
            expires_ts INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn seed_catalog(conn: &Connection) -> Result<()> {
    // Note: This relies on the file strictly existing in src/data/
    let data = include_str!("data/catalog.json");
    let catalog: JsonCatalog = serde_json::from_str(data).expect("Error parsing catalog JSON");

    let mut a_stmt = conn.prepare(
        "INSERT OR IGNORE INTO achievement_defs
         (code, kind, threshold, subject_id, exp_reward, gold_reward, hidden)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for a in &catalog.achievements {
        a_stmt.execute(params![
            a.code,
            a.kind,
            a.threshold,
            a.subject_id,
            a.exp_reward,
            a.gold_reward,
            a.hidden as i64
        ])?;
    }

    let mut t_stmt = conn.prepare(
        "INSERT OR IGNORE INTO daily_task_defs
         (code, kind, target, subject_id, exp_reward, gold_reward, difficulty)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )?;
    for t in &catalog.daily_tasks {
        t_stmt.execute(params![
            t.code,
            t.kind,
            t.target,
            t.subject_id,
            t.exp_reward,
            t.gold_reward,
            t.difficulty
        ])?;
    }

    info!(
        "[DB] Seeded {} achievements, {} daily tasks",
        catalog.achievements.len(),
        catalog.daily_tasks.len()
    );
    Ok(())
}
