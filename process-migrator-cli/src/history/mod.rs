//! Run history repository
//!
//! Append-only list of run summaries in a local SQLite database, capped at
//! a fixed retention count with the oldest entries evicted first.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use std::path::PathBuf;

use crate::engine::RunResult;

/// Entries kept before the oldest are evicted
pub const RETENTION_LIMIT: i64 = 50;

/// One persisted run summary
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HistoryEntry {
    pub id: String,
    pub source_url: String,
    pub target_url: String,
    pub source_process_name: String,
    pub target_process_name: String,
    pub mode: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn from_run(run: &RunResult) -> Self {
        Self {
            id: run.id.clone(),
            source_url: run.source_url.clone(),
            target_url: run.target_url.clone(),
            source_process_name: run.source_process_name.clone(),
            target_process_name: run.target_process_name.clone(),
            mode: run.mode.as_str().to_string(),
            status: run.status.as_str().to_string(),
            started_at: run.started_at,
            completed_at: run.completed_at,
            duration_ms: run.duration_ms(),
            error: run.error.clone(),
        }
    }
}

/// Default database location under the user config directory
pub fn default_db_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("process-migrator");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir.join("history.db"))
}

/// Open (creating if needed) the history database
pub async fn open(path: &std::path::Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("Failed to open history database: {}", path.display()))?;
    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS migration_history (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL,
            target_url TEXT NOT NULL,
            source_process_name TEXT NOT NULL,
            target_process_name TEXT NOT NULL,
            mode TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            error TEXT
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create migration_history table")?;

    Ok(())
}

/// Append a run summary, evicting the oldest entries past the retention cap
pub async fn add_entry(pool: &SqlitePool, entry: &HistoryEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO migration_history
         (id, source_url, target_url, source_process_name, target_process_name,
          mode, status, started_at, completed_at, duration_ms, error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.source_url)
    .bind(&entry.target_url)
    .bind(&entry.source_process_name)
    .bind(&entry.target_process_name)
    .bind(&entry.mode)
    .bind(&entry.status)
    .bind(entry.started_at)
    .bind(entry.completed_at)
    .bind(entry.duration_ms)
    .bind(&entry.error)
    .execute(pool)
    .await
    .context("Failed to add history entry")?;

    sqlx::query(
        "DELETE FROM migration_history
         WHERE id NOT IN (
             SELECT id FROM migration_history
             ORDER BY started_at DESC
             LIMIT ?
         )",
    )
    .bind(RETENTION_LIMIT)
    .execute(pool)
    .await
    .context("Failed to evict old history entries")?;

    Ok(())
}

/// All entries, newest first
pub async fn get_history(pool: &SqlitePool) -> Result<Vec<HistoryEntry>> {
    sqlx::query_as::<_, HistoryEntry>(
        "SELECT id, source_url, target_url, source_process_name, target_process_name,
                mode, status, started_at, completed_at, duration_ms, error
         FROM migration_history
         ORDER BY started_at DESC",
    )
    .fetch_all(pool)
    .await
    .context("Failed to get history")
}

pub async fn clear_history(pool: &SqlitePool) -> Result<()> {
    sqlx::query("DELETE FROM migration_history")
        .execute(pool)
        .await
        .context("Failed to clear history")?;
    Ok(())
}
