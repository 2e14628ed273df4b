//! Connection and schema for the run history database.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;

use crate::config::state_dir;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the run history: `~/.local/state/gleaner/history.db`.
#[derive(Clone)]
pub struct RunHistory {
    pub(super) pool: Pool<Sqlite>,
}

impl RunHistory {
    pub async fn open_default() -> Result<Self> {
        Self::open_at(state_dir()?.join("history.db")).await
    }

    /// Open (or create) the database at `path`, creating parent dirs as needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&uri)
            .await
            .with_context(|| format!("open history db: {}", path.display()))?;
        let history = RunHistory { pool };
        history.migrate().await?;
        Ok(history)
    }

    /// In-memory database; one connection so every query sees the same data.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let history = RunHistory { pool };
        history.migrate().await?;
        Ok(history)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                ended_at INTEGER NOT NULL,
                records_collected INTEGER NOT NULL DEFAULT 0,
                records_repaired INTEGER NOT NULL DEFAULT 0,
                records_inserted INTEGER NOT NULL DEFAULT 0,
                error_kind TEXT,
                error_message TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                cpu_percent REAL,
                memory_percent REAL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS executions_job ON executions (job_id, started_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
