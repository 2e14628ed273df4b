use std::collections::HashMap;

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::db::RunHistory;
use super::types::{HistoryEntry, JobCounters};
use crate::engine::{ErrorKind, ExecutionRecord, ExecutionStatus, JobError, ResourceSnapshot};

fn entry_from_row(row: &SqliteRow) -> HistoryEntry {
    let status: String = row.get("status");
    let error_kind: Option<String> = row.get("error_kind");
    let error_message: Option<String> = row.get("error_message");
    let cpu: Option<f64> = row.get("cpu_percent");
    let mem: Option<f64> = row.get("memory_percent");
    let error = error_kind.map(|k| {
        JobError::new(
            ErrorKind::from_str(&k).unwrap_or(ErrorKind::Capability),
            error_message.unwrap_or_default(),
        )
    });
    let resources = match (cpu, mem) {
        (Some(c), Some(m)) => Some(ResourceSnapshot {
            cpu_percent: c as f32,
            memory_percent: m as f32,
        }),
        _ => None,
    };
    HistoryEntry {
        id: row.get("id"),
        record: ExecutionRecord {
            job_id: row.get("job_id"),
            status: ExecutionStatus::from_str(&status),
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            records_collected: row.get::<i64, _>("records_collected").max(0) as u64,
            records_repaired: row.get::<i64, _>("records_repaired").max(0) as u64,
            records_inserted: row.get::<i64, _>("records_inserted").max(0) as u64,
            error,
            retry_count: row.get::<i64, _>("retry_count").clamp(0, i64::from(u32::MAX)) as u32,
            resources,
        },
    }
}

impl RunHistory {
    /// Most recent attempts first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, status, started_at, ended_at,
                   records_collected, records_repaired, records_inserted,
                   error_kind, error_message, retry_count, cpu_percent, memory_percent
            FROM executions
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    pub async fn job_counters(&self, job_id: &str) -> Result<JobCounters> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS attempts,
                COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS successes,
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failures,
                COALESCE(SUM(records_collected), 0) AS collected,
                COALESCE(SUM(records_inserted), 0) AS inserted,
                MAX(CASE WHEN status = 'success' THEN ended_at END) AS last_success
            FROM executions
            WHERE job_id = ?
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(JobCounters {
            attempts: row.get::<i64, _>("attempts").max(0) as u64,
            successes: row.get::<i64, _>("successes").max(0) as u64,
            failures: row.get::<i64, _>("failures").max(0) as u64,
            records_collected: row.get::<i64, _>("collected").max(0) as u64,
            records_inserted: row.get::<i64, _>("inserted").max(0) as u64,
            last_success: row.get("last_success"),
        })
    }

    /// `job_id -> ended_at` of its last successful attempt.
    pub async fn last_success_by_job(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT job_id, MAX(ended_at) AS last_success
            FROM executions
            WHERE status = 'success'
            GROUP BY job_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = HashMap::with_capacity(rows.len());
        for row in rows {
            let job_id: String = row.get("job_id");
            let last: i64 = row.get("last_success");
            out.insert(job_id, last);
        }
        Ok(out)
    }
}
