use anyhow::Result;

use super::db::RunHistory;
use crate::engine::ExecutionRecord;

impl RunHistory {
    /// Append one attempt; returns the row id.
    pub async fn record(&self, rec: &ExecutionRecord) -> Result<i64> {
        let (cpu, mem) = match rec.resources {
            Some(r) => (Some(f64::from(r.cpu_percent)), Some(f64::from(r.memory_percent))),
            None => (None, None),
        };
        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                job_id, status, started_at, ended_at,
                records_collected, records_repaired, records_inserted,
                error_kind, error_message, retry_count, cpu_percent, memory_percent
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&rec.job_id)
        .bind(rec.status.as_str())
        .bind(rec.started_at)
        .bind(rec.ended_at)
        .bind(rec.records_collected as i64)
        .bind(rec.records_repaired as i64)
        .bind(rec.records_inserted as i64)
        .bind(rec.error.as_ref().map(|e| e.kind.as_str()))
        .bind(rec.error.as_ref().map(|e| e.message.clone()))
        .bind(i64::from(rec.retry_count))
        .bind(cpu)
        .bind(mem)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fill in the insertion count once the sink has run.
    pub async fn set_inserted(&self, id: i64, inserted: u64) -> Result<()> {
        sqlx::query("UPDATE executions SET records_inserted = ? WHERE id = ?")
            .bind(inserted as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
