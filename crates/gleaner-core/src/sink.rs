//! Insertion sink: where successfully collected records go.
//!
//! The relational schema facts end up in is not this crate's concern; the
//! built-in sink appends JSON lines per job so runs are inspectable and can be
//! loaded elsewhere.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::capability::Record;
use crate::registry::Job;

pub trait InsertionSink: Send + Sync {
    /// Store `records` for `job`; returns how many were inserted.
    fn insert(&self, job: &Job, records: &[Record]) -> Result<u64>;
}

/// Appends each record as one JSON line to `<dir>/<job_id>.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let safe: String = job_id
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }
}

impl InsertionSink for JsonLinesSink {
    fn insert(&self, job: &Job, records: &[Record]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create dir: {}", self.dir.display()))?;
        let path = self.path_for(&job.id);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open sink file: {}", path.display()))?;
        let mut out = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut out, record).context("serialize record")?;
            out.write_all(b"\n")?;
        }
        out.flush()
            .with_context(|| format!("write sink file: {}", path.display()))?;
        tracing::debug!(job_id = %job.id, count = records.len(), path = %path.display(), "records inserted");
        Ok(records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_json_lines_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("out"));
        let job = Job::new("shop/catalog", "cap");
        let n = sink
            .insert(&job, &[Record::named("a"), Record::named("b")])
            .unwrap();
        assert_eq!(n, 2);
        sink.insert(&job, &[Record::named("c")]).unwrap();

        let text = std::fs::read_to_string(sink.path_for("shop/catalog")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: Record = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.name.as_deref(), Some("a"));
        assert!(sink.path_for("shop/catalog").ends_with("shop_catalog.jsonl"));
    }

    #[test]
    fn empty_batch_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path());
        assert_eq!(sink.insert(&Job::new("x", "cap"), &[]).unwrap(), 0);
        assert!(!sink.path_for("x").exists());
    }
}
