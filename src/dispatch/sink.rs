use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::protocol::JobResult;

/// Persists the results benchmarkers report.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(&self, result: &JobResult) -> Result<()>;
}

/// Logs a one-line summary of every result and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogResultSink;

#[async_trait]
impl ResultSink for LogResultSink {
    async fn save(&self, result: &JobResult) -> Result<()> {
        tracing::info!(
            repository = %result.repository,
            commit = %result.commit_hash,
            execution_time = result.execution_time,
            benchmarks = result.benchmarks().len(),
            global_error = ?result.global_error(),
            "Benchmarking result received"
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct ResultRecord<'a> {
    received_at: DateTime<Utc>,
    #[serde(flatten)]
    result: &'a JobResult,
}

/// Appends every result to a file, one JSON document per line.
///
/// Writes go through `tokio::fs`, so a slow disk parks the dispatch loop's
/// task instead of blocking a runtime thread.
pub struct JsonLinesResultSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesResultSink {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        tracing::info!(path = %path.display(), "Writing results to file");
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(File::from_std(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResultSink for JsonLinesResultSink {
    async fn save(&self, result: &JobResult) -> Result<()> {
        let record = ResultRecord {
            received_at: Utc::now(),
            result,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl std::fmt::Debug for JsonLinesResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesResultSink")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(commit: &str) -> JobResult {
        JobResult {
            execution_time: 7,
            repository: "repo".to_string(),
            commit_hash: commit.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn json_lines_sink_appends_one_line_per_result() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let sink = JsonLinesResultSink::open(&path).unwrap();

        sink.save(&sample("a")).await.unwrap();
        sink.save(&sample("b")).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["commitHash"], "a");
        assert_eq!(lines[1]["commitHash"], "b");
        assert_eq!(lines[1]["executionTime"], 7);
        assert!(lines[0]["received_at"].is_string());
    }

    #[tokio::test]
    async fn json_lines_sink_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        for commit in ["a", "b"] {
            JsonLinesResultSink::open(&path)
                .unwrap()
                .save(&sample(commit))
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn log_sink_accepts_everything() {
        assert!(LogResultSink.save(&sample("a")).await.is_ok());
    }
}
