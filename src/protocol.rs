//! Messages exchanged with benchmarkers and the values they carry.
//!
//! Worker sessions speak JSON over a websocket. Every frame is an object
//! tagged by `type`:
//!
//! ```text
//! worker -> server   {"type":"register","environment":{...}}
//!                    {"type":"unregister"}
//!                    {"type":"result","result":{...}}   (or "result":null)
//! server -> worker   {"type":"registered","accepted":true}
//!                    {"type":"unregistered","removed":true}
//!                    {"type":"job","repository":"...","commitHash":"..."}
//!                    {"type":"error","message":"..."}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{verify_address, verify_text, Result};
use crate::worker::SystemEnvironment;

/// Global error reported for a result whose benchmark data never arrived.
pub const RESULT_MISSING_ERROR: &str = "Results could not be sent to the server.";

/// A job bound to the benchmarker it is being sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerJob {
    address: String,
    repository: String,
    commit_hash: String,
}

impl WorkerJob {
    pub fn new(
        address: impl Into<String>,
        repository: impl Into<String>,
        commit_hash: impl Into<String>,
    ) -> Result<Self> {
        let address = address.into();
        let repository = repository.into();
        let commit_hash = commit_hash.into();
        verify_address(&address)?;
        verify_text("repository", &repository)?;
        verify_text("commit hash", &commit_hash)?;

        Ok(Self {
            address,
            repository,
            commit_hash,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn commit_hash(&self) -> &str {
        &self.commit_hash
    }

    /// The payload delivered to the benchmarker.
    pub fn message(&self) -> JobMessage {
        JobMessage {
            repository: self.repository.clone(),
            commit_hash: self.commit_hash.clone(),
        }
    }
}

/// Tells a benchmarker which commit to benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub repository: String,
    pub commit_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultInterpretation {
    LessIsBetter,
    MoreIsBetter,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkProperty {
    #[serde(default)]
    pub results: Vec<f64>,
    pub result_interpretation: ResultInterpretation,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Benchmark {
    #[serde(default)]
    pub properties: HashMap<String, BenchmarkProperty>,
}

/// All benchmarks run for one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkingResult {
    #[serde(default)]
    pub benchmarks: HashMap<String, Benchmark>,
    #[serde(default)]
    pub global_error: Option<String>,
}

/// What a benchmarker reports back after running a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Seconds the benchmarker spent on the job.
    #[serde(default)]
    pub execution_time: u64,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub commit_hash: String,
    #[serde(default)]
    pub system_environment: Option<SystemEnvironment>,
    #[serde(default)]
    pub benchmarking_result: Option<BenchmarkingResult>,
}

impl JobResult {
    pub fn benchmarks(&self) -> HashMap<String, Benchmark> {
        self.benchmarking_result
            .as_ref()
            .map(|r| r.benchmarks.clone())
            .unwrap_or_default()
    }

    /// The run-wide error, if any. Blank errors count as none.
    pub fn global_error(&self) -> Option<&str> {
        match &self.benchmarking_result {
            None => Some(RESULT_MISSING_ERROR),
            Some(result) => result
                .global_error
                .as_deref()
                .filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Frames sent by a benchmarker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerMessage {
    Register {
        #[serde(default)]
        environment: SystemEnvironment,
    },
    Unregister,
    Result {
        #[serde(default)]
        result: Option<JobResult>,
    },
}

/// Frames sent to a benchmarker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Registered { accepted: bool },
    Unregistered { removed: bool },
    Job(JobMessage),
    Error { message: String },
}
