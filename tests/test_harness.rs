//! Test harness for coordinator and server integration tests.
//!
//! Provides a scriptable transport, a recording result sink, and helpers for
//! running a full server on an ephemeral port.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use bench_dispatch::config::{DispatchConfig, ServerConfig};
use bench_dispatch::dispatch::{Coordinator, ResultSink, Transport};
use bench_dispatch::node::Node;
use bench_dispatch::protocol::{BenchmarkingResult, JobResult, WorkerJob};
use bench_dispatch::worker::SystemEnvironment;
use bench_dispatch::{DispatchError, Result};

/// Transport whose answers are scripted per worker address.
///
/// Each address consumes its scripted outcomes in order; once they run out,
/// or for addresses without a script, `default_outcome` is returned. Every
/// call is recorded.
pub struct ScriptedTransport {
    default_outcome: bool,
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    calls: Mutex<Vec<WorkerJob>>,
}

impl ScriptedTransport {
    pub fn new(default_outcome: bool) -> Arc<Self> {
        Arc::new(Self {
            default_outcome,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn accepting() -> Arc<Self> {
        Self::new(true)
    }

    pub fn refusing() -> Arc<Self> {
        Self::new(false)
    }

    pub fn script(&self, address: &str, outcomes: &[bool]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(address.to_string(), outcomes.iter().copied().collect());
    }

    pub fn calls(&self) -> Vec<WorkerJob> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_to(&self, address: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.address() == address)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, job: &WorkerJob) -> bool {
        self.calls.lock().unwrap().push(job.clone());
        self.scripts
            .lock()
            .unwrap()
            .get_mut(job.address())
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default_outcome)
    }
}

/// Sink that keeps every result in memory, or fails on demand.
#[derive(Default)]
pub struct RecordingSink {
    results: Mutex<Vec<JobResult>>,
    failing: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn results(&self) -> Vec<JobResult> {
        self.results.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().unwrap().len()
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn save(&self, result: &JobResult) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Io(std::io::Error::other("sink offline")));
        }
        self.results.lock().unwrap().push(result.clone());
        Ok(())
    }
}

pub fn coordinator(
    transport: Arc<ScriptedTransport>,
    sink: Arc<RecordingSink>,
    max_send_attempts: usize,
) -> Coordinator {
    Coordinator::new(transport, sink, max_send_attempts)
}

pub fn environment(name: &str) -> SystemEnvironment {
    SystemEnvironment {
        computer_name: name.to_string(),
        os: "Linux".to_string(),
        cores: 8,
        ram: 16,
        ..Default::default()
    }
}

/// A successful result for `commit_hash` of `repository`.
pub fn result_for(repository: &str, commit_hash: &str, execution_time: u64) -> JobResult {
    JobResult {
        execution_time,
        repository: repository.to_string(),
        commit_hash: commit_hash.to_string(),
        system_environment: None,
        benchmarking_result: Some(BenchmarkingResult::default()),
    }
}

/// Dispatch settings with short timers for tests.
pub fn test_dispatch_config() -> DispatchConfig {
    DispatchConfig::default()
        .with_send_timeout(Duration::from_millis(200))
        .with_watchdog_interval(Duration::from_millis(50))
}

/// A server running on an ephemeral local port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    pub async fn start(dispatch: DispatchConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ServerConfig::new(addr).with_dispatch(dispatch);
        let node = Node::new(config).unwrap();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(node.serve(listener, shutdown.clone()));

        Self {
            addr,
            shutdown,
            task,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/connect", self.addr)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
