use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::dispatch::sink::ResultSink;
use crate::dispatch::transport::Transport;
use crate::error::{verify_address, DispatchError, Result};
use crate::notify::Notification;
use crate::protocol::{JobResult, WorkerJob};
use crate::scheduler::{Job, JobQueue};
use crate::worker::{SystemEnvironment, WorkerPool, WorkerState};

/// A job that has been delivered and whose result is outstanding.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub job: Job,
    pub dispatched_at: Instant,
}

/// What one dispatch attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The queue was empty.
    Idle,
    /// No worker was free; the job went back to the queue.
    Deferred,
    /// The job was accepted by a worker.
    Dispatched { address: String, job: Job },
    /// Every send failed; the job went back to the queue.
    Exhausted { attempts: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSummary {
    pub title: String,
    pub queued: usize,
    /// Seconds of benchmarking accounted to the group since the last reset.
    pub benchmarking_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub prioritized: Vec<Job>,
    /// Non-prioritized jobs in service order.
    pub jobs: Vec<Job>,
    pub groups: Vec<GroupSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub address: String,
    pub environment: SystemEnvironment,
    pub state: WorkerState,
    pub current_job: Option<Job>,
}

/// Pairs queued jobs with free benchmarkers.
///
/// The coordinator owns the worker pool, the job queue and the association
/// between occupied workers and the jobs they run. It is not shared: the
/// dispatch loop owns it and applies every event in turn, so a dispatch
/// attempt never interleaves with another mutation.
///
/// Every job is always in exactly one place: queued, in flight on one
/// worker, or completed. Failed sends, empty results, lost connections and
/// unregistrations all put the job back in the queue.
pub struct Coordinator {
    pool: WorkerPool,
    queue: JobQueue,
    in_flight: HashMap<String, InFlight>,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn ResultSink>,
    max_send_attempts: usize,
}

impl Coordinator {
    /// `max_send_attempts` is raised to one if zero, so every dispatch
    /// attempt reaches the transport at least once.
    pub fn new(
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ResultSink>,
        max_send_attempts: usize,
    ) -> Self {
        if max_send_attempts == 0 {
            tracing::warn!("max_send_attempts of 0 would never dispatch, using 1");
        }
        Self {
            pool: WorkerPool::new(),
            queue: JobQueue::new(),
            in_flight: HashMap::new(),
            transport,
            sink,
            max_send_attempts: max_send_attempts.max(1),
        }
    }

    /// Route pool and queue notifications to `tx`.
    pub fn subscribe(&mut self, tx: UnboundedSender<Notification>) {
        self.pool.subscribe(tx.clone());
        self.queue.subscribe(tx);
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn max_send_attempts(&self) -> usize {
        self.max_send_attempts
    }

    pub async fn on_job_available(&mut self) -> DispatchOutcome {
        self.attempt_dispatch().await
    }

    pub async fn on_worker_available(&mut self) -> DispatchOutcome {
        self.attempt_dispatch().await
    }

    /// Try to place the next queued job.
    ///
    /// Picks a free worker and asks the transport to deliver the job, at most
    /// `max_send_attempts` times. A worker that refuses the job stays free and
    /// the next pick moves on to another free worker, if any. Once the
    /// attempts run out, or no worker is free, the job goes back to the front
    /// of the queue.
    pub async fn attempt_dispatch(&mut self) -> DispatchOutcome {
        let Some(job) = self.queue.pop_job() else {
            return DispatchOutcome::Idle;
        };

        for attempt in 1..=self.max_send_attempts {
            let Some(address) = self.pool.get_free() else {
                tracing::debug!(job = %job, "No free worker");
                self.queue.return_job(job);
                return DispatchOutcome::Deferred;
            };

            let worker_job = match WorkerJob::new(&address, &job.group_title, &job.job_id) {
                Ok(worker_job) => worker_job,
                Err(e) => {
                    tracing::error!(job = %job, error = %e, "Cannot build worker job");
                    self.queue.return_job(job);
                    return DispatchOutcome::Deferred;
                }
            };

            if self.transport.send(&worker_job).await {
                if let Err(e) = self.pool.occupy(&address) {
                    tracing::error!(address = %address, error = %e, "Failed to occupy worker");
                }
                self.in_flight.insert(
                    address.clone(),
                    InFlight {
                        job: job.clone(),
                        dispatched_at: Instant::now(),
                    },
                );
                tracing::info!(address = %address, job = %job, attempt, "Dispatched job");
                return DispatchOutcome::Dispatched { address, job };
            }

            tracing::debug!(address = %address, job = %job, attempt, "Send failed");
        }

        tracing::warn!(
            job = %job,
            attempts = self.max_send_attempts,
            "Giving up on dispatch, job returned to the queue"
        );
        self.queue.return_job(job);
        DispatchOutcome::Exhausted {
            attempts: self.max_send_attempts,
        }
    }

    /// Accept the outcome of the job the worker at `address` was running.
    ///
    /// The worker is freed either way. A present result is handed to the
    /// sink and, once stored, its execution time is credited to the job's
    /// group. An absent result, or one the sink fails to store, sends the job
    /// back to the queue.
    pub async fn on_result_received(
        &mut self,
        address: &str,
        result: Option<JobResult>,
    ) -> Result<()> {
        verify_address(address)?;
        if !self.pool.is_occupied(address) {
            return Err(DispatchError::UnknownWorker(address.to_string()));
        }
        let Some(InFlight { job, .. }) = self.in_flight.remove(address) else {
            return Err(DispatchError::UnknownWorker(address.to_string()));
        };

        self.pool.free(address)?;

        let Some(result) = result else {
            tracing::warn!(address = %address, job = %job, "Worker returned no result");
            self.queue.return_job(job);
            return Ok(());
        };

        if let Err(e) = self.sink.save(&result).await {
            tracing::error!(address = %address, job = %job, error = %e, "Failed to store result");
            self.queue.return_job(job);
            return Ok(());
        }
        self.queue
            .add_to_time_sheet(&job.group_title, result.execution_time);

        tracing::info!(
            address = %address,
            job = %job,
            execution_time = result.execution_time,
            "Job completed"
        );
        Ok(())
    }

    /// Recover the job in flight on a worker whose connection dropped.
    ///
    /// Returns the job that went back to the queue, if there was one. The
    /// worker itself is left in the pool; callers unregister it separately.
    pub fn on_connection_lost(&mut self, address: &str) -> Option<Job> {
        if address.trim().is_empty() {
            return None;
        }
        let InFlight { job, .. } = self.in_flight.remove(address)?;

        tracing::warn!(address = %address, job = %job, "Connection lost, job returned to the queue");
        self.queue.return_job(job.clone());
        Some(job)
    }

    pub fn register_worker(&mut self, address: &str, environment: SystemEnvironment) -> bool {
        self.pool.register(address, environment)
    }

    /// Remove a worker, first returning its in-flight job to the queue.
    pub fn unregister_worker(&mut self, address: &str) -> Result<bool> {
        verify_address(address)?;
        self.on_connection_lost(address);
        self.pool.unregister(address)
    }

    /// Queue jobs for a group. Ids that are in flight right now are skipped
    /// along with blank and already queued ones.
    pub fn add_jobs<I, S>(&mut self, group_title: &str, job_ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let running: HashSet<String> = self
            .in_flight
            .values()
            .filter(|f| f.job.group_title == group_title)
            .map(|f| f.job.job_id.clone())
            .collect();

        let fresh: Vec<String> = job_ids
            .into_iter()
            .map(|id| id.as_ref().to_string())
            .filter(|id| !running.contains(id))
            .collect();

        self.queue.add_jobs(group_title, fresh)
    }

    pub fn prioritize(&mut self, group_title: &str, job_id: &str) -> Result<bool> {
        self.queue.prioritize(group_title, job_id)
    }

    /// Drop a group's queued jobs. Jobs already in flight still run.
    pub fn remove_group(&mut self, group_title: &str) -> Result<bool> {
        self.queue.remove_group(group_title)
    }

    pub fn reset_time_sheets(&mut self) {
        self.queue.reset_time_sheets();
    }

    /// Return every job in flight for longer than `timeout` to the queue and
    /// drop its worker from the pool. Returns the dropped addresses.
    pub fn reclaim_stale(&mut self, timeout: Duration) -> Vec<String> {
        let stale: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.dispatched_at.elapsed() >= timeout)
            .map(|(address, _)| address.clone())
            .collect();

        for address in &stale {
            tracing::warn!(
                address = %address,
                timeout_secs = timeout.as_secs(),
                "Worker exceeded the in-flight timeout"
            );
            if let Err(e) = self.unregister_worker(address) {
                tracing::error!(address = %address, error = %e, "Failed to drop stale worker");
            }
        }
        stale
    }

    pub fn current_job(&self, address: &str) -> Option<&Job> {
        self.in_flight.get(address).map(|f| &f.job)
    }

    pub fn in_flight(&self) -> impl Iterator<Item = (&str, &Job)> {
        self.in_flight.iter().map(|(a, f)| (a.as_str(), &f.job))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn queue_snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            prioritized: self.queue.prioritized_jobs().into_iter().cloned().collect(),
            jobs: self.queue.jobs().into_iter().cloned().collect(),
            groups: self
                .queue
                .groups()
                .map(|g| GroupSummary {
                    title: g.title().to_string(),
                    queued: g.len(),
                    benchmarking_time: g.benchmarking_time(),
                })
                .collect(),
        }
    }

    pub fn worker_summaries(&self) -> Vec<WorkerSummary> {
        self.pool
            .workers()
            .map(|w| WorkerSummary {
                address: w.address.clone(),
                environment: w.environment.clone(),
                state: w.state,
                current_job: self.current_job(&w.address).cloned(),
            })
            .collect()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("pool", &self.pool)
            .field("queue", &self.queue)
            .field("in_flight", &self.in_flight)
            .field("max_send_attempts", &self.max_send_attempts)
            .finish()
    }
}
