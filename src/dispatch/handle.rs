use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::dispatch::coordinator::{Coordinator, QueueSnapshot, WorkerSummary};
use crate::error::{DispatchError, Result};
use crate::notify::Notification;
use crate::protocol::JobResult;
use crate::scheduler::Job;
use crate::worker::SystemEnvironment;

/// Requests served by the dispatch loop.
#[derive(Debug)]
pub enum DispatchCommand {
    AddJobs {
        group_title: String,
        job_ids: Vec<String>,
        response_tx: oneshot::Sender<Result<usize>>,
    },
    Prioritize {
        group_title: String,
        job_id: String,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    RemoveGroup {
        group_title: String,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    RegisterWorker {
        address: String,
        environment: SystemEnvironment,
        response_tx: oneshot::Sender<bool>,
    },
    UnregisterWorker {
        address: String,
        response_tx: oneshot::Sender<Result<bool>>,
    },
    ResultReceived {
        address: String,
        result: Option<JobResult>,
        response_tx: oneshot::Sender<Result<()>>,
    },
    ConnectionLost {
        address: String,
        response_tx: oneshot::Sender<Option<Job>>,
    },
    QueueSnapshot {
        response_tx: oneshot::Sender<QueueSnapshot>,
    },
    Workers {
        response_tx: oneshot::Sender<Vec<WorkerSummary>>,
    },
}

/// Build the loop that owns `coordinator` and the handle that talks to it.
pub fn dispatch_channel(
    mut coordinator: Coordinator,
    config: &DispatchConfig,
) -> (DispatchHandle, DispatchLoop) {
    let (command_tx, command_rx) = mpsc::channel(config.command_channel_capacity);
    let (notification_tx, notification_rx) = mpsc::unbounded_channel();
    coordinator.subscribe(notification_tx);

    let handle = DispatchHandle { command_tx };
    let dispatch_loop = DispatchLoop {
        coordinator,
        command_rx,
        notification_rx,
        config: config.clone(),
    };
    (handle, dispatch_loop)
}

/// Cloneable front door to a running [`DispatchLoop`].
///
/// Every call fails with [`DispatchError::CoordinatorStopped`] once the loop
/// has exited.
#[derive(Debug, Clone)]
pub struct DispatchHandle {
    command_tx: mpsc::Sender<DispatchCommand>,
}

impl DispatchHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> DispatchCommand,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build(response_tx))
            .await
            .map_err(|_| DispatchError::CoordinatorStopped)?;
        response_rx
            .await
            .map_err(|_| DispatchError::CoordinatorStopped)
    }

    pub async fn add_jobs(&self, group_title: &str, job_ids: Vec<String>) -> Result<usize> {
        self.request(|response_tx| DispatchCommand::AddJobs {
            group_title: group_title.to_string(),
            job_ids,
            response_tx,
        })
        .await?
    }

    pub async fn prioritize(&self, group_title: &str, job_id: &str) -> Result<bool> {
        self.request(|response_tx| DispatchCommand::Prioritize {
            group_title: group_title.to_string(),
            job_id: job_id.to_string(),
            response_tx,
        })
        .await?
    }

    pub async fn remove_group(&self, group_title: &str) -> Result<bool> {
        self.request(|response_tx| DispatchCommand::RemoveGroup {
            group_title: group_title.to_string(),
            response_tx,
        })
        .await?
    }

    pub async fn register_worker(
        &self,
        address: &str,
        environment: SystemEnvironment,
    ) -> Result<bool> {
        self.request(|response_tx| DispatchCommand::RegisterWorker {
            address: address.to_string(),
            environment,
            response_tx,
        })
        .await
    }

    pub async fn unregister_worker(&self, address: &str) -> Result<bool> {
        self.request(|response_tx| DispatchCommand::UnregisterWorker {
            address: address.to_string(),
            response_tx,
        })
        .await?
    }

    pub async fn result_received(&self, address: &str, result: Option<JobResult>) -> Result<()> {
        self.request(|response_tx| DispatchCommand::ResultReceived {
            address: address.to_string(),
            result,
            response_tx,
        })
        .await?
    }

    /// Returns the job that went back to the queue, if any.
    pub async fn connection_lost(&self, address: &str) -> Result<Option<Job>> {
        self.request(|response_tx| DispatchCommand::ConnectionLost {
            address: address.to_string(),
            response_tx,
        })
        .await
    }

    pub async fn queue_snapshot(&self) -> Result<QueueSnapshot> {
        self.request(|response_tx| DispatchCommand::QueueSnapshot { response_tx })
            .await
    }

    pub async fn workers(&self) -> Result<Vec<WorkerSummary>> {
        self.request(|response_tx| DispatchCommand::Workers { response_tx })
            .await
    }
}

/// Shortest period a loop timer runs at. A zero period would make
/// `tokio::time::interval` panic.
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);

fn timer_period(period: Duration) -> Duration {
    period.max(MIN_TIMER_PERIOD)
}

/// Event loop that owns the [`Coordinator`].
///
/// Commands, pool/queue notifications and timer ticks are handled one at a
/// time, so each dispatch attempt runs to completion before the next event
/// is looked at.
pub struct DispatchLoop {
    coordinator: Coordinator,
    command_rx: mpsc::Receiver<DispatchCommand>,
    notification_rx: mpsc::UnboundedReceiver<Notification>,
    config: DispatchConfig,
}

impl DispatchLoop {
    pub async fn run(mut self, shutdown: CancellationToken) {
        // Polled only when the in-flight timeout is set.
        let mut watchdog = interval(timer_period(self.config.watchdog_interval));
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let reset_every = timer_period(self.config.time_sheet_reset_interval);
        let mut time_sheet_reset = interval_at(Instant::now() + reset_every, reset_every);
        time_sheet_reset.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            max_send_attempts = self.coordinator.max_send_attempts(),
            in_flight_timeout_secs = self.config.in_flight_timeout.map(|t| t.as_secs()),
            "Dispatch loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(
                        queued = self.coordinator.queue().len(),
                        in_flight = self.coordinator.in_flight_count(),
                        "Dispatch loop stopping"
                    );
                    break;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::info!("All dispatch handles dropped, stopping");
                        break;
                    }
                },

                Some(notification) = self.notification_rx.recv() => {
                    match notification {
                        Notification::JobAvailable => {
                            self.coordinator.on_job_available().await;
                        }
                        Notification::WorkerAvailable => {
                            self.coordinator.on_worker_available().await;
                        }
                    }
                }

                _ = watchdog.tick(), if self.config.in_flight_timeout.is_some() => {
                    if let Some(timeout) = self.config.in_flight_timeout {
                        if !self.coordinator.reclaim_stale(timeout).is_empty() {
                            self.coordinator.attempt_dispatch().await;
                        }
                    }
                }

                _ = time_sheet_reset.tick() => {
                    self.coordinator.reset_time_sheets();
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::AddJobs {
                group_title,
                job_ids,
                response_tx,
            } => {
                let result = self.coordinator.add_jobs(&group_title, job_ids);
                let _ = response_tx.send(result);
            }
            DispatchCommand::Prioritize {
                group_title,
                job_id,
                response_tx,
            } => {
                let result = self.coordinator.prioritize(&group_title, &job_id);
                let _ = response_tx.send(result);
            }
            DispatchCommand::RemoveGroup {
                group_title,
                response_tx,
            } => {
                let result = self.coordinator.remove_group(&group_title);
                let _ = response_tx.send(result);
            }
            DispatchCommand::RegisterWorker {
                address,
                environment,
                response_tx,
            } => {
                let accepted = self.coordinator.register_worker(&address, environment);
                let _ = response_tx.send(accepted);
            }
            DispatchCommand::UnregisterWorker {
                address,
                response_tx,
            } => {
                let recovered = self.coordinator.current_job(&address).is_some();
                let result = self.coordinator.unregister_worker(&address);
                let _ = response_tx.send(result);
                if recovered {
                    self.coordinator.attempt_dispatch().await;
                }
            }
            DispatchCommand::ResultReceived {
                address,
                result,
                response_tx,
            } => {
                let outcome = self.coordinator.on_result_received(&address, result).await;
                if let Err(e) = &outcome {
                    tracing::warn!(address = %address, error = %e, "Rejected result");
                }
                let _ = response_tx.send(outcome);
            }
            DispatchCommand::ConnectionLost {
                address,
                response_tx,
            } => {
                let recovered = self.coordinator.on_connection_lost(&address);
                let retry = recovered.is_some();
                let _ = response_tx.send(recovered);
                if retry {
                    self.coordinator.attempt_dispatch().await;
                }
            }
            DispatchCommand::QueueSnapshot { response_tx } => {
                let _ = response_tx.send(self.coordinator.queue_snapshot());
            }
            DispatchCommand::Workers { response_tx } => {
                let _ = response_tx.send(self.coordinator.worker_summaries());
            }
        }
    }
}
