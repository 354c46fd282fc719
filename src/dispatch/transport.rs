use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};

use crate::protocol::{ServerMessage, WorkerJob};

/// Delivers jobs to benchmarkers.
///
/// `send` reports whether the benchmarker accepted the job. Ordinary
/// network trouble is a `false`, never a panic, and implementations must
/// bound the call in time so an unresponsive worker cannot stall dispatch.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, job: &WorkerJob) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, job: &WorkerJob) -> bool {
        (**self).send(job).await
    }
}

/// Outbound frame queue of one connected benchmarker.
pub type SessionSender = mpsc::Sender<ServerMessage>;

/// Routes jobs to websocket sessions by worker address.
///
/// Each session registers the sending half of its outbound queue; a job is
/// delivered once it is accepted by that queue within `send_timeout`.
#[derive(Clone)]
pub struct WebSocketTransport {
    sessions: Arc<RwLock<HashMap<String, SessionSender>>>,
    send_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            send_timeout,
        }
    }

    pub async fn open_session(&self, address: &str, tx: SessionSender) {
        self.sessions.write().await.insert(address.to_string(), tx);
        tracing::debug!(address = %address, "Session opened");
    }

    /// Returns whether a session was open for the address.
    pub async fn close_session(&self, address: &str) -> bool {
        let removed = self.sessions.write().await.remove(address).is_some();
        if removed {
            tracing::debug!(address = %address, "Session closed");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, job: &WorkerJob) -> bool {
        let tx = self.sessions.read().await.get(job.address()).cloned();
        let Some(tx) = tx else {
            tracing::debug!(address = %job.address(), "No session for worker");
            return false;
        };

        let frame = ServerMessage::Job(job.message());
        match tokio::time::timeout(self.send_timeout, tx.send(frame)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                tracing::debug!(address = %job.address(), "Session closed during send");
                false
            }
            Err(_) => {
                tracing::debug!(
                    address = %job.address(),
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "Send timed out"
                );
                false
            }
        }
    }
}
