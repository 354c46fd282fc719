use std::collections::VecDeque;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{verify_address, Result};
use crate::notify::{Notification, Subscribers, SubscriptionId};
use crate::worker::environment::SystemEnvironment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Free,
    Occupied,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Free => write!(f, "free"),
            WorkerState::Occupied => write!(f, "occupied"),
        }
    }
}

/// A registered benchmarker.
#[derive(Debug, Clone)]
pub struct Worker {
    pub address: String,
    pub environment: SystemEnvironment,
    pub state: WorkerState,
}

/// Registry of benchmarkers and their availability.
///
/// Free workers are handed out in rotation, starting from registration
/// order, so repeated calls to [`WorkerPool::get_free`] cycle through every
/// free worker instead of always returning the same one.
#[derive(Debug, Default)]
pub struct WorkerPool {
    workers: IndexMap<String, Worker>,
    /// Exactly the addresses whose state is `Free`, in hand-out order.
    free: VecDeque<String>,
    subscribers: Subscribers,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners are told whenever a worker becomes free, either by
    /// registering or through [`WorkerPool::free`].
    pub fn subscribe(&mut self, tx: UnboundedSender<Notification>) -> SubscriptionId {
        self.subscribers.subscribe(tx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Add a new free worker. Returns false, leaving the pool untouched, if
    /// the address is blank or already registered.
    pub fn register(&mut self, address: &str, environment: SystemEnvironment) -> bool {
        if verify_address(address).is_err() {
            tracing::warn!("Rejected registration with blank address");
            return false;
        }
        if self.workers.contains_key(address) {
            tracing::debug!(address = %address, "Worker already registered");
            return false;
        }

        self.workers.insert(
            address.to_string(),
            Worker {
                address: address.to_string(),
                environment,
                state: WorkerState::Free,
            },
        );
        self.free.push_back(address.to_string());

        tracing::info!(address = %address, "Registered worker");
        self.subscribers.notify(Notification::WorkerAvailable);
        true
    }

    /// Remove a worker whatever its state. Returns whether it existed.
    pub fn unregister(&mut self, address: &str) -> Result<bool> {
        verify_address(address)?;

        let Some(worker) = self.workers.shift_remove(address) else {
            return Ok(false);
        };
        if worker.state == WorkerState::Free {
            self.free.retain(|a| a != address);
        }

        tracing::info!(address = %address, state = %worker.state, "Unregistered worker");
        Ok(true)
    }

    pub fn has_free(&self) -> bool {
        !self.free.is_empty()
    }

    /// Next free worker in rotation. The worker stays free; callers must
    /// [`occupy`](WorkerPool::occupy) it once the job is delivered.
    ///
    /// This is not a peek: each call moves the returned worker to the back of
    /// the free list, so repeated calls cycle through every free worker
    /// instead of returning the earliest registered one. A worker that
    /// refuses a job is therefore not picked again until the others have
    /// been tried.
    pub fn get_free(&mut self) -> Option<String> {
        let address = self.free.pop_front()?;
        self.free.push_back(address.clone());
        Some(address)
    }

    /// Mark a free worker occupied. Unknown or already occupied addresses
    /// are ignored.
    pub fn occupy(&mut self, address: &str) -> Result<()> {
        verify_address(address)?;

        if let Some(worker) = self.workers.get_mut(address) {
            if worker.state == WorkerState::Free {
                worker.state = WorkerState::Occupied;
                self.free.retain(|a| a != address);
            }
        }
        Ok(())
    }

    /// Mark an occupied worker free again and notify listeners. Unknown or
    /// already free addresses are ignored.
    pub fn free(&mut self, address: &str) -> Result<()> {
        verify_address(address)?;

        if let Some(worker) = self.workers.get_mut(address) {
            if worker.state == WorkerState::Occupied {
                worker.state = WorkerState::Free;
                self.free.push_back(address.to_string());
                self.subscribers.notify(Notification::WorkerAvailable);
            }
        }
        Ok(())
    }

    /// Environment reported at registration, `None` for unknown addresses.
    pub fn capabilities(&self, address: &str) -> Result<Option<&SystemEnvironment>> {
        verify_address(address)?;
        Ok(self.workers.get(address).map(|w| &w.environment))
    }

    pub fn state(&self, address: &str) -> Option<WorkerState> {
        self.workers.get(address).map(|w| w.state)
    }

    pub fn is_occupied(&self, address: &str) -> bool {
        self.state(address) == Some(WorkerState::Occupied)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.workers.contains_key(address)
    }

    /// Registered addresses in registration order.
    pub fn addresses(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
