use std::collections::VecDeque;

use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::{verify_text, Result};
use crate::notify::{Notification, Subscribers, SubscriptionId};
use crate::scheduler::job::{Job, JobGroup};

/// Pending jobs grouped per repository.
///
/// Groups are served round-robin: every `pop_job` moves the rotation cursor
/// past the group it served, so one busy repository cannot monopolize the
/// workers. Jobs moved into the priority lane are served before any group.
///
/// A job that has been popped is no longer held anywhere in the queue until
/// it is handed back with [`JobQueue::return_job`].
#[derive(Debug, Default)]
pub struct JobQueue {
    groups: IndexMap<String, JobGroup>,
    prioritized: VecDeque<Job>,
    /// Index of the first group to consider on the next pop.
    cursor: usize,
    subscribers: Subscribers,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners are told about every job added through `add_job`/`add_jobs`.
    pub fn subscribe(&mut self, tx: UnboundedSender<Notification>) -> SubscriptionId {
        self.subscribers.subscribe(tx)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Append a job to its group, creating the group if needed.
    ///
    /// Returns `Ok(false)` without notifying if the job is already queued.
    pub fn add_job(&mut self, group_title: &str, job_id: &str) -> Result<bool> {
        let job = Job::new(group_title, job_id)?;
        let added = self.enqueue(job);
        if added {
            tracing::debug!(group = %group_title, job_id = %job_id, "Job queued");
            self.subscribers.notify(Notification::JobAvailable);
        }
        Ok(added)
    }

    /// Queue one job per id. Blank and already queued ids are skipped.
    /// The group is created even if no job ends up being added.
    pub fn add_jobs<I, S>(&mut self, group_title: &str, job_ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        verify_text("group title", group_title)?;
        self.group_entry(group_title)?;

        let mut added = 0;
        for job_id in job_ids {
            let job_id = job_id.as_ref();
            if job_id.trim().is_empty() {
                continue;
            }
            if self.enqueue(Job::new(group_title, job_id)?) {
                added += 1;
            }
        }

        tracing::info!(group = %group_title, added, "Added jobs to the queue");
        for _ in 0..added {
            self.subscribers.notify(Notification::JobAvailable);
        }
        Ok(added)
    }

    fn enqueue(&mut self, job: Job) -> bool {
        if self.contains(&job.group_title, &job.job_id) {
            return false;
        }
        match self.group_entry(&job.group_title) {
            Ok(group) => group.push_back(job),
            Err(_) => false,
        }
    }

    fn group_entry(&mut self, title: &str) -> Result<&mut JobGroup> {
        verify_text("group title", title)?;
        Ok(self.groups.entry(title.to_string()).or_insert_with(|| {
            tracing::debug!(group = %title, "Created job group");
            JobGroup::empty(title.to_string())
        }))
    }

    /// Remove and return the next job: the priority lane first, then the
    /// next non-empty group after the one served last.
    pub fn pop_job(&mut self) -> Option<Job> {
        if let Some(job) = self.prioritized.pop_front() {
            return Some(job);
        }

        let n = self.groups.len();
        for offset in 0..n {
            let idx = (self.cursor + offset) % n;
            if let Some((_, group)) = self.groups.get_index_mut(idx) {
                if let Some(job) = group.pop_front() {
                    self.cursor = (idx + 1) % n;
                    return Some(job);
                }
            }
        }
        None
    }

    /// Put a job back at the front of its lane so it is retried before newer
    /// jobs of the same group. Recreates the group if it was removed.
    /// Does not notify subscribers.
    pub fn return_job(&mut self, job: Job) {
        tracing::info!(group = %job.group_title, job_id = %job.job_id, "Job was returned to the queue");

        if self.contains(&job.group_title, &job.job_id) {
            return;
        }
        if job.prioritized {
            self.prioritized.push_front(job);
            return;
        }
        match self.group_entry(&job.group_title) {
            Ok(group) => {
                group.push_front(job);
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot return job with invalid group");
            }
        }
    }

    /// Move a queued job into the priority lane.
    /// Returns false if the group or the job is not queued.
    pub fn prioritize(&mut self, group_title: &str, job_id: &str) -> Result<bool> {
        verify_text("group title", group_title)?;
        verify_text("job id", job_id)?;

        let Some(group) = self.groups.get_mut(group_title) else {
            return Ok(false);
        };
        let Some(job) = group.take(job_id) else {
            return Ok(false);
        };

        tracing::info!(group = %group_title, job_id = %job_id, "Job was prioritized");
        self.prioritized.push_back(job.into_prioritized());
        Ok(true)
    }

    /// Drop a group together with all of its queued and prioritized jobs.
    pub fn remove_group(&mut self, group_title: &str) -> Result<bool> {
        verify_text("group title", group_title)?;

        let Some((idx, _, group)) = self.groups.shift_remove_full(group_title) else {
            return Ok(false);
        };
        if idx < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.groups.len() {
            self.cursor = 0;
        }
        self.prioritized.retain(|j| j.group_title != group_title);

        tracing::info!(group = %group_title, dropped = group.len(), "Removed job group");
        Ok(true)
    }

    /// Account benchmarking time to a group. Unknown groups are ignored.
    pub fn add_to_time_sheet(&mut self, group_title: &str, seconds: u64) {
        if let Some(group) = self.groups.get_mut(group_title) {
            group.add_benchmarking_time(seconds);
        }
    }

    pub fn reset_time_sheets(&mut self) {
        for group in self.groups.values_mut() {
            group.reset_benchmarking_time();
        }
        tracing::info!(groups = self.groups.len(), "Job group time sheets reset");
    }

    pub fn contains(&self, group_title: &str, job_id: &str) -> bool {
        self.prioritized
            .iter()
            .any(|j| j.is_same(group_title, job_id))
            || self
                .groups
                .get(group_title)
                .is_some_and(|g| g.contains(job_id))
    }

    pub fn group(&self, title: &str) -> Option<&JobGroup> {
        self.groups.get(title)
    }

    pub fn groups(&self) -> impl Iterator<Item = &JobGroup> {
        self.groups.values()
    }

    pub fn prioritized_jobs(&self) -> Vec<&Job> {
        self.prioritized.iter().collect()
    }

    /// Non-prioritized jobs in the order `pop_job` would hand them out if no
    /// job were added or returned in between.
    pub fn jobs(&self) -> Vec<&Job> {
        let n = self.groups.len();
        let rotation: Vec<Vec<&Job>> = (0..n)
            .filter_map(|offset| self.groups.get_index((self.cursor + offset) % n))
            .map(|(_, g)| g.jobs().collect())
            .collect();

        let rounds = rotation.iter().map(Vec::len).max().unwrap_or(0);
        let mut ordered = Vec::with_capacity(self.len());
        for round in 0..rounds {
            for group in &rotation {
                if let Some(job) = group.get(round) {
                    ordered.push(*job);
                }
            }
        }
        ordered
    }

    /// Number of queued jobs, prioritized included.
    pub fn len(&self) -> usize {
        self.prioritized.len() + self.groups.values().map(JobGroup::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
