use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{verify_text, Result};

/// One unit of benchmarking work: a commit (`job_id`) of the repository
/// identified by `group_title`.
///
/// Two jobs are equal when group and id match; the queue timestamp and the
/// priority flag are bookkeeping only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub group_title: String,
    pub job_id: String,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub prioritized: bool,
}

impl Job {
    pub fn new(group_title: impl Into<String>, job_id: impl Into<String>) -> Result<Self> {
        let group_title = group_title.into();
        let job_id = job_id.into();
        verify_text("group title", &group_title)?;
        verify_text("job id", &job_id)?;

        Ok(Self {
            group_title,
            job_id,
            queued_at: Utc::now(),
            prioritized: false,
        })
    }

    /// Copy of this job placed in the priority lane.
    pub(crate) fn into_prioritized(self) -> Self {
        Self {
            prioritized: true,
            ..self
        }
    }

    pub fn is_same(&self, group_title: &str, job_id: &str) -> bool {
        self.group_title == group_title && self.job_id == job_id
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(&other.group_title, &other.job_id)
    }
}

impl Eq for Job {}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {}", self.group_title, self.job_id)
    }
}

/// FIFO of pending jobs belonging to one repository, plus the time the
/// repository has spent on benchmarkers since the last reset.
#[derive(Debug, Clone)]
pub struct JobGroup {
    title: String,
    jobs: VecDeque<Job>,
    benchmarking_time: u64,
}

impl JobGroup {
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let title = title.into();
        verify_text("group title", &title)?;
        Ok(Self::empty(title))
    }

    pub(crate) fn empty(title: String) -> Self {
        Self {
            title,
            jobs: VecDeque::new(),
            benchmarking_time: 0,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.iter().any(|j| j.job_id == job_id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Seconds of benchmarking time accumulated since the last reset.
    pub fn benchmarking_time(&self) -> u64 {
        self.benchmarking_time
    }

    pub(crate) fn add_benchmarking_time(&mut self, seconds: u64) {
        self.benchmarking_time = self.benchmarking_time.saturating_add(seconds);
    }

    pub(crate) fn reset_benchmarking_time(&mut self) {
        self.benchmarking_time = 0;
    }

    /// Returns false if a job with the same id is already queued.
    pub(crate) fn push_back(&mut self, job: Job) -> bool {
        if self.contains(&job.job_id) {
            return false;
        }
        self.jobs.push_back(job);
        true
    }

    pub(crate) fn push_front(&mut self, job: Job) -> bool {
        if self.contains(&job.job_id) {
            return false;
        }
        self.jobs.push_front(job);
        true
    }

    pub(crate) fn pop_front(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    pub(crate) fn take(&mut self, job_id: &str) -> Option<Job> {
        let idx = self.jobs.iter().position(|j| j.job_id == job_id)?;
        self.jobs.remove(idx)
    }
}
