pub mod job;
pub mod queue;

pub use job::{Job, JobGroup};
pub use queue::JobQueue;
