//! Pairing queued jobs with free benchmarkers.
//!
//! - [`Coordinator`]: owns the pool, the queue and the in-flight jobs, and
//!   runs the bounded dispatch attempt
//! - [`DispatchLoop`]/[`DispatchHandle`]: the task that owns the coordinator
//!   and the cloneable handle everything else uses to reach it
//! - [`Transport`]: how a job reaches a benchmarker
//! - [`ResultSink`]: where finished results go

pub mod coordinator;
pub mod handle;
pub mod sink;
pub mod transport;

pub use coordinator::{
    Coordinator, DispatchOutcome, GroupSummary, InFlight, QueueSnapshot, WorkerSummary,
};
pub use handle::{dispatch_channel, DispatchCommand, DispatchHandle, DispatchLoop};
pub use sink::{JsonLinesResultSink, LogResultSink, ResultSink};
pub use transport::{SessionSender, Transport, WebSocketTransport};
