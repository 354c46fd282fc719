//! Remote benchmarker bookkeeping.
//!
//! - [`WorkerPool`]: which benchmarkers are registered and whether each one
//!   is free or occupied
//! - [`SystemEnvironment`]: the machine description a benchmarker reports
//!   when it registers
//!
//! The pool only tracks availability. Pairing workers with jobs is the
//! job of [`Coordinator`](crate::dispatch::Coordinator).

pub mod environment;
pub mod pool;

pub use environment::SystemEnvironment;
pub use pool::{Worker, WorkerPool, WorkerState};
