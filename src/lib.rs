pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod node;
pub mod notify;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use error::{DispatchError, Result};
