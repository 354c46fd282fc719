use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Worker address must not be blank")]
    InvalidAddress,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Worker '{0}' was not tasked with a job")]
    UnknownWorker(String),

    #[error("Dispatch coordinator is not running")]
    CoordinatorStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;

/// Rejects blank worker addresses.
pub(crate) fn verify_address(address: &str) -> Result<()> {
    if address.trim().is_empty() {
        return Err(DispatchError::InvalidAddress);
    }
    Ok(())
}

/// Rejects blank text arguments, naming the offending field in the error.
pub(crate) fn verify_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(DispatchError::InvalidArgument(format!(
            "{} cannot be blank",
            field
        )));
    }
    Ok(())
}
