//! Error types for signaling relay operations

use meshcall_types::{TypesError, UserId};
use thiserror::Error;

/// Errors that can occur in signaling relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    Send(String),

    #[error("Subscribe error: {0}")]
    Subscribe(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message error: {0}")]
    Types(#[from] TypesError),

    #[error("Relay unreachable for {0}")]
    Unreachable(UserId),

    #[error("Timeout error")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, RelayError>;
