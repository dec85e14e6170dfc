use thiserror::Error;

/// Failures surfaced by the transfer core
#[derive(Debug, Error)]
pub enum TransferError {
    /// Send attempted while no connection is open
    #[error("No peer connected")]
    NoActiveConnection,

    /// A file is already streaming on this session
    #[error("A transfer is already in progress")]
    TransferAlreadyInProgress,

    /// Transport closed or failed underneath an operation
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Frame that is not a valid protocol message
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session task is gone
    #[error("Session closed")]
    SessionClosed,
}

impl From<serde_json::Error> for TransferError {
    fn from(e: serde_json::Error) -> Self {
        TransferError::MalformedMessage(e.to_string())
    }
}
