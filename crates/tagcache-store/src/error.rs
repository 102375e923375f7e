use thiserror::Error;

/// Failures a [`Store`](crate::traits::Store) backend can report.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("RESP protocol error: {0}")]
    Protocol(String),

    #[error("failed to (de)serialize cache entry: {0}")]
    Codec(#[from] serde_json::Error),

    /// The backend answered, but not with what the command expects.
    #[error("unexpected store reply: {0}")]
    Reply(String),
}
