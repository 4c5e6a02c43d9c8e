use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt stored value for {key}: {message}")]
    Corrupt { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("collector unreachable: {0}")]
    Transport(String),

    #[error("collector rejected event: HTTP {0}")]
    Status(u16),

    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("no async runtime available for delivery")]
    NoRuntime,
}
