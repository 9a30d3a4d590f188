use thiserror::Error;

pub type Result<T> = std::result::Result<T, P2PError>;

#[derive(Error, Debug)]
pub enum P2PError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("No peers available for {0}")]
    NoPeersAvailable(String),

    #[error("Download incomplete: {0}")]
    IncompleteDownload(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Task failed: {0}")]
    TaskFailed(String),
}

impl P2PError {
    /// True for failures caused by the remote side being unreachable or slow,
    /// as opposed to the remote answering "not found".
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            P2PError::ConnectionFailed(_)
                | P2PError::Timeout(_)
                | P2PError::IoError(_)
                | P2PError::NetworkError(_)
        )
    }
}

impl From<std::io::Error> for P2PError {
    fn from(err: std::io::Error) -> Self {
        P2PError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for P2PError {
    fn from(err: serde_json::Error) -> Self {
        P2PError::SerializationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for P2PError {
    fn from(err: tokio::task::JoinError) -> Self {
        P2PError::TaskFailed(err.to_string())
    }
}
