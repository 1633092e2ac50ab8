//! Error types for Chronicle operations

/// Result type for Chronicle operations
pub type Result<T> = std::result::Result<T, ChronicleError>;

/// Error types for the Chronicle engine
///
/// Capture-path failures never surface through this type to the intercepted
/// caller; they are counted and logged by the pipeline. Replay divergences are
/// reported as data in a [`ReplayReport`](crate::replay::ReplayReport).
#[derive(Debug, thiserror::Error)]
pub enum ChronicleError {
    /// Configuration rejected at load or reconfiguration time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record not found in storage
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ChronicleError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ChronicleError::Configuration(message.into())
    }

    /// Shorthand for a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        ChronicleError::Storage(message.into())
    }
}

impl From<String> for ChronicleError {
    fn from(s: String) -> Self {
        ChronicleError::Other(s)
    }
}

impl From<&str> for ChronicleError {
    fn from(s: &str) -> Self {
        ChronicleError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ChronicleError {
    fn from(err: anyhow::Error) -> Self {
        ChronicleError::Other(err.to_string())
    }
}

impl From<figment::Error> for ChronicleError {
    fn from(err: figment::Error) -> Self {
        ChronicleError::Configuration(format!("Failed to load configuration: {}", err))
    }
}
