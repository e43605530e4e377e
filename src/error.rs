//! Error types for the knowledge graph server
//!
//! Structured error definitions use thiserror; anyhow errors from the edges
//! (CLI, import files) are folded into [`KgError::Other`].

use thiserror::Error;

/// Main error type for knowledge graph operations
#[derive(Error, Debug)]
pub enum KgError {
    /// Store unreachable or the session was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query or statement failed inside the store
    #[error("Database error: {0}")]
    Database(String),

    /// A store call did not complete within the configured bound
    #[error("Store operation '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    /// Entity referenced by name does not exist
    #[error("Entity with name {0} not found")]
    EntityNotFound(String),

    /// Tool name not present in the registry
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool arguments failed schema validation
    #[error("Invalid arguments for tool '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    /// Malformed protocol message
    #[error("MCP protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl KgError {
    /// Whether retrying the same call may succeed (store still starting up)
    pub fn is_retryable(&self) -> bool {
        matches!(self, KgError::Connection(_))
    }
}

/// Result type alias for knowledge graph operations
pub type Result<T> = std::result::Result<T, KgError>;

/// Convert anyhow::Error to KgError
impl From<anyhow::Error> for KgError {
    fn from(err: anyhow::Error) -> Self {
        KgError::Other(err.to_string())
    }
}

impl From<libsql::Error> for KgError {
    fn from(err: libsql::Error) -> Self {
        KgError::Database(err.to_string())
    }
}
