//! Error types for the Chorus domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Chorus operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Scheduling ---
    #[error("Persona '{0}' is already running a loop")]
    Busy(String),

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Backend reported an error: {0}")]
    Backend(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    /// Displays as the bare message so tool results read `Error: <message>`.
    #[error("{0}")]
    Failed(String),

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}
