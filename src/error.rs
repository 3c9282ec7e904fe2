use thiserror::Error;

/// Main error type for the dispatch bot
#[derive(Error, Debug)]
pub enum PilotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Game API {method} {path} failed: status={status} body={body}")]
    Api {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Transaction errors
    #[error("Departure rejected: {0}")]
    Transaction(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PilotError
pub type Result<T> = std::result::Result<T, PilotError>;
