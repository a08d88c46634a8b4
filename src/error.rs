// src/error.rs
// Error types shared by the runner, router, topic store and broadcaster

use thiserror::Error;

/// Main error type for the relaybase library
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    #[error("container runtime error: {0}")]
    Runtime(String),

    #[error("image build failed: {0}")]
    Build(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("schedule error: {0}")]
    Schedule(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid id: {0}")]
    InvalidId(#[from] uuid::Error),

    #[error("task cancelled")]
    Cancelled,

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Text stored in a run log when an invocation fails
    pub fn run_log_text(&self) -> String {
        format!("error {}", self)
    }
}

impl From<bollard::errors::Error> for RelayError {
    fn from(err: bollard::errors::Error) -> Self {
        RelayError::Runtime(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            RelayError::Cancelled
        } else {
            RelayError::Runtime(err.to_string())
        }
    }
}
