use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] clickhouse::error::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] atlas_core::AtlasError),

    #[error("Engine task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Fetching {date} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        date: NaiveDate,
        attempts: u32,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, HistoryError>;

impl HistoryError {
    /// Failures that may succeed when the same fetch is attempted again
    pub fn is_transient(&self) -> bool {
        matches!(self, HistoryError::Database(_) | HistoryError::Io(_))
    }
}
