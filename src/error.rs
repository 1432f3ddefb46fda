// Centralized error types for the engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Schema error: {0}")]
    SchemaParse(String),
    #[error("Data source error: {0}")]
    DataSource(String),
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Errors caused by the caller's input rather than by the engine or its data.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidQuery(_) | Self::InvalidTimestamp(_))
    }
}

// Helper conversions
impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
