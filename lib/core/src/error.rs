use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown category '{value}' for space '{space}'")]
    UnknownCategory { space: String, value: String },

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Translation failed: {0}")]
    TranslationFailed(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Query not found: {0}")]
    QueryNotFound(String),

    #[error("Invalid vector dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Errors caused by the caller's input, rejected before any work is done
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownCategory { .. }
                | Error::InvalidFilter(_)
                | Error::SchemaMismatch(_)
                | Error::InvalidParameter(_)
                | Error::InvalidRecord(_)
        )
    }

    /// Failures of a hosted collaborator (embedding provider or translator)
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Error::EmbeddingUnavailable(_) | Error::TranslationFailed(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
