//! Core error types for hetseq

/// Result type alias for hetseq
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Raised while building a model; blocks construction.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A caller broke the forward-pass contract (e.g. labels without a mask).
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// The composed loss is NaN after the entity-term guard ran.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tensor error: {0}")]
    Tensor(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
