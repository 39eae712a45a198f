use thiserror::Error;

/// Crate-wide error type.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read ROM file: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing argument: {0}")]
    MissingArgument(String),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
