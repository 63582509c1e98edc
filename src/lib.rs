pub type Result<T> = std::result::Result<T, PipelineError>;

// `Display`/`Error`/`From` are hand-written: thiserror's derive would treat
// the `source` field of `ExtractionFailed` (a document name, not a cause) as
// the error source and require it to implement `std::error::Error`.
#[derive(Debug)]
pub enum PipelineError {
    Config(String),

    ExtractionFailed { source: String, reason: String },

    RateLimited { service: String, attempts: u32 },

    Unavailable { service: String, reason: String },

    DimensionMismatch { expected: usize, actual: usize },

    StoreUnconfigured(String),

    Store(String),

    Database(String),

    Embedding(String),

    Completion(String),

    Blob(String),

    Cancelled(String),

    Io(std::io::Error),

    Other(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::ExtractionFailed { source, reason } => {
                write!(f, "Extraction failed for '{source}': {reason}")
            }
            Self::RateLimited { service, attempts } => {
                write!(f, "{service} rate limited, gave up after {attempts} attempts")
            }
            Self::Unavailable { service, reason } => {
                write!(f, "{service} unavailable: {reason}")
            }
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "Vector dimension mismatch: expected {expected}, got {actual}")
            }
            Self::StoreUnconfigured(msg) => write!(f, "Vector store not configured: {msg}"),
            Self::Store(msg) => write!(f, "Vector store error: {msg}"),
            Self::Database(msg) => write!(f, "Database error: {msg}"),
            Self::Embedding(msg) => write!(f, "Embedding error: {msg}"),
            Self::Completion(msg) => write!(f, "Completion error: {msg}"),
            Self::Blob(msg) => write!(f, "Blob store error: {msg}"),
            Self::Cancelled(msg) => write!(f, "Run cancelled: {msg}"),
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::Other(err) => write!(f, "Other error: {err}"),
        }
    }
}

impl std::error::Error for PipelineError {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    #[inline]
    fn from(err: std::io::Error) -> Self {
        PipelineError::Io(err)
    }
}

impl From<anyhow::Error> for PipelineError {
    #[inline]
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err)
    }
}

impl From<crate::config::ConfigError> for PipelineError {
    #[inline]
    fn from(err: crate::config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<crate::extract::ExtractError> for PipelineError {
    #[inline]
    fn from(err: crate::extract::ExtractError) -> Self {
        PipelineError::ExtractionFailed {
            source: err.source_name().to_string(),
            reason: err.reason(),
        }
    }
}

pub mod blob;
pub mod chunker;
pub mod commands;
pub mod completion;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod extract;
pub mod pipeline;
pub mod retriever;
pub mod retry;
pub mod store;
