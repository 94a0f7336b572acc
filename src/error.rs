//! Error types shared across the harvester

use std::path::PathBuf;

/// Result type for harvester operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Failures reported by the remote platform or the transport underneath it
#[derive(thiserror::Error, Debug)]
pub enum RemoteError {
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("API error code {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Error types for harvester operations
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Media tool error: {0}")]
    Media(String),

    #[error("Classification failed: {0}")]
    Classify(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HarvestError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarvestError::Io {
            path: path.into(),
            source,
        }
    }
}
