use std::path::PathBuf;
use thiserror::Error;

/// Error taxonomy for index construction and search.
///
/// Every variant stems from caller-supplied configuration or data, so
/// nothing here is retried internally; errors are surfaced as-is.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("shard {shard} has {found} columns after offset, expected {expected}")]
    ShapeMismatch {
        shard: PathBuf,
        expected: usize,
        found: usize,
    },

    #[error("unsupported device: {requested}")]
    UnsupportedDevice { requested: String },

    #[error("query dimension {found} does not match index vocabulary {expected}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("record index {index} out of range ({len} records loaded)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("malformed record at line {line}: {source}")]
    MalformedRecord {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to decode shard {shard}: {source}")]
    Decode {
        shard: PathBuf,
        #[source]
        source: bincode::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
