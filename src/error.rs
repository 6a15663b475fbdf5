use thiserror::Error;

use crate::datasets::ColumnCount;

/// Per-page failure. The aggregator drops the page and carries on.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("{url} did not answer within {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("no table found at {url}")]
    NoTableFound { url: String },
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Request { source, .. } => source.is_connect(),
            FetchError::Timeout { .. } => true,
            FetchError::NoTableFound { .. } => false,
        }
    }
}

/// Per-dataset failure raised before any row is produced.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("{dataset}: expected {expected} columns, source has {actual}")]
    SchemaMismatch {
        dataset: String,
        expected: ColumnCount,
        actual: usize,
    },
}

/// Store-level failure while appending. Batches committed before the
/// failing one stay in the relation.
#[derive(Debug, Error)]
#[error("load into {relation} failed after {inserted} rows: {source}")]
pub struct LoadError {
    pub relation: String,
    pub inserted: usize,
    #[source]
    pub source: rusqlite::Error,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed CSV in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("{path} has no header row")]
    EmptyHeader { path: String },

    #[error("invalid identifier {0:?}")]
    Identifier(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Load(#[from] LoadError),
}
