//! Typed errors for each pipeline stage and the storage commands.

use thiserror::Error;

/// The schedule source could not be retrieved.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// The fetched page is not something a table can be located in.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("page body is empty")]
    EmptyPage,

    #[error("page body contains no markup")]
    NotMarkup,

    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: &'static str, reason: String },

    #[error("failed to read cached page {path}: {source}")]
    Cache {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The document store is unreachable or rejected an operation.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to open store `{uri}`: {source}")]
    Open {
        uri: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("invalid collection name `{0}`")]
    InvalidCollection(String),

    #[error("store operation on `{collection}` failed: {source}")]
    Sql {
        collection: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("document in `{collection}` is not valid JSON: {source}")]
    Document {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Externally supplied input failed a format check before processing.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unsupported file `{0}`: only .csv files are accepted")]
    Extension(String),

    #[error("cannot read `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{0}` has no header row")]
    MissingHeader(String),

    #[error("`{path}` repeats column `{column}`")]
    DuplicateColumn { path: String, column: String },

    #[error("`{path}` is not a well-formed table: {source}")]
    Malformed {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Settings could not be assembled from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

/// Failure of a bulk CSV import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
