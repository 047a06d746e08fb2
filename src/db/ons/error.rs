use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Fatal errors for one period of the ingestion job.  Best-effort steps
/// (stage listing, cleanup) log their failures instead of returning one.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Download of {url} failed with status {status}")]
    DownloadStatus { url: String, status: StatusCode },

    #[error("Download of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("File not found: {0}")]
    MissingFile(PathBuf),

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("File {0} is not valid UTF-8")]
    Decode(PathBuf),

    #[error("Error reading CSV {path}: {source}")]
    CsvRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Error writing cleaned CSV {path}: {source}")]
    CsvWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Failed to open warehouse {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Failed to create table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Bulk load into {table} failed: {source}")]
    Load {
        table: String,
        #[source]
        source: duckdb::Error,
    },
}

impl IngestError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.into(),
            source,
        }
    }
}
