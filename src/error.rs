use std::path::PathBuf;

use thiserror::Error;

/// Library-level failures. Per-row and per-URL problems are counted where they
/// happen; only these reach a caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("read dataset {path}: {source}")]
    Dataset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse dataset {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("setup: {0}")]
    Setup(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Dataset has no column matching any known url alias.
#[derive(Debug, Clone, Error)]
#[error("no url column found (columns: {columns:?})")]
pub struct SchemaError {
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("empty response")]
    Empty,
    #[error("renderer crashed: {0}")]
    Crashed(String),
    #[error("renderer unavailable: {0}")]
    Unavailable(String),
}
