//! Data Logging
//!
//! Writes acquired rows to disk: incrementally while a run is in progress,
//! or as a whole-buffer snapshot afterwards.

mod format;
mod recorder;

pub use format::{write_snapshot, LogFormat, LogHeader};
pub use recorder::DataLogger;

use std::path::PathBuf;
use thiserror::Error;

/// Errors from writing data files
#[derive(Error, Debug)]
pub enum DataLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported data file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("Sample buffer was reset by a new run ({written} rows logged, {available} available)")]
    BufferReset { written: usize, available: usize },

    #[error("Log has {expected} data columns but the buffer has {found}")]
    ColumnMismatch { expected: usize, found: usize },
}
