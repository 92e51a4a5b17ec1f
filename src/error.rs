//! Error types for the file and CLI edges.
//!
//! The tracker itself never fails; everything here comes from reading a
//! config file or a session trace.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SuggesterError {
    #[error("Failed to read trace: {0}")]
    TraceRead(#[from] io::Error),

    #[error("Failed to parse trace line {line}: {source}")]
    TraceParse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Failed to read config from {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(String),

    #[error("Config not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to start runtime: {0}")]
    Runtime(io::Error),
}
