//! Errors that abort a whole load or save.

use thiserror::Error;

use crate::stockholm::ParseError;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error in entry '{entry}': {message}")]
    Xml { entry: String, message: String },
    #[error("out of memory while reading entry '{entry}' ({size} bytes)")]
    OutOfMemory { entry: String, size: u64 },
    #[error("operation cancelled")]
    Cancelled,
    #[error("archive contains no alignment views")]
    NoViews,
    #[error("view index {0} out of range")]
    NoSuchView(usize),
    #[error("Stockholm import failed: {0}")]
    Import(#[from] ParseError),
}

impl ArchiveError {
    pub fn xml(entry: impl Into<String>, err: impl std::fmt::Display) -> Self {
        ArchiveError::Xml {
            entry: entry.into(),
            message: err.to_string(),
        }
    }

    /// Whether this error is the out-of-memory condition, which callers
    /// report differently from parse and logic failures.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, ArchiveError::OutOfMemory { .. })
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
