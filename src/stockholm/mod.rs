//! Stockholm alignment import and export.

pub mod parser;
pub mod writer;

use std::path::Path;

use thiserror::Error;

use crate::archive::registry::session_salt;
use crate::model::{View, ViewRef};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Invalid Stockholm header")]
    InvalidHeader,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unexpected end of file")]
    UnexpectedEof,
    #[error("Invalid line format: {0}")]
    InvalidLine(String),
    #[error("Inconsistent sequence lengths")]
    InconsistentLengths,
}

/// Label of the row holding `#=GC SS_cons`.
pub const SS_CONS_LABEL: &str = "Secondary Structure";

/// Read a Stockholm file into a new view of its own sequence set. The
/// title is the file stem.
pub fn import_view(path: &Path) -> Result<ViewRef, ParseError> {
    let alignment = parser::parse_file(path)?;
    let title = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "alignment".to_string());
    let salt = session_salt();
    let view = View::new(
        format!("vw1{salt}"),
        format!("ss1{salt}"),
        title,
        alignment.into_ref(),
    );
    Ok(view.into_ref())
}
