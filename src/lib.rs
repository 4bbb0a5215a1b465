//! Project archive engine for multi-view alignment workbenches.
//!
//! A workspace of alignment views, their shared datasets, annotations,
//! groups and external viewer bindings is saved into one archive and
//! rebuilt from it with shared entities restored exactly once.

pub mod archive;
pub mod config;
pub mod editor;
pub mod error;
pub mod model;
pub mod stockholm;
