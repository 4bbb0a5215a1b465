//! Editing state shared between views.

pub mod history;

pub use history::{History, HistoryRef, Snapshot};
