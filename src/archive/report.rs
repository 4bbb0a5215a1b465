//! Non-fatal problems accumulated during a load or save.

use log::warn;
use serde::Serialize;
use thiserror::Error;

/// A recoverable problem. The affected entity is skipped or left partially
/// linked; everything else continues.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("{count} reference(s) to '{id}' could not be resolved")]
    UnresolvedReference { id: String, count: usize },
    #[error("ID '{id}' was already bound to a different entity; keeping the first binding")]
    IdentityCollision { id: String },
    #[error(
        "dataset sequence '{id}' has conflicting versions ({existing} vs {incoming} residues); keeping the existing one"
    )]
    MergeConflict {
        id: String,
        existing: usize,
        incoming: usize,
    },
    #[error("skipped malformed entity in '{entry}': {detail}")]
    MalformedEntity { entry: String, detail: String },
    #[error("archive entry '{name}' is missing")]
    MissingEntry { name: String },
    #[error("view '{view}' names complement '{complement}' which was not found; opened standalone")]
    SplitPairing { view: String, complement: String },
}

/// Warnings from one operation, surfaced once at the end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub warnings: Vec<Warning>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a warning and log it.
    pub fn push(&mut self, warning: Warning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn malformed(&mut self, entry: &str, detail: impl Into<String>) {
        self.push(Warning::MalformedEntity {
            entry: entry.to_string(),
            detail: detail.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn extend(&mut self, other: Report) {
        self.warnings.extend(other.warnings);
    }

    /// Remove a load's binding suffix from the IDs warnings name, so they
    /// read as written in the archive.
    pub fn strip_id_suffix(&mut self, suffix: &str) {
        if suffix.is_empty() {
            return;
        }
        for warning in &mut self.warnings {
            if let Warning::UnresolvedReference { id, .. }
            | Warning::IdentityCollision { id }
            | Warning::MergeConflict { id, .. } = warning
                && let Some(plain) = id.strip_suffix(suffix)
            {
                *id = plain.to_string();
            }
        }
    }

    /// IDs named by unresolved-reference warnings.
    pub fn unresolved_ids(&self) -> Vec<&str> {
        self.warnings
            .iter()
            .filter_map(|w| match w {
                Warning::UnresolvedReference { id, .. } => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether any warning may mean data was lost.
    pub fn has_data_loss(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, Warning::MergeConflict { .. } | Warning::MalformedEntity { .. }))
    }

    /// One line per warning, for display to the user.
    pub fn summary(&self) -> String {
        self.warnings
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_suffix_stripped_from_warnings() {
        let mut report = Report::new();
        report.push(Warning::UnresolvedReference {
            id: "sqX_a1".to_string(),
            count: 1,
        });
        report.push(Warning::IdentityCollision {
            id: "V1".to_string(),
        });
        report.malformed("v_a1.xml", "bad");
        report.strip_id_suffix("_a1");
        assert_eq!(report.unresolved_ids(), vec!["sqX"]);
        assert_eq!(
            report.warnings[1],
            Warning::IdentityCollision {
                id: "V1".to_string()
            }
        );
        assert!(matches!(
            &report.warnings[2],
            Warning::MalformedEntity { entry, .. } if entry == "v_a1.xml"
        ));
    }

    #[test]
    fn test_report_summary() {
        let mut report = Report::new();
        report.push(Warning::UnresolvedReference {
            id: "sqX".to_string(),
            count: 2,
        });
        report.malformed("view.xml", "bad range");
        assert_eq!(report.len(), 2);
        assert_eq!(report.unresolved_ids(), vec!["sqX"]);
        assert!(report.has_data_loss());
        assert!(report.summary().contains("'sqX'"));
    }
}
