//! Undo/redo history shared by every view of one sequence set.

use std::cell::RefCell;
use std::rc::Rc;

use crate::model::Alignment;

/// Shared handle to a history. Views with the same sequence-set ID hold
/// the same handle, so an edit in one view is an undo target in the others.
pub type HistoryRef = Rc<RefCell<History>>;

/// Default maximum number of undo steps.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// A snapshot of the residues of an alignment, row by row.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Short description of the edit that followed this snapshot.
    pub label: String,
    pub rows: Vec<String>,
}

impl Snapshot {
    pub fn capture(alignment: &Alignment, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            rows: alignment.sequences.iter().map(|s| s.borrow().data()).collect(),
        }
    }

    /// Write the snapshot back into `alignment`. Rows beyond the shorter of
    /// the two are left untouched.
    pub fn restore(&self, alignment: &Alignment) {
        for (seq, row) in alignment.sequences.iter().zip(&self.rows) {
            seq.borrow_mut().set_data(row);
        }
    }
}

/// Undo/redo history manager.
#[derive(Debug)]
pub struct History {
    undo_stack: Vec<Snapshot>,
    redo_stack: Vec<Snapshot>,
    max_size: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_max_size(DEFAULT_HISTORY_LIMIT)
    }
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_size,
        }
    }

    pub fn into_ref(self) -> HistoryRef {
        Rc::new(RefCell::new(self))
    }

    /// Record the state before an edit.
    pub fn save(&mut self, alignment: &Alignment, label: impl Into<String>) {
        self.redo_stack.clear();
        self.undo_stack.push(Snapshot::capture(alignment, label));
        while self.undo_stack.len() > self.max_size {
            self.undo_stack.remove(0);
        }
    }

    /// Undo the last edit on `alignment`. Returns the label of the undone edit.
    pub fn undo(&mut self, alignment: &Alignment) -> Option<String> {
        let snapshot = self.undo_stack.pop()?;
        self.redo_stack
            .push(Snapshot::capture(alignment, snapshot.label.clone()));
        snapshot.restore(alignment);
        Some(snapshot.label)
    }

    /// Redo the last undone edit on `alignment`.
    pub fn redo(&mut self, alignment: &Alignment) -> Option<String> {
        let snapshot = self.redo_stack.pop()?;
        self.undo_stack
            .push(Snapshot::capture(alignment, snapshot.label.clone()));
        snapshot.restore(alignment);
        Some(snapshot.label)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Labels of the undo stack, oldest first.
    pub fn undo_labels(&self) -> impl Iterator<Item = &str> {
        self.undo_stack.iter().map(|s| s.label.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MoleculeType, Sequence};

    fn make_alignment(data: &str) -> Alignment {
        let mut alignment = Alignment::new(MoleculeType::Nucleotide);
        alignment
            .sequences
            .push(Sequence::from_residues("seq1", data).into_ref());
        alignment
    }

    fn set(alignment: &Alignment, data: &str) {
        alignment.sequences[0].borrow_mut().set_data(data);
    }

    #[test]
    fn test_undo_redo() {
        let mut history = History::new();
        let alignment = make_alignment("ACGU");

        history.save(&alignment, "insert gap");
        set(&alignment, "ACGU-");
        history.save(&alignment, "insert gap");
        set(&alignment, "ACGU--");

        assert_eq!(history.undo(&alignment).as_deref(), Some("insert gap"));
        assert_eq!(alignment.sequences[0].borrow().data(), "ACGU-");
        history.undo(&alignment);
        assert_eq!(alignment.sequences[0].borrow().data(), "ACGU");

        history.redo(&alignment);
        assert_eq!(alignment.sequences[0].borrow().data(), "ACGU-");
    }

    #[test]
    fn test_redo_cleared_on_new_change() {
        let mut history = History::new();
        let alignment = make_alignment("ACGU");

        history.save(&alignment, "edit");
        set(&alignment, "ACGU.");
        history.undo(&alignment);
        assert!(history.can_redo());

        history.save(&alignment, "edit");
        assert!(!history.can_redo());
    }

    #[test]
    fn test_max_size_trims_oldest() {
        let mut history = History::with_max_size(2);
        let alignment = make_alignment("A");
        for label in ["one", "two", "three"] {
            history.save(&alignment, label);
        }
        assert_eq!(history.undo_labels().collect::<Vec<_>>(), vec!["two", "three"]);
    }
}
