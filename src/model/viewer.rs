//! External viewer bindings (structure, tree and RNA viewers).

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use strum::{AsRefStr, Display, EnumString};

use super::sequence::SeqRef;

pub type ViewerRef = Rc<RefCell<ViewerBinding>>;

/// The closed set of external viewer kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum ViewerKind {
    Structure,
    Tree,
    Rna,
}

/// Kind-specific viewer state. Payloads are owned by the viewer and are
/// not interpreted here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerState {
    /// Structure viewer session blob.
    Structure { session: Vec<u8> },
    /// Tree in Newick form.
    Tree { newick: String },
    /// One state blob per RNA sub-view, in display order.
    Rna { models: Vec<Vec<u8>> },
}

impl ViewerState {
    pub fn kind(&self) -> ViewerKind {
        match self {
            ViewerState::Structure { .. } => ViewerKind::Structure,
            ViewerState::Tree { .. } => ViewerKind::Tree,
            ViewerState::Rna { .. } => ViewerKind::Rna,
        }
    }
}

/// Association of one sequence with a model shown in a viewer.
#[derive(Clone)]
pub struct SeqBinding {
    pub sequence: SeqRef,
    /// Structure or model identifier within the viewer.
    pub model: Option<String>,
    pub chain: Option<String>,
}

impl fmt::Debug for SeqBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeqBinding")
            .field("sequence", &self.sequence.borrow().name)
            .field("model", &self.model)
            .field("chain", &self.chain)
            .finish()
    }
}

impl SeqBinding {
    /// Whether two bindings describe the same sequence/model/chain triple.
    pub fn same_as(&self, other: &SeqBinding) -> bool {
        Rc::ptr_eq(&self.sequence, &other.sequence)
            && self.model == other.model
            && self.chain == other.chain
    }
}

/// A view's reference to a viewer instance.
#[derive(Debug, Clone)]
pub struct ViewerLink {
    pub viewer_id: String,
    pub kind: ViewerKind,
    pub title: Option<String>,
    pub bindings: Vec<SeqBinding>,
    /// Inline state carried with the link (tree viewers keep their Newick
    /// string with the view rather than in a separate entry).
    pub inline_state: Option<String>,
}

/// A live viewer instance, shared by every view that displays it.
#[derive(Debug, Clone)]
pub struct ViewerBinding {
    pub id: String,
    pub title: Option<String>,
    pub state: ViewerState,
    pub bindings: Vec<SeqBinding>,
    /// IDs of the views attached to this viewer.
    pub views: Vec<String>,
}

impl ViewerBinding {
    pub fn new(id: impl Into<String>, state: ViewerState) -> Self {
        Self {
            id: id.into(),
            title: None,
            state,
            bindings: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn into_ref(self) -> ViewerRef {
        Rc::new(RefCell::new(self))
    }

    pub fn kind(&self) -> ViewerKind {
        self.state.kind()
    }

    pub fn is_attached(&self, view_id: &str) -> bool {
        self.views.iter().any(|v| v == view_id)
    }

    /// Attach a view. Returns false if it was already attached.
    pub fn attach(&mut self, view_id: &str) -> bool {
        if self.is_attached(view_id) {
            return false;
        }
        self.views.push(view_id.to_string());
        true
    }

    /// Merge in sequence bindings not already present. Returns how many were added.
    pub fn merge_bindings(&mut self, bindings: &[SeqBinding]) -> usize {
        let mut added = 0;
        for binding in bindings {
            if !self.bindings.iter().any(|b| b.same_as(binding)) {
                self.bindings.push(binding.clone());
                added += 1;
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sequence;

    #[test]
    fn test_attach_and_merge_are_idempotent() {
        let seq = Sequence::from_residues("1abc_A", "MKL").into_ref();
        let binding = SeqBinding {
            sequence: Rc::clone(&seq),
            model: Some("1abc".to_string()),
            chain: Some("A".to_string()),
        };
        let mut viewer = ViewerBinding::new(
            "v1",
            ViewerState::Structure {
                session: b"load 1abc".to_vec(),
            },
        );
        assert!(viewer.attach("view1"));
        assert!(!viewer.attach("view1"));
        assert_eq!(viewer.merge_bindings(std::slice::from_ref(&binding)), 1);
        assert_eq!(viewer.merge_bindings(&[binding]), 0);
        assert_eq!(viewer.kind(), ViewerKind::Structure);
    }
}
