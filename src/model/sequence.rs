//! Sequences, their dataset links and database cross-references.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::mapping::Mapping;

/// Shared handle to a sequence. Dataset sequences are shared by every view
/// sequence that windows onto them.
pub type SeqRef = Rc<RefCell<Sequence>>;

/// Characters treated as alignment gaps.
pub const GAP_CHARS: &[char] = &['-', '.', ' ', '_', '~'];

/// Upper bound on dataset links followed before giving up on a chain.
const MAX_DATASET_DEPTH: usize = 64;

/// Check whether a character is a gap.
pub fn is_gap(c: char) -> bool {
    GAP_CHARS.contains(&c)
}

/// Strip gap characters from a residue string.
pub fn ungap(residues: &str) -> String {
    residues.chars().filter(|c| !is_gap(*c)).collect()
}

/// A database cross-reference, optionally carrying a coordinate mapping onto
/// another sequence.
#[derive(Debug, Clone)]
pub struct DbRef {
    pub source: String,
    pub version: String,
    pub accession: String,
    pub map: Option<Mapping>,
}

impl DbRef {
    pub fn new(source: impl Into<String>, accession: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            version: String::new(),
            accession: accession.into(),
            map: None,
        }
    }
}

/// A 3-D structure associated with a dataset sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdbEntry {
    /// Structure identifier (e.g. a PDB accession).
    pub id: String,
    /// Local coordinate file, if one was attached.
    pub file: Option<String>,
    pub chain: Option<String>,
}

/// A positional feature on a sequence (1-based, inclusive).
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceFeature {
    pub kind: String,
    pub begin: usize,
    pub end: usize,
    pub description: Option<String>,
    pub score: Option<f32>,
}

/// A biological sequence.
///
/// A dataset sequence has `dataset == None` and holds ungapped residues; a
/// view sequence holds gapped residues and refers to exactly one dataset
/// sequence.
#[derive(Clone, Default)]
pub struct Sequence {
    pub name: String,
    chars: Vec<char>,
    /// First residue position (1-based) covered by this sequence.
    pub start: usize,
    /// Last residue position (1-based, inclusive).
    pub end: usize,
    pub description: Option<String>,
    pub dataset: Option<SeqRef>,
    pub db_refs: Vec<DbRef>,
    pub structures: Vec<PdbEntry>,
    pub features: Vec<SequenceFeature>,
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("residues", &self.data())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("has_dataset", &self.dataset.is_some())
            .field("db_refs", &self.db_refs.len())
            .finish()
    }
}

impl Sequence {
    /// Create a sequence covering `start..=end`.
    pub fn new(name: impl Into<String>, data: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            chars: data.into().chars().collect(),
            start,
            end,
            ..Self::default()
        }
    }

    /// Create a sequence starting at position 1 and ending at its ungapped length.
    pub fn from_residues(name: impl Into<String>, data: impl Into<String>) -> Self {
        let data = data.into();
        let residues = ungap(&data).chars().count();
        Self::new(name, data, 1, residues.max(1))
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> SeqRef {
        Rc::new(RefCell::new(self))
    }

    /// Residues (including gaps) as a String.
    pub fn data(&self) -> String {
        self.chars.iter().collect()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    /// Replace the residue string.
    pub fn set_data(&mut self, data: &str) {
        self.chars = data.chars().collect();
    }

    /// Residues with gaps removed.
    pub fn ungapped(&self) -> String {
        self.chars.iter().filter(|c| !is_gap(**c)).collect()
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }

    /// Pad with `gap` up to `width` columns.
    pub fn pad_to(&mut self, width: usize, gap: char) {
        while self.chars.len() < width {
            self.chars.push(gap);
        }
    }

    /// Whether this is a dataset (canonical) sequence.
    pub fn is_dataset(&self) -> bool {
        self.dataset.is_none()
    }
}

/// Follow dataset links to the canonical sequence.
///
/// Returns `None` if the chain is longer than any valid graph could produce,
/// which only happens when the links form a cycle.
pub fn dataset_root(seq: &SeqRef) -> Option<SeqRef> {
    let mut current = Rc::clone(seq);
    for _ in 0..MAX_DATASET_DEPTH {
        let next = current.borrow().dataset.clone();
        match next {
            Some(ds) => current = ds,
            None => return Some(current),
        }
    }
    None
}

/// Create a dataset sequence for `seq` from its ungapped residues and link
/// it, unless one already exists. Returns the dataset sequence.
pub fn derive_dataset(seq: &SeqRef) -> SeqRef {
    if let Some(root) = seq.borrow().dataset.as_ref().and_then(dataset_root) {
        return root;
    }
    let dataset = {
        let s = seq.borrow();
        let mut ds = Sequence::new(s.name.clone(), s.ungapped(), s.start, s.end);
        ds.description = s.description.clone();
        ds.into_ref()
    };
    seq.borrow_mut().dataset = Some(Rc::clone(&dataset));
    dataset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ungap() {
        assert_eq!(ungap("AC--G.U"), "ACGU");
        assert_eq!(Sequence::from_residues("s", "A-C").end, 2);
    }

    #[test]
    fn test_derive_dataset_links_once() {
        let view = Sequence::from_residues("s1", "AC-GU").into_ref();
        let ds = derive_dataset(&view);
        assert_eq!(ds.borrow().data(), "ACGU");
        assert!(ds.borrow().is_dataset());

        let again = derive_dataset(&view);
        assert!(Rc::ptr_eq(&ds, &again));
    }

    #[test]
    fn test_dataset_root_detects_cycle() {
        let a = Sequence::from_residues("a", "AC").into_ref();
        let b = Sequence::from_residues("b", "AC").into_ref();
        a.borrow_mut().dataset = Some(Rc::clone(&b));
        b.borrow_mut().dataset = Some(Rc::clone(&a));
        assert!(dataset_root(&a).is_none());
        // break the cycle so the test does not leak
        b.borrow_mut().dataset = None;
    }
}
