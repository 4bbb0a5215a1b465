//! Alignments: ordered sequence collections, either a dataset or a view.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use strum::{AsRefStr, Display, EnumString};

use super::annotation::{AnnotationRef, GroupRef};
use super::mapping::CodonFrameRef;
use super::sequence::{self, SeqRef};

pub type AlignmentRef = Rc<RefCell<Alignment>>;

/// Molecule type of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum MoleculeType {
    Nucleotide,
    #[default]
    Protein,
}

/// An ordered collection of sequences of equal padded width.
///
/// A view alignment holds view sequences and refers to its dataset alignment;
/// a dataset alignment holds dataset sequences and owns the codon frames.
#[derive(Clone, Default)]
pub struct Alignment {
    pub sequences: Vec<SeqRef>,
    pub dataset: Option<AlignmentRef>,
    pub annotations: Vec<AnnotationRef>,
    pub groups: Vec<GroupRef>,
    pub codon_frames: Vec<CodonFrameRef>,
    pub gap_char: char,
    pub molecule: MoleculeType,
    /// Free-form alignment properties (e.g. Stockholm `#=GF` lines).
    pub properties: IndexMap<String, String>,
}

impl fmt::Debug for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alignment")
            .field("sequences", &self.sequences.len())
            .field("has_dataset", &self.dataset.is_some())
            .field("annotations", &self.annotations.len())
            .field("groups", &self.groups.len())
            .field("codon_frames", &self.codon_frames.len())
            .field("molecule", &self.molecule)
            .finish()
    }
}

impl Alignment {
    pub fn new(molecule: MoleculeType) -> Self {
        Self {
            gap_char: '-',
            molecule,
            ..Self::default()
        }
    }

    pub fn into_ref(self) -> AlignmentRef {
        Rc::new(RefCell::new(self))
    }

    pub fn num_sequences(&self) -> usize {
        self.sequences.len()
    }

    /// Width of the widest sequence.
    pub fn width(&self) -> usize {
        self.sequences
            .iter()
            .map(|s| s.borrow().len())
            .max()
            .unwrap_or(0)
    }

    /// Pad every sequence with gaps to the alignment width.
    pub fn pad_gaps(&mut self) {
        let width = self.width();
        let gap = self.gap_char;
        for seq in &self.sequences {
            seq.borrow_mut().pad_to(width, gap);
        }
    }

    /// Whether this alignment is a dataset alignment.
    pub fn is_dataset(&self) -> bool {
        self.dataset.is_none() && self.sequences.iter().all(|s| s.borrow().is_dataset())
    }

    pub fn find_sequence(&self, name: &str) -> Option<SeqRef> {
        self.sequences
            .iter()
            .find(|s| s.borrow().name == name)
            .cloned()
    }

    pub fn index_of(&self, seq: &SeqRef) -> Option<usize> {
        self.sequences.iter().position(|s| Rc::ptr_eq(s, seq))
    }

    /// Residue at a column, if the row is long enough.
    pub fn get_char(&self, row: usize, col: usize) -> Option<char> {
        self.sequences.get(row)?.borrow().get(col)
    }

    /// Build a dataset alignment from the dataset sequences of `view`,
    /// deriving any that are missing, and link it. Returns the dataset.
    pub fn derive_dataset(view: &AlignmentRef) -> AlignmentRef {
        if let Some(ds) = view.borrow().dataset.clone() {
            return ds;
        }
        let molecule = view.borrow().molecule;
        let mut dataset = Alignment::new(molecule);
        for seq in &view.borrow().sequences {
            let ds = sequence::derive_dataset(seq);
            if !dataset.sequences.iter().any(|s| Rc::ptr_eq(s, &ds)) {
                dataset.sequences.push(ds);
            }
        }
        let dataset = dataset.into_ref();
        view.borrow_mut().dataset = Some(Rc::clone(&dataset));
        dataset
    }
}
