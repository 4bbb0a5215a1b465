//! Reconciles dataset sequences seen from several entries into one
//! canonical sequence per ID.

use std::rc::Rc;

use indexmap::IndexMap;
use log::{debug, info};

use super::registry::{Entity, IdentityRegistry};
use super::report::{Report, Warning};
use crate::model::sequence::ungap;
use crate::model::{Alignment, AlignmentRef, MoleculeType, SeqRef, Sequence};

/// What happened to a dataset sequence on `ensure_dataset_sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    /// Incoming content was already covered by the stored residues.
    Unchanged,
    /// Incoming content was a strict superstring and replaced the residues.
    Extended,
    /// Incoming content disagreed; the stored residues were kept.
    Conflict,
}

/// Whether an archive ID is usable.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && !id.chars().any(char::is_whitespace)
}

/// A version of a dataset sequence as seen by one entry.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub name: &'a str,
    /// Residues, gapped or not.
    pub residues: &'a str,
    pub start: usize,
    pub end: usize,
}

impl<'a> Candidate<'a> {
    pub fn new(name: &'a str, residues: &'a str, start: usize, end: usize) -> Self {
        Self {
            name,
            residues,
            start,
            end,
        }
    }
}

/// Dataset sequence and alignment bookkeeping for one load.
#[derive(Debug, Default)]
pub struct DatasetMerger {
    datasets: IndexMap<String, AlignmentRef>,
}

impl DatasetMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve or create the dataset sequence bound to `declared_id`, merging
    /// `candidate` into it.
    ///
    /// Returns `None` only when the ID is bound to something other than a
    /// sequence; the collision is reported.
    pub fn ensure_dataset_sequence(
        &mut self,
        registry: &mut IdentityRegistry,
        report: &mut Report,
        declared_id: &str,
        candidate: Candidate<'_>,
    ) -> Option<(SeqRef, MergeOutcome)> {
        let Candidate {
            name,
            residues,
            start,
            end,
        } = candidate;
        let incoming = ungap(residues);
        let Some(entity) = registry.entity_for(declared_id).cloned() else {
            let seq = Sequence::new(name, incoming, start, end).into_ref();
            // The ID is known to be free, so this cannot collide.
            let _ = registry.register(declared_id, Entity::Sequence(Rc::clone(&seq)));
            debug!("created dataset sequence {declared_id}");
            return Some((seq, MergeOutcome::Created));
        };
        let Some(seq) = entity.as_sequence() else {
            report.push(Warning::IdentityCollision {
                id: declared_id.to_string(),
            });
            return None;
        };

        let existing = seq.borrow().ungapped();
        let outcome = if existing.contains(&incoming) {
            MergeOutcome::Unchanged
        } else if incoming.len() > existing.len() && incoming.contains(&existing) {
            info!(
                "extended dataset sequence {declared_id} from {} to {} residues",
                existing.len(),
                incoming.len()
            );
            let mut s = seq.borrow_mut();
            s.set_data(&incoming);
            s.start = start;
            s.end = end;
            MergeOutcome::Extended
        } else {
            report.push(Warning::MergeConflict {
                id: declared_id.to_string(),
                existing: existing.len(),
                incoming: incoming.len(),
            });
            MergeOutcome::Conflict
        };
        Some((seq, outcome))
    }

    /// The dataset alignment bound to `dataset_id`, created and registered on
    /// first use.
    pub fn dataset_alignment(
        &mut self,
        registry: &mut IdentityRegistry,
        report: &mut Report,
        dataset_id: &str,
        molecule: MoleculeType,
    ) -> AlignmentRef {
        if let Some(ds) = self.datasets.get(dataset_id) {
            return Rc::clone(ds);
        }
        if let Some(ds) = registry.alignment(dataset_id) {
            self.datasets.insert(dataset_id.to_string(), Rc::clone(&ds));
            return ds;
        }
        let ds = Alignment::new(molecule).into_ref();
        if let Err(warning) = registry.register(dataset_id, Entity::Alignment(Rc::clone(&ds))) {
            report.push(warning);
        }
        self.datasets.insert(dataset_id.to_string(), Rc::clone(&ds));
        ds
    }

    /// Place `seq` in its dataset alignment.
    ///
    /// A new member is appended (first-encountered order). An explicit
    /// `index` moves the member there, so a later entry's position wins.
    pub fn place(&mut self, dataset: &AlignmentRef, seq: &SeqRef, index: Option<usize>) {
        let mut ds = dataset.borrow_mut();
        let current = ds.index_of(seq);
        match (current, index) {
            (None, None) => ds.sequences.push(Rc::clone(seq)),
            (None, Some(i)) => {
                let i = i.min(ds.sequences.len());
                ds.sequences.insert(i, Rc::clone(seq));
            }
            (Some(from), Some(to)) if from != to => {
                let moved = ds.sequences.remove(from);
                let to = to.min(ds.sequences.len());
                ds.sequences.insert(to, moved);
            }
            _ => {}
        }
    }

    pub fn datasets(&self) -> impl Iterator<Item = (&str, &AlignmentRef)> {
        self.datasets.iter().map(|(id, ds)| (id.as_str(), ds))
    }
}
