//! The set of open views, the windows that hold them, and live viewers.

use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use super::alignment::Alignment;
use super::annotation::{GroupRef, SequenceGroup};
use super::sequence::{SeqRef, Sequence};
use super::view::{View, ViewRef};
use super::viewer::{SeqBinding, ViewerLink, ViewerRef};

/// A window holding one or more views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Container {
    Standalone { view: String },
    /// Views of one sequence set gathered into tabs.
    Tabbed {
        sequence_set_id: String,
        views: Vec<String>,
    },
    /// A nucleotide view and its protein complement shown together.
    Split { nucleotide: String, protein: String },
}

impl Container {
    pub fn view_ids(&self) -> Vec<&str> {
        match self {
            Container::Standalone { view } => vec![view.as_str()],
            Container::Tabbed { views, .. } => views.iter().map(String::as_str).collect(),
            Container::Split {
                nucleotide,
                protein,
            } => vec![nucleotide.as_str(), protein.as_str()],
        }
    }

    pub fn holds(&self, view_id: &str) -> bool {
        self.view_ids().contains(&view_id)
    }
}

/// All open views and the state shared between them.
#[derive(Debug, Default)]
pub struct Workspace {
    pub views: Vec<ViewRef>,
    pub containers: Vec<Container>,
    pub viewers: IndexMap<String, ViewerRef>,
    /// Files copied into an archive, keyed by entry name, when they were not
    /// extracted to disk.
    pub external_files: IndexMap<String, Vec<u8>>,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_view(&mut self, view: ViewRef) {
        self.views.push(view);
    }

    pub fn view(&self, id: &str) -> Option<ViewRef> {
        self.views.iter().find(|v| v.borrow().id == id).cloned()
    }

    /// Views sharing a sequence-set ID, in workspace order.
    pub fn views_in_set(&self, sequence_set_id: &str) -> Vec<ViewRef> {
        self.views
            .iter()
            .filter(|v| v.borrow().sequence_set_id == sequence_set_id)
            .cloned()
            .collect()
    }

    pub fn container_of(&self, view_id: &str) -> Option<&Container> {
        self.containers.iter().find(|c| c.holds(view_id))
    }

    /// Views paired with `view_id` in a split container.
    pub fn split_partner(&self, view_id: &str) -> Option<String> {
        self.containers.iter().find_map(|c| match c {
            Container::Split {
                nucleotide,
                protein,
            } if nucleotide == view_id => Some(protein.clone()),
            Container::Split {
                nucleotide,
                protein,
            } if protein == view_id => Some(nucleotide.clone()),
            _ => None,
        })
    }

    pub fn viewer(&self, id: &str) -> Option<ViewerRef> {
        self.viewers.get(id).cloned()
    }

    /// Close a view: remove it from its container and detach it from viewers.
    /// Returns the ID of a split partner the caller may offer to close too.
    pub fn close_view(&mut self, view_id: &str) -> Option<String> {
        let partner = self.split_partner(view_id);
        self.views.retain(|v| v.borrow().id != view_id);
        let mut kept = Vec::with_capacity(self.containers.len());
        for container in self.containers.drain(..) {
            match container {
                Container::Standalone { ref view } if view == view_id => {}
                Container::Tabbed {
                    sequence_set_id,
                    mut views,
                } => {
                    views.retain(|v| v != view_id);
                    match views.len() {
                        0 => {}
                        1 => kept.push(Container::Standalone {
                            view: views.remove(0),
                        }),
                        _ => kept.push(Container::Tabbed {
                            sequence_set_id,
                            views,
                        }),
                    }
                }
                Container::Split {
                    nucleotide,
                    protein,
                } if nucleotide == view_id || protein == view_id => {
                    let other = if nucleotide == view_id { protein } else { nucleotide };
                    kept.push(Container::Standalone { view: other });
                }
                other => kept.push(other),
            }
        }
        self.containers = kept;
        if let Some(id) = &partner
            && let Some(view) = self.view(id)
        {
            view.borrow_mut().split_partner = None;
        }
        for viewer in self.viewers.values() {
            viewer.borrow_mut().views.retain(|v| v != view_id);
        }
        self.viewers.retain(|_, v| !v.borrow().views.is_empty());
        partner
    }

    /// Create a new view of the same alignment data as `source`.
    ///
    /// The copy has its own view sequences windowing onto the same dataset
    /// sequences and its own groups. Annotation rows are shared, except rows
    /// bound to a group or a view sequence: those are copied and rebound to
    /// the copy's own. The undo history is shared, and the source's viewer
    /// links are carried so the linker can attach the copy to the same
    /// viewers. It is not placed in a container.
    pub fn duplicate_view(&mut self, source: &ViewRef, new_id: impl Into<String>) -> ViewRef {
        let src = source.borrow();
        let src_alignment = src.alignment.borrow();

        let mut copies: Vec<(SeqRef, SeqRef)> = Vec::new();
        let mut alignment = Alignment::new(src_alignment.molecule);
        alignment.gap_char = src_alignment.gap_char;
        alignment.dataset = src_alignment.dataset.clone();
        alignment.properties = src_alignment.properties.clone();
        alignment.codon_frames = src_alignment.codon_frames.clone();
        for seq in &src_alignment.sequences {
            let copy = {
                let s = seq.borrow();
                let mut c = Sequence::new(s.name.clone(), s.data(), s.start, s.end);
                c.description = s.description.clone();
                c.dataset = s.dataset.clone();
                c.into_ref()
            };
            alignment.sequences.push(Rc::clone(&copy));
            copies.push((Rc::clone(seq), copy));
        }
        let remap = |seq: &SeqRef| -> SeqRef {
            copies
                .iter()
                .find(|(orig, _)| Rc::ptr_eq(orig, seq))
                .map(|(_, copy)| Rc::clone(copy))
                .unwrap_or_else(|| Rc::clone(seq))
        };
        let mut groups: Vec<(GroupRef, GroupRef)> = Vec::new();
        for group in &src_alignment.groups {
            let g = group.borrow();
            let mut copy = SequenceGroup::new(g.name.clone(), g.start, g.end);
            copy.style = g.style.clone();
            copy.sequences = g.sequences.iter().map(&remap).collect();
            let copy = copy.into_ref();
            alignment.groups.push(Rc::clone(&copy));
            groups.push((Rc::clone(group), copy));
        }
        for row in &src_alignment.annotations {
            let r = row.borrow();
            if r.group.is_none() && r.sequence.is_none() {
                alignment.annotations.push(Rc::clone(row));
                continue;
            }
            let mut copy = r.clone();
            copy.sequence = r.sequence.as_ref().map(&remap);
            copy.group = r.group.as_ref().map(|group| {
                groups
                    .iter()
                    .find(|(orig, _)| Rc::ptr_eq(orig, group))
                    .map(|(_, copy)| Rc::clone(copy))
                    .unwrap_or_else(|| Rc::clone(group))
            });
            alignment.annotations.push(copy.into_ref());
        }

        let mut view = View::with_history(
            new_id,
            src.sequence_set_id.clone(),
            src.viewport.title.clone(),
            alignment.into_ref(),
            Rc::clone(&src.viewport.history),
        );
        view.viewport = src.viewport.clone();
        view.viewport.hidden_sequences = src.viewport.hidden_sequences.iter().map(&remap).collect();
        view.gather_views = true;
        view.viewer_links = src
            .viewer_links
            .iter()
            .map(|link| ViewerLink {
                bindings: link
                    .bindings
                    .iter()
                    .map(|b| SeqBinding {
                        sequence: remap(&b.sequence),
                        model: b.model.clone(),
                        chain: b.chain.clone(),
                    })
                    .collect(),
                ..link.clone()
            })
            .collect();
        drop(src_alignment);
        drop(src);

        let view = view.into_ref();
        self.views.push(Rc::clone(&view));
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MoleculeType;

    fn make_view(id: &str, set: &str) -> ViewRef {
        let mut alignment = Alignment::new(MoleculeType::Protein);
        alignment
            .sequences
            .push(Sequence::from_residues("p1", "MK-L").into_ref());
        let alignment = alignment.into_ref();
        Alignment::derive_dataset(&alignment);
        View::new(id, set, "test", alignment).into_ref()
    }

    #[test]
    fn test_duplicate_view_shares_dataset_and_history() {
        let mut workspace = Workspace::new();
        let view = make_view("v1", "set1");
        workspace.add_view(Rc::clone(&view));

        let copy = workspace.duplicate_view(&view, "v2");
        assert_eq!(workspace.views.len(), 2);
        assert!(copy.borrow().shares_history_with(&view.borrow()));

        let orig_seq = Rc::clone(&view.borrow().alignment.borrow().sequences[0]);
        let copy_seq = Rc::clone(&copy.borrow().alignment.borrow().sequences[0]);
        assert!(!Rc::ptr_eq(&orig_seq, &copy_seq));
        assert!(Rc::ptr_eq(
            orig_seq.borrow().dataset.as_ref().unwrap(),
            copy_seq.borrow().dataset.as_ref().unwrap()
        ));
        assert_eq!(workspace.views_in_set("set1").len(), 2);
    }

    #[test]
    fn test_duplicate_view_rebinds_group_rows() {
        use crate::model::AnnotationRow;

        let mut workspace = Workspace::new();
        let view = make_view("v1", "set1");
        {
            let v = view.borrow();
            let mut alignment = v.alignment.borrow_mut();
            let mut group = SequenceGroup::new("motif", 0, 2);
            group.sequences = alignment.sequences.clone();
            let group = group.into_ref();

            let mut bound = AnnotationRow::new("Motif score");
            bound.group = Some(Rc::clone(&group));
            bound.sequence = Some(Rc::clone(&alignment.sequences[0]));
            alignment.annotations = vec![bound.into_ref(), AnnotationRow::new("Notes").into_ref()];
            alignment.groups.push(group);
        }
        workspace.add_view(Rc::clone(&view));

        let copy = workspace.duplicate_view(&view, "v2");
        let src = view.borrow();
        let src = src.alignment.borrow();
        let dup = copy.borrow();
        let dup = dup.alignment.borrow();

        let bound = dup.annotations[0].borrow();
        assert!(!Rc::ptr_eq(&dup.annotations[0], &src.annotations[0]));
        assert!(Rc::ptr_eq(bound.group.as_ref().unwrap(), &dup.groups[0]));
        assert!(Rc::ptr_eq(bound.sequence.as_ref().unwrap(), &dup.sequences[0]));
        assert!(Rc::ptr_eq(&dup.groups[0].borrow().sequences[0], &dup.sequences[0]));
        assert_eq!(bound.label, "Motif score");

        // Unbound rows stay shared.
        assert!(Rc::ptr_eq(&dup.annotations[1], &src.annotations[1]));
    }

    #[test]
    fn test_close_view_unpairs_split() {
        let mut workspace = Workspace::new();
        workspace.add_view(make_view("dna", "s1"));
        workspace.add_view(make_view("prot", "s2"));
        workspace.containers.push(Container::Split {
            nucleotide: "dna".to_string(),
            protein: "prot".to_string(),
        });

        let partner = workspace.close_view("dna");
        assert_eq!(partner.as_deref(), Some("prot"));
        assert_eq!(
            workspace.containers,
            vec![Container::Standalone {
                view: "prot".to_string()
            }]
        );
    }
}
