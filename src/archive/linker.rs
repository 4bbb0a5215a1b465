//! Joins that need every view to be present: split pairs, tabbed windows
//! and shared viewer instances.
//!
//! Linking is idempotent. Anything already paired, placed or attached is
//! left alone, so the linker can be re-run after adding a view.

use std::rc::Rc;

use log::{debug, info};

use super::container::{ViewerStates, rna_entry, viewer_entry};
use super::report::{Report, Warning};
use crate::model::{
    Container, MoleculeType, ViewRef, ViewerBinding, ViewerKind, ViewerLink, ViewerState, Workspace,
};

/// What one linker run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub paired: usize,
    pub tabbed: usize,
    pub standalone: usize,
    pub viewers_created: usize,
    pub viewers_attached: usize,
}

impl LinkSummary {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

pub struct CrossViewLinker<'a> {
    states: &'a ViewerStates,
}

impl<'a> CrossViewLinker<'a> {
    pub fn new(states: &'a ViewerStates) -> Self {
        Self { states }
    }

    /// Run every join over the workspace.
    pub fn link(&self, workspace: &mut Workspace, report: &mut Report) -> LinkSummary {
        let mut summary = LinkSummary::default();
        pair_splits(workspace, report, &mut summary);
        gather_tabs(workspace, &mut summary);
        place_remaining(workspace, &mut summary);
        self.attach_viewers(workspace, report, &mut summary);
        if !summary.is_noop() {
            info!(
                "linked views: {} split pairs, {} tabbed, {} standalone, {} viewers created, {} attached",
                summary.paired,
                summary.tabbed,
                summary.standalone,
                summary.viewers_created,
                summary.viewers_attached
            );
        }
        summary
    }

    fn attach_viewers(&self, workspace: &mut Workspace, report: &mut Report, summary: &mut LinkSummary) {
        for view in workspace.views.clone() {
            let view_id = view.borrow().id.clone();
            let links = view.borrow().viewer_links.clone();
            let mut dropped = Vec::new();
            for (index, link) in links.iter().enumerate() {
                let viewer = match workspace.viewer(&link.viewer_id) {
                    Some(viewer) => viewer,
                    None => match self.instantiate(link, report) {
                        Some(binding) => {
                            let viewer = binding.into_ref();
                            workspace
                                .viewers
                                .insert(link.viewer_id.clone(), Rc::clone(&viewer));
                            summary.viewers_created += 1;
                            viewer
                        }
                        None => {
                            dropped.push(index);
                            continue;
                        }
                    },
                };
                let mut viewer = viewer.borrow_mut();
                if viewer.kind() != link.kind {
                    report.malformed(
                        &view_id,
                        format!(
                            "viewer '{}' is a {} viewer but the view links it as {}",
                            link.viewer_id,
                            viewer.kind(),
                            link.kind
                        ),
                    );
                    dropped.push(index);
                    continue;
                }
                if viewer.attach(&view_id) {
                    summary.viewers_attached += 1;
                }
                let added = viewer.merge_bindings(&link.bindings);
                if added > 0 {
                    debug!("viewer {} gained {added} sequence bindings", link.viewer_id);
                }
            }
            if !dropped.is_empty() {
                let mut v = view.borrow_mut();
                let mut index = 0;
                v.viewer_links.retain(|_| {
                    let keep = !dropped.contains(&index);
                    index += 1;
                    keep
                });
            }
        }
    }

    /// Create a viewer from its stored state.
    fn instantiate(&self, link: &ViewerLink, report: &mut Report) -> Option<ViewerBinding> {
        let state = match link.kind {
            ViewerKind::Structure => match self.states.structures.get(&link.viewer_id) {
                Some(session) => ViewerState::Structure {
                    session: session.clone(),
                },
                None => {
                    report.push(Warning::MissingEntry {
                        name: viewer_entry(&link.viewer_id),
                    });
                    return None;
                }
            },
            ViewerKind::Tree => match &link.inline_state {
                Some(newick) => ViewerState::Tree {
                    newick: newick.clone(),
                },
                None => {
                    report.malformed(
                        &link.viewer_id,
                        "tree viewer link carries no tree".to_string(),
                    );
                    return None;
                }
            },
            ViewerKind::Rna => match self.states.rna.get(&link.viewer_id) {
                Some(models) if !models.is_empty() => ViewerState::Rna {
                    models: models.values().cloned().collect(),
                },
                _ => {
                    report.push(Warning::MissingEntry {
                        name: rna_entry(&link.viewer_id, 0),
                    });
                    return None;
                }
            },
        };
        let mut binding = ViewerBinding::new(link.viewer_id.clone(), state);
        binding.title = link.title.clone();
        Some(binding)
    }
}

fn is_placed(workspace: &Workspace, view_id: &str) -> bool {
    workspace.container_of(view_id).is_some()
}

/// Remove a view from a standalone or tabbed placement.
fn unplace(workspace: &mut Workspace, view_id: &str) {
    workspace.containers.retain_mut(|container| match container {
        Container::Standalone { view } => view != view_id,
        Container::Tabbed { views, .. } => {
            views.retain(|v| v != view_id);
            !views.is_empty()
        }
        Container::Split { .. } => true,
    });
}

fn pair_splits(workspace: &mut Workspace, report: &mut Report, summary: &mut LinkSummary) {
    for view in workspace.views.clone() {
        let (view_id, complement, partner, molecule) = {
            let v = view.borrow();
            (
                v.id.clone(),
                v.complement_id.clone(),
                v.split_partner.clone(),
                v.alignment.borrow().molecule,
            )
        };
        let Some(complement) = complement else {
            continue;
        };
        if partner.is_some() {
            continue;
        }
        let counterpart = workspace.view(&complement).filter(|other| {
            let o = other.borrow();
            o.id != view_id
                && o.alignment.borrow().molecule != molecule
                && o.split_partner.as_ref().is_none_or(|p| p == &view_id)
        });
        let Some(counterpart) = counterpart else {
            if !is_placed(workspace, &view_id) {
                report.push(Warning::SplitPairing {
                    view: view_id.clone(),
                    complement,
                });
                workspace.containers.push(Container::Standalone { view: view_id });
                summary.standalone += 1;
            }
            continue;
        };

        let (nucleotide, protein) = if molecule == MoleculeType::Nucleotide {
            (Rc::clone(&view), counterpart)
        } else {
            (counterpart, Rc::clone(&view))
        };
        join(workspace, &nucleotide, &protein);
        summary.paired += 1;
    }
}

fn join(workspace: &mut Workspace, nucleotide: &ViewRef, protein: &ViewRef) {
    let nucleotide_id = nucleotide.borrow().id.clone();
    let protein_id = protein.borrow().id.clone();
    unplace(workspace, &nucleotide_id);
    unplace(workspace, &protein_id);
    nucleotide.borrow_mut().split_partner = Some(protein_id.clone());
    protein.borrow_mut().split_partner = Some(nucleotide_id.clone());
    debug!("paired {nucleotide_id} with {protein_id}");
    workspace.containers.push(Container::Split {
        nucleotide: nucleotide_id,
        protein: protein_id,
    });
}

/// Whether the views of a set should be tabbed: the flag of the last view
/// loaded for the set decides.
fn wants_tabs(views: &[ViewRef]) -> bool {
    views.last().is_some_and(|v| v.borrow().gather_views)
}

fn gather_tabs(workspace: &mut Workspace, summary: &mut LinkSummary) {
    let mut sets: Vec<String> = Vec::new();
    for view in &workspace.views {
        let set = view.borrow().sequence_set_id.clone();
        if !sets.contains(&set) {
            sets.push(set);
        }
    }

    for set in sets {
        let views: Vec<ViewRef> = workspace
            .views_in_set(&set)
            .into_iter()
            .filter(|v| v.borrow().split_partner.is_none())
            .collect();
        if views.len() < 2 || !wants_tabs(&views) {
            continue;
        }
        let ids: Vec<String> = views.iter().map(|v| v.borrow().id.clone()).collect();
        let existing = workspace.containers.iter().position(
            |c| matches!(c, Container::Tabbed { sequence_set_id, .. } if *sequence_set_id == set),
        );
        let missing: Vec<String> = match existing {
            Some(index) => {
                let held = workspace.containers[index].view_ids();
                ids.iter()
                    .filter(|id| !held.contains(&id.as_str()))
                    .cloned()
                    .collect()
            }
            None => ids.clone(),
        };
        if missing.is_empty() {
            continue;
        }
        for id in &missing {
            unplace(workspace, id);
        }
        let index = workspace.containers.iter().position(
            |c| matches!(c, Container::Tabbed { sequence_set_id, .. } if *sequence_set_id == set),
        );
        match index {
            Some(index) => {
                if let Container::Tabbed { views, .. } = &mut workspace.containers[index] {
                    views.extend(missing.iter().cloned());
                }
            }
            None => workspace.containers.push(Container::Tabbed {
                sequence_set_id: set.clone(),
                views: ids,
            }),
        }
        summary.tabbed += missing.len();
    }
}

fn place_remaining(workspace: &mut Workspace, summary: &mut LinkSummary) {
    let unplaced: Vec<String> = workspace
        .views
        .iter()
        .map(|v| v.borrow().id.clone())
        .filter(|id| !is_placed(workspace, id))
        .collect();
    for view in unplaced {
        workspace.containers.push(Container::Standalone { view });
        summary.standalone += 1;
    }
}

/// Duplicate a view and link the copy into the workspace. Everything that
/// was already linked stays as it was.
pub fn duplicate_and_link(
    workspace: &mut Workspace,
    source: &ViewRef,
    new_id: impl Into<String>,
    report: &mut Report,
) -> ViewRef {
    let copy = workspace.duplicate_view(source, new_id);
    let states = ViewerStates::new();
    CrossViewLinker::new(&states).link(workspace, report);
    copy
}
