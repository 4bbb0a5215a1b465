//! Saves views into an archive container.
//!
//! Each dataset is written once, before the first view that uses it.
//! Viewer states and copied files follow the views.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::rc::Rc;

use log::{debug, info, warn};

use super::container::{
    DEFAULT_COMPRESSION, EntryWriter, dataset_entry, file_entry, rna_entry, view_entry, viewer_entry,
};
use super::context::{SaveContext, SaveOptions};
use super::document::{
    AnnotationDoc, AnnotationElementDoc, CodonFrameDoc, CodonMapDoc, ColumnRangeDoc, DatasetDoc,
    DbRefDoc, FORMAT_VERSION, FeatureDoc, FeatureSettingDoc, GroupDoc, MappingDoc, MemberDoc, PdbDoc,
    PropertyDoc, RangeDoc, SequenceDoc, ThresholdDoc, ViewDoc, ViewerLinkDoc, ViewerSeqDoc,
    ViewportDoc, to_xml,
};
use super::registry::{Entity, IdentityRegistry};
use super::report::Report;
use crate::error::Result;
use crate::model::autocalc;
use crate::model::sequence::derive_dataset;
use crate::model::{
    Alignment, AlignmentRef, AnnotationRow, Container, Mapping, SeqRef, SequenceGroup, ViewRef,
    ViewerState, Viewport, Workspace,
};

fn sequence_id(registry: &mut IdentityRegistry, seq: &SeqRef) -> String {
    registry.id_for(&Entity::Sequence(Rc::clone(seq)))
}

fn mapping_doc(registry: &mut IdentityRegistry, mapping: &Mapping) -> MappingDoc {
    let ranges = |ranges: &[(i64, i64)]| {
        ranges
            .iter()
            .map(|&(start, end)| RangeDoc { start, end })
            .collect()
    };
    MappingDoc {
        to: mapping.to.as_ref().map(|to| sequence_id(registry, to)),
        from_ratio: mapping.map.from_ratio,
        to_ratio: mapping.map.to_ratio,
        from: ranges(&mapping.map.from_ranges),
        to_ranges: ranges(&mapping.map.to_ranges),
    }
}

/// Writes views, one at a time, into a container.
pub struct ArchiveWriter<W: Write> {
    entries: EntryWriter<W>,
    ctx: SaveContext,
    short_name: String,
    /// Viewer states and copied files, written after every view.
    trailing: Vec<(String, Vec<u8>)>,
    views_written: usize,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W, short_name: impl Into<String>, options: &SaveOptions) -> Self {
        let level = options.compression.unwrap_or(DEFAULT_COMPRESSION);
        Self {
            entries: EntryWriter::new(writer, level),
            ctx: SaveContext::new(options),
            short_name: short_name.into(),
            trailing: Vec::new(),
            views_written: 0,
        }
    }

    /// Write one view, and its dataset if not written yet. `window_index` is
    /// the view's position in a window holding several views. Returns false
    /// if the view's sequence set is skipped.
    pub fn write_view(
        &mut self,
        workspace: &Workspace,
        view: &ViewRef,
        window_index: Option<usize>,
    ) -> Result<bool> {
        self.ctx.check_cancelled()?;
        let v = view.borrow();
        if self.ctx.is_skipped(&v.sequence_set_id) {
            debug!("skipping view {} of sequence set {}", v.id, v.sequence_set_id);
            return Ok(false);
        }

        let alignment = Rc::clone(&v.alignment);
        let dataset = ensure_dataset(&alignment);
        let dataset_id = self
            .ctx
            .registry
            .id_for(&Entity::Alignment(Rc::clone(&dataset)));
        if self.ctx.datasets.insert(dataset_id.clone()) {
            let doc = self.dataset_doc(workspace, &dataset, &dataset_id);
            let name = self
                .entries
                .unique_name(&dataset_entry(&self.short_name, v.title()));
            self.entries.add(&name, to_xml(&name, &doc)?.as_bytes())?;
        }

        let registry = &mut self.ctx.registry;
        let aln = alignment.borrow();
        let mut doc = ViewDoc {
            version: FORMAT_VERSION.to_string(),
            id: v.id.clone(),
            sequence_set_id: v.sequence_set_id.clone(),
            dataset_id,
            title: v.viewport.title.clone(),
            molecule: aln.molecule.to_string(),
            gap_char: aln.gap_char.to_string(),
            complement_id: v.complement_id.clone().or_else(|| v.split_partner.clone()),
            gather_views: v.gather_views
                || matches!(workspace.container_of(&v.id), Some(Container::Tabbed { .. })),
            properties: aln
                .properties
                .iter()
                .map(|(name, value)| PropertyDoc {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            ..ViewDoc::default()
        };

        for seq in &aln.sequences {
            let s = seq.borrow();
            let dataset_ref = s.dataset.as_ref().map(|ds| sequence_id(registry, ds));
            doc.sequences.push(SequenceDoc {
                id: sequence_id(registry, seq),
                name: s.name.clone(),
                start: s.start,
                end: s.end,
                dataset_ref,
                description: s.description.clone(),
                residues: s.data(),
                ..SequenceDoc::default()
            });
        }
        doc.annotations = aln
            .annotations
            .iter()
            .map(|row| {
                let id = registry.id_for(&Entity::Annotation(Rc::clone(row)));
                annotation_doc(registry, id, &row.borrow())
            })
            .collect();
        doc.groups = aln
            .groups
            .iter()
            .map(|group| {
                let id = registry.id_for(&Entity::Group(Rc::clone(group)));
                group_doc(registry, id, &group.borrow())
            })
            .collect();
        doc.viewport = viewport_doc(registry, &v.viewport);

        for link in &v.viewer_links {
            let viewer = workspace.viewer(&link.viewer_id);
            let newick = viewer.as_ref().and_then(|viewer| match &viewer.borrow().state {
                ViewerState::Tree { newick } => Some(newick.clone()),
                _ => None,
            });
            let inline_state = newick.or_else(|| link.inline_state.clone());
            doc.viewers.push(ViewerLinkDoc {
                id: link.viewer_id.clone(),
                kind: link.kind.to_string(),
                title: link.title.clone(),
                state: inline_state,
                sequences: link
                    .bindings
                    .iter()
                    .map(|b| ViewerSeqDoc {
                        seq: sequence_id(registry, &b.sequence),
                        model: b.model.clone(),
                        chain: b.chain.clone(),
                    })
                    .collect(),
            });

            if let Some(viewer) = viewer
                && self.ctx.viewers.insert(link.viewer_id.clone())
            {
                match &viewer.borrow().state {
                    ViewerState::Structure { session } => self
                        .trailing
                        .push((viewer_entry(&link.viewer_id), session.clone())),
                    ViewerState::Rna { models } => {
                        for (index, model) in models.iter().enumerate() {
                            self.trailing
                                .push((rna_entry(&link.viewer_id, index), model.clone()));
                        }
                    }
                    ViewerState::Tree { .. } => {}
                }
            }
        }
        drop(aln);

        let name = self
            .entries
            .unique_name(&view_entry(&self.short_name, window_index));
        self.entries.add(&name, to_xml(&name, &doc)?.as_bytes())?;
        self.views_written += 1;
        debug!("saved view {} as {name}", v.id);
        Ok(true)
    }

    fn dataset_doc(&mut self, workspace: &Workspace, dataset: &AlignmentRef, id: &str) -> DatasetDoc {
        let ds = dataset.borrow();
        let mut doc = DatasetDoc {
            version: FORMAT_VERSION.to_string(),
            id: id.to_string(),
            molecule: ds.molecule.to_string(),
            ..DatasetDoc::default()
        };

        for seq in &ds.sequences {
            let seq_id = sequence_id(&mut self.ctx.registry, seq);
            let s = seq.borrow();
            let db_refs = s
                .db_refs
                .iter()
                .map(|db| DbRefDoc {
                    source: db.source.clone(),
                    version: db.version.clone(),
                    accession: db.accession.clone(),
                    mapping: db
                        .map
                        .as_ref()
                        .map(|m| mapping_doc(&mut self.ctx.registry, m)),
                })
                .collect();
            let mut structures = Vec::with_capacity(s.structures.len());
            for pdb in &s.structures {
                let entry = pdb
                    .file
                    .as_deref()
                    .and_then(|source| self.store_file(workspace, source));
                structures.push(PdbDoc {
                    id: pdb.id.clone(),
                    chain: pdb.chain.clone(),
                    file: pdb.file.clone(),
                    entry,
                });
            }
            doc.sequences.push(SequenceDoc {
                id: seq_id,
                name: s.name.clone(),
                start: s.start,
                end: s.end,
                dataset_ref: None,
                description: s.description.clone(),
                residues: s.data(),
                db_refs,
                structures,
                features: s
                    .features
                    .iter()
                    .map(|f| FeatureDoc {
                        kind: f.kind.clone(),
                        begin: f.begin,
                        end: f.end,
                        description: f.description.clone(),
                        score: f.score,
                    })
                    .collect(),
            });
        }

        for frame in &ds.codon_frames {
            let frame_id = self
                .ctx
                .registry
                .id_for(&Entity::CodonFrame(Rc::clone(frame)));
            let mut maps = Vec::new();
            for m in &frame.borrow().mappings {
                let (Some(dna), Some(_)) = (&m.dna, &m.mapping.to) else {
                    debug!("not saving an unlinked mapping of codon frame {frame_id}");
                    continue;
                };
                maps.push(CodonMapDoc {
                    dna: sequence_id(&mut self.ctx.registry, dna),
                    mapping: mapping_doc(&mut self.ctx.registry, &m.mapping),
                });
            }
            doc.codon_frames.push(CodonFrameDoc { id: frame_id, maps });
        }
        doc
    }

    /// Queue a copy of an external file, once per source. Returns the entry
    /// name, or `None` if the file cannot be read.
    fn store_file(&mut self, workspace: &Workspace, source: &str) -> Option<String> {
        if let Some(name) = self.ctx.files.get(source) {
            return Some(name.clone());
        }
        let data = match workspace.external_files.get(source) {
            Some(data) => data.clone(),
            None => match fs::read(source) {
                Ok(data) => data,
                Err(e) => {
                    warn!("not copying {source} into the archive: {e}");
                    return None;
                }
            },
        };
        let base = file_entry(source);
        let mut name = base.clone();
        let mut n = 1;
        while self.ctx.files.values().any(|used| *used == name) {
            name = format!("{base}_{n}");
            n += 1;
        }
        self.ctx.files.insert(source.to_string(), name.clone());
        self.trailing.push((name.clone(), data));
        Some(name)
    }

    /// Write the trailing entries and close the container.
    pub fn finish(mut self) -> Result<(W, Report)> {
        self.ctx.check_cancelled()?;
        for (name, data) in std::mem::take(&mut self.trailing) {
            self.entries.add(&name, &data)?;
        }
        info!(
            "saved {} views in {} entries",
            self.views_written,
            self.entries.len()
        );
        let writer = self.entries.finish()?;
        Ok((writer, self.ctx.report))
    }
}

/// Make sure every view sequence has a dataset sequence held by the view's
/// dataset alignment.
fn ensure_dataset(alignment: &AlignmentRef) -> AlignmentRef {
    let dataset = Alignment::derive_dataset(alignment);
    for seq in &alignment.borrow().sequences {
        let ds_seq = derive_dataset(seq);
        let mut ds = dataset.borrow_mut();
        if ds.index_of(&ds_seq).is_none() {
            ds.sequences.push(ds_seq);
        }
    }
    dataset
}

fn annotation_doc(registry: &mut IdentityRegistry, id: String, row: &AnnotationRow) -> AnnotationDoc {
    let regenerated = row.auto_calculated && row.calc_id.as_deref().is_some_and(autocalc::is_known);
    let elements = if regenerated {
        Vec::new()
    } else {
        row.elements
            .iter()
            .enumerate()
            .filter_map(|(position, element)| {
                element.as_ref().map(|e| AnnotationElementDoc {
                    position,
                    display_char: e.display_char.clone(),
                    secondary_structure: e.secondary_structure.map(String::from),
                    value: e.value,
                    description: e.description.clone(),
                })
            })
            .collect()
    };
    AnnotationDoc {
        id,
        label: row.label.clone(),
        description: row.description.clone(),
        calc_id: row.calc_id.clone(),
        auto_calculated: row.auto_calculated,
        visible: row.visible,
        height: row.height,
        graph: row.graph.to_string(),
        score: row.score,
        sequence_ref: row.sequence.as_ref().map(|s| sequence_id(registry, s)),
        group_ref: row
            .group
            .as_ref()
            .map(|g| registry.id_for(&Entity::Group(Rc::clone(g)))),
        threshold: row.threshold.as_ref().map(|t| ThresholdDoc {
            value: t.value,
            label: t.label.clone(),
        }),
        elements,
    }
}

fn group_doc(registry: &mut IdentityRegistry, id: String, group: &SequenceGroup) -> GroupDoc {
    GroupDoc {
        id,
        name: group.name.clone(),
        start: group.start,
        end: group.end,
        colour_scheme: group.style.colour_scheme.clone(),
        outline_colour: group.style.outline_colour,
        display_boxes: group.style.display_boxes,
        display_text: group.style.display_text,
        colour_text: group.style.colour_text,
        members: group
            .sequences
            .iter()
            .map(|s| MemberDoc {
                id: sequence_id(registry, s),
            })
            .collect(),
    }
}

fn viewport_doc(registry: &mut IdentityRegistry, viewport: &Viewport) -> ViewportDoc {
    ViewportDoc {
        colour_scheme: viewport.colour_scheme.clone(),
        wrap: viewport.wrap,
        show_annotation: viewport.show_annotation,
        font_name: viewport.font.name.clone(),
        font_size: viewport.font.size,
        font_style: viewport.font.style,
        start_res: viewport.start_res,
        start_seq: viewport.start_seq,
        x: viewport.geometry.x,
        y: viewport.geometry.y,
        width: viewport.geometry.width,
        height: viewport.geometry.height,
        hidden_columns: viewport
            .hidden_columns
            .iter()
            .map(|&(start, end)| ColumnRangeDoc { start, end })
            .collect(),
        hidden_sequences: viewport
            .hidden_sequences
            .iter()
            .map(|s| MemberDoc {
                id: sequence_id(registry, s),
            })
            .collect(),
        feature_settings: viewport
            .feature_settings
            .iter()
            .map(|f| FeatureSettingDoc {
                kind: f.kind.clone(),
                colour: f.colour,
                display: f.display,
            })
            .collect(),
    }
}

/// Views in window order, each with its position in a multi-view window.
fn window_order(workspace: &Workspace) -> Vec<(ViewRef, Option<usize>)> {
    let mut ordered: Vec<(ViewRef, Option<usize>)> = Vec::new();
    for container in &workspace.containers {
        let ids = container.view_ids();
        let several = ids.len() > 1;
        for (index, id) in ids.into_iter().enumerate() {
            if let Some(view) = workspace.view(id) {
                ordered.push((view, several.then_some(index)));
            }
        }
    }
    for view in &workspace.views {
        if !ordered.iter().any(|(v, _)| Rc::ptr_eq(v, view)) {
            ordered.push((Rc::clone(view), None));
        }
    }
    ordered
}

fn short_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

/// Save every open view into one container written to `writer`.
pub fn write_workspace<W: Write>(
    workspace: &Workspace,
    writer: W,
    short_name: &str,
    options: &SaveOptions,
) -> Result<(W, Report)> {
    let mut archive = ArchiveWriter::new(writer, short_name, options);
    for (view, index) in window_order(workspace) {
        archive.write_view(workspace, &view, index)?;
    }
    archive.finish()
}

/// Save every open view to `path`.
pub fn save_all(workspace: &Workspace, path: &Path, options: &SaveOptions) -> Result<Report> {
    let file = BufWriter::new(File::create(path)?);
    let (mut file, report) = write_workspace(workspace, file, &short_name(path), options)?;
    file.flush()?;
    Ok(report)
}

/// Save one view and its dataset to `path`.
pub fn save_view(
    workspace: &Workspace,
    view: &ViewRef,
    path: &Path,
    options: &SaveOptions,
) -> Result<Report> {
    let file = BufWriter::new(File::create(path)?);
    let mut archive = ArchiveWriter::new(file, short_name(path), options);
    archive.write_view(workspace, view, None)?;
    let (mut file, report) = archive.finish()?;
    file.flush()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::container::{EntryKind, EntryReader, classify};
    use crate::model::{AnnotationElement, MoleculeType, Sequence, View, ViewerBinding, ViewerKind};
    use crate::model::{SeqBinding, ViewerLink};

    fn entry_names(bytes: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        EntryReader::new(bytes)
            .read_entries(|entry| {
                names.push(entry.name);
                Ok(())
            })
            .unwrap();
        names
    }

    fn protein_view(id: &str, set: &str) -> ViewRef {
        let mut alignment = Alignment::new(MoleculeType::Protein);
        alignment
            .sequences
            .push(Sequence::from_residues("p1", "MK-L").into_ref());
        alignment
            .sequences
            .push(Sequence::from_residues("p2", "MRVL").into_ref());
        View::new(id, set, "proteins", alignment.into_ref()).into_ref()
    }

    #[test]
    fn test_dataset_written_once_before_views() {
        let mut workspace = Workspace::new();
        let view = protein_view("V1", "set1");
        Alignment::derive_dataset(&view.borrow().alignment);
        workspace.add_view(Rc::clone(&view));
        workspace.duplicate_view(&view, "V2");

        let (bytes, report) =
            write_workspace(&workspace, Vec::new(), "project", &SaveOptions::default()).unwrap();
        assert!(report.is_empty());
        let names = entry_names(&bytes);
        let kinds: Vec<EntryKind> = names.iter().map(|n| classify(n)).collect();
        assert_eq!(kinds, vec![EntryKind::Dataset, EntryKind::View, EntryKind::View]);
        assert_eq!(names[0], "project Dataset for proteins.xml");
    }

    #[test]
    fn test_skip_list_omits_views() {
        let mut workspace = Workspace::new();
        workspace.add_view(protein_view("V1", "keep"));
        workspace.add_view(protein_view("V2", "drop"));
        let options = SaveOptions {
            skip: ["drop".to_string()].into_iter().collect(),
            ..SaveOptions::default()
        };
        let (bytes, _) = write_workspace(&workspace, Vec::new(), "p", &options).unwrap();
        assert_eq!(entry_names(&bytes).len(), 2);
    }

    #[test]
    fn test_viewer_state_written_once_after_views() {
        let mut workspace = Workspace::new();
        let mut viewer = ViewerBinding::new(
            "vr1",
            ViewerState::Rna {
                models: vec![b"m0".to_vec(), b"m1".to_vec()],
            },
        );
        for id in ["V1", "V2"] {
            let view = protein_view(id, id);
            let seq = Rc::clone(&view.borrow().alignment.borrow().sequences[0]);
            view.borrow_mut().viewer_links.push(ViewerLink {
                viewer_id: "vr1".to_string(),
                kind: ViewerKind::Rna,
                title: None,
                bindings: vec![SeqBinding {
                    sequence: seq,
                    model: None,
                    chain: None,
                }],
                inline_state: None,
            });
            viewer.attach(id);
            workspace.add_view(view);
        }
        workspace.viewers.insert("vr1".to_string(), viewer.into_ref());

        let (bytes, _) =
            write_workspace(&workspace, Vec::new(), "p", &SaveOptions::default()).unwrap();
        let names = entry_names(&bytes);
        assert_eq!(names.iter().filter(|n| n.starts_with("rna_vr1_")).count(), 2);
        assert_eq!(names.last().map(String::as_str), Some("rna_vr1_1"));
    }

    #[test]
    fn test_auto_rows_saved_without_values() {
        let mut row = AnnotationRow::new("Consensus");
        row.calc_id = Some(autocalc::CONSENSUS.to_string());
        row.auto_calculated = true;
        row.elements = vec![Some(AnnotationElement::default())];
        let mut registry = IdentityRegistry::with_salt("");
        let doc = annotation_doc(&mut registry, "an1".to_string(), &row);
        assert!(doc.elements.is_empty());

        row.calc_id = Some("custom".to_string());
        let doc = annotation_doc(&mut registry, "an2".to_string(), &row);
        assert_eq!(doc.elements.len(), 1);
    }

    #[test]
    fn test_external_file_stored_once() {
        let dir = tempfile::tempdir().unwrap();
        let pdb_path = dir.path().join("1abc.pdb");
        fs::write(&pdb_path, b"ATOM").unwrap();
        let source = pdb_path.to_string_lossy().into_owned();

        let mut workspace = Workspace::new();
        let view = protein_view("V1", "set1");
        let dataset = ensure_dataset(&view.borrow().alignment);
        for seq in &dataset.borrow().sequences {
            seq.borrow_mut().structures.push(crate::model::PdbEntry {
                id: "1abc".to_string(),
                file: Some(source.clone()),
                chain: None,
            });
        }
        workspace.add_view(view);

        let (bytes, _) =
            write_workspace(&workspace, Vec::new(), "p", &SaveOptions::default()).unwrap();
        let files: Vec<String> = entry_names(&bytes)
            .into_iter()
            .filter(|n| classify(n) == EntryKind::ExternalFile)
            .collect();
        assert_eq!(files.len(), 1);
    }
}
