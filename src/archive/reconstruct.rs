//! Rebuilds live views and dataset alignments from entry documents.

use std::rc::Rc;
use std::str::FromStr;

use log::debug;

use super::context::{LoadContext, PendingFile};
use super::document::{
    AnnotationDoc, CodonFrameDoc, DatasetDoc, DbRefDoc, GroupDoc, MappingDoc, SequenceDoc, ViewDoc,
    ViewportDoc,
};
use super::merger::{Candidate, is_valid_id};
use super::registry::{Entity, IdentityRegistry};
use super::report::Warning;
use super::resolver::{ReadyFn, ResolveFn};
use crate::editor::History;
use crate::model::autocalc;
use crate::model::{
    Alignment, AlignmentRef, AnnotationElement, AnnotationRef, AnnotationRow, CodonFrame,
    CodonMapping, DbRef, FeatureSetting, Font, Geometry, GraphType, GroupRef, GroupStyle, MapError,
    MapList, Mapping, MoleculeType, PdbEntry, SeqBinding, SeqRef, Sequence, SequenceFeature,
    SequenceGroup, Threshold, View, ViewRef, ViewerKind, ViewerLink, Viewport, VisualState,
};

/// Parse a persisted enumeration; an empty value means the default.
fn parse_enum<T: FromStr + Default>(value: &str) -> Option<T> {
    if value.is_empty() {
        return Some(T::default());
    }
    value.parse().ok()
}

fn parse_map(doc: &MappingDoc) -> Result<MapList, MapError> {
    MapList::new(
        doc.from.iter().map(|r| (r.start, r.end)).collect(),
        doc.to_ranges.iter().map(|r| (r.start, r.end)).collect(),
        doc.from_ratio,
        doc.to_ratio,
    )
}

/// Link to `target` now if possible, otherwise queue the link.
fn link(
    ctx: &mut LoadContext,
    target: &str,
    what: &'static str,
    ready: Option<ReadyFn>,
    mut resolve: ResolveFn,
) {
    let key = ctx.reference_key(target);
    let now = ready.as_ref().is_none_or(|ready| ready(&ctx.registry))
        && ctx.resolver.is_resolvable(&key, &ctx.registry);
    if now
        && let Some(entity) = ctx.registry.entity_for(&key)
        && resolve(entity, &ctx.registry)
    {
        return;
    }
    match ready {
        Some(ready) => ctx.resolver.defer_when(key, what, ready, resolve),
        None => ctx.resolver.defer(key, what, resolve),
    }
}

/// Load a dataset entry: canonical sequences in their stored order, their
/// cross-references, and codon frames.
pub fn load_dataset(ctx: &mut LoadContext, entry: &str, doc: &DatasetDoc) {
    if !is_valid_id(&doc.id) {
        ctx.report.malformed(entry, format!("invalid dataset ID '{}'", doc.id));
        return;
    }
    let molecule = parse_enum::<MoleculeType>(&doc.molecule).unwrap_or_else(|| {
        ctx.report
            .malformed(entry, format!("unknown molecule type '{}'", doc.molecule));
        MoleculeType::default()
    });
    let dataset_key = ctx.local_id(&doc.id);
    let dataset = ctx
        .merger
        .dataset_alignment(&mut ctx.registry, &mut ctx.report, &dataset_key, molecule);

    for (index, seq_doc) in doc.sequences.iter().enumerate() {
        if !is_valid_id(&seq_doc.id) {
            ctx.report
                .malformed(entry, format!("invalid sequence ID '{}'", seq_doc.id));
            continue;
        }
        let candidate = Candidate::new(&seq_doc.name, &seq_doc.residues, seq_doc.start, seq_doc.end);
        let seq_key = ctx.local_id(&seq_doc.id);
        let Some((seq, _)) =
            ctx.merger
                .ensure_dataset_sequence(&mut ctx.registry, &mut ctx.report, &seq_key, candidate)
        else {
            continue;
        };
        ctx.merger.place(&dataset, &seq, Some(index));
        apply_details(ctx, entry, &seq, seq_doc);
    }

    for frame in &doc.codon_frames {
        load_codon_frame(ctx, entry, &dataset, frame);
    }
    debug!(
        "loaded dataset {} ({} sequences)",
        doc.id,
        dataset.borrow().num_sequences()
    );
}

/// Copy descriptions, cross-references, structures and features onto a
/// dataset sequence that does not have them yet.
fn apply_details(ctx: &mut LoadContext, entry: &str, seq: &SeqRef, doc: &SequenceDoc) {
    let (has_refs, has_structures, has_features) = {
        let mut s = seq.borrow_mut();
        if s.description.is_none() {
            s.description = doc.description.clone();
        }
        (!s.db_refs.is_empty(), !s.structures.is_empty(), !s.features.is_empty())
    };

    if !has_refs {
        for db_ref in &doc.db_refs {
            add_db_ref(ctx, entry, seq, db_ref);
        }
    }

    if !has_structures {
        for pdb in &doc.structures {
            let index = {
                let mut s = seq.borrow_mut();
                s.structures.push(PdbEntry {
                    id: pdb.id.clone(),
                    file: pdb.file.clone(),
                    chain: pdb.chain.clone(),
                });
                s.structures.len() - 1
            };
            if let Some(name) = &pdb.entry {
                ctx.pending_files.push(PendingFile {
                    sequence: Rc::clone(seq),
                    structure: index,
                    entry: name.clone(),
                });
            }
        }
    }

    if !has_features {
        seq.borrow_mut()
            .features
            .extend(doc.features.iter().map(|f| SequenceFeature {
                kind: f.kind.clone(),
                begin: f.begin,
                end: f.end,
                description: f.description.clone(),
                score: f.score,
            }));
    }
}

fn add_db_ref(ctx: &mut LoadContext, entry: &str, seq: &SeqRef, doc: &DbRefDoc) {
    let mut db_ref = DbRef::new(doc.source.clone(), doc.accession.clone());
    db_ref.version = doc.version.clone();
    let mut target = None;
    if let Some(mapping) = &doc.mapping {
        match parse_map(mapping) {
            Ok(map) => {
                db_ref.map = Some(Mapping::new(map));
                target = mapping.to.clone();
            }
            Err(e) => ctx
                .report
                .malformed(entry, format!("mapping for {}:{}: {e}", doc.source, doc.accession)),
        }
    }
    let index = {
        let mut s = seq.borrow_mut();
        s.db_refs.push(db_ref);
        s.db_refs.len() - 1
    };

    if let Some(target) = target {
        let owner = Rc::clone(seq);
        link(
            ctx,
            &target,
            "mapping target",
            None,
            Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                let Some(to) = entity.as_sequence() else {
                    return false;
                };
                if let Some(map) = owner
                    .borrow_mut()
                    .db_refs
                    .get_mut(index)
                    .and_then(|d| d.map.as_mut())
                {
                    map.to = Some(to);
                }
                true
            }),
        );
    }
}

fn load_codon_frame(ctx: &mut LoadContext, entry: &str, dataset: &AlignmentRef, doc: &CodonFrameDoc) {
    if !is_valid_id(&doc.id) {
        ctx.report
            .malformed(entry, format!("invalid codon frame ID '{}'", doc.id));
        return;
    }
    let key = ctx.local_id(&doc.id);
    if ctx.registry.contains(&key) {
        debug!("codon frame {} already loaded", doc.id);
        return;
    }
    let frame = CodonFrame::new().into_ref();
    if let Err(warning) = ctx
        .registry
        .register(&key, Entity::CodonFrame(Rc::clone(&frame)))
    {
        ctx.report.push(warning);
        return;
    }

    for map_doc in &doc.maps {
        let Some(protein) = map_doc.mapping.to.clone() else {
            ctx.report
                .malformed(entry, format!("codon frame {} has a mapping with no product", doc.id));
            continue;
        };
        let map = match parse_map(&map_doc.mapping) {
            Ok(map) => map,
            Err(e) => {
                ctx.report
                    .malformed(entry, format!("codon frame {}: {e}", doc.id));
                continue;
            }
        };
        let index = {
            let mut f = frame.borrow_mut();
            f.mappings.push(CodonMapping {
                dna: None,
                mapping: Mapping::new(map),
            });
            f.mappings.len() - 1
        };

        let product = Rc::clone(&frame);
        link(
            ctx,
            &protein,
            "codon product",
            None,
            Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                let Some(to) = entity.as_sequence() else {
                    return false;
                };
                if let Some(m) = product.borrow_mut().mappings.get_mut(index) {
                    m.mapping.to = Some(to);
                }
                true
            }),
        );

        // The nucleotide side is only linked once the product is.
        let waiting = Rc::clone(&frame);
        let ready: ReadyFn = Box::new(move |_: &IdentityRegistry| {
            waiting
                .borrow()
                .mappings
                .get(index)
                .is_some_and(|m| m.mapping.to.is_some())
        });
        let owner = Rc::clone(&frame);
        let resolve: ResolveFn = Box::new(move |entity: &Entity, _: &IdentityRegistry| {
            let Some(dna) = entity.as_sequence() else {
                return false;
            };
            if let Some(m) = owner.borrow_mut().mappings.get_mut(index) {
                m.dna = Some(dna);
            }
            true
        });
        link(ctx, &map_doc.dna, "codon frame", Some(ready), resolve);
    }

    dataset.borrow_mut().codon_frames.push(frame);
}

fn load_view_sequence(
    ctx: &mut LoadContext,
    entry: &str,
    dataset: &AlignmentRef,
    doc: &SequenceDoc,
) -> Option<SeqRef> {
    if !is_valid_id(&doc.id) {
        ctx.report
            .malformed(entry, format!("invalid sequence ID '{}'", doc.id));
        return None;
    }
    let Some(dataset_id) = doc.dataset_ref.as_deref().filter(|id| is_valid_id(id)) else {
        ctx.report.malformed(
            entry,
            format!(
                "sequence '{}' has a malformed dataset ID '{}'",
                doc.id,
                doc.dataset_ref.as_deref().unwrap_or("")
            ),
        );
        return None;
    };

    let candidate = Candidate::new(&doc.name, &doc.residues, doc.start, doc.end);
    let dataset_key = ctx.local_id(dataset_id);
    let (dataset_seq, _) =
        ctx.merger
            .ensure_dataset_sequence(&mut ctx.registry, &mut ctx.report, &dataset_key, candidate)?;
    ctx.merger.place(dataset, &dataset_seq, None);
    apply_details(ctx, entry, &dataset_seq, doc);

    let mut seq = Sequence::new(doc.name.clone(), doc.residues.clone(), doc.start, doc.end);
    seq.description = doc.description.clone();
    seq.dataset = Some(dataset_seq);
    let seq = seq.into_ref();
    let key = ctx.local_id(&doc.id);
    if let Err(warning) = ctx.registry.register(&key, Entity::Sequence(Rc::clone(&seq))) {
        ctx.report.push(warning);
        return None;
    }
    Some(seq)
}

/// An auto-calculated row waiting to be rebuilt once its view is complete.
struct AutoRow {
    row: AnnotationRef,
    calc_id: String,
    state: VisualState,
}

/// Load one annotation row of a view whose alignment is `width` columns
/// wide. Elements beyond the last column are dropped with a warning.
fn load_annotation(
    ctx: &mut LoadContext,
    entry: &str,
    sequence_set_id: &str,
    width: usize,
    doc: &AnnotationDoc,
    auto_rows: &mut Vec<AutoRow>,
) -> Option<AnnotationRef> {
    if !is_valid_id(&doc.id) {
        ctx.report
            .malformed(entry, format!("invalid annotation ID '{}'", doc.id));
        return None;
    }
    let key = ctx.local_id(&doc.id);
    if let Some(entity) = ctx.registry.entity_for(&key) {
        let same_set = ctx
            .annotation_sets
            .get(&key)
            .is_some_and(|set| set == sequence_set_id);
        return match entity.as_annotation() {
            Some(row) if same_set => {
                debug!("sharing annotation {} within {sequence_set_id}", doc.id);
                Some(row)
            }
            _ => {
                ctx.report.push(Warning::IdentityCollision {
                    id: doc.id.clone(),
                });
                None
            }
        };
    }

    let Some(graph) = parse_enum::<GraphType>(&doc.graph) else {
        ctx.report.malformed(
            entry,
            format!("annotation '{}' has unknown graph type '{}'", doc.id, doc.graph),
        );
        return None;
    };

    let mut row = AnnotationRow::new(doc.label.clone());
    row.description = doc.description.clone();
    row.calc_id = doc.calc_id.clone();
    row.auto_calculated = doc.auto_calculated;
    row.visible = doc.visible;
    row.height = doc.height;
    row.graph = graph;
    row.score = doc.score;
    row.threshold = doc.threshold.as_ref().map(|t| Threshold {
        value: t.value,
        label: t.label.clone(),
    });
    let mut columns = 0;
    for element in &doc.elements {
        if element.position >= width {
            ctx.report.malformed(
                entry,
                format!(
                    "annotation '{}' has an element at column {} of a {width} column alignment",
                    doc.id, element.position
                ),
            );
            continue;
        }
        columns = columns.max(element.position + 1);
    }
    row.elements = vec![None; columns];
    for element in doc.elements.iter().filter(|e| e.position < columns) {
        row.elements[element.position] = Some(AnnotationElement {
            display_char: element.display_char.clone(),
            secondary_structure: element
                .secondary_structure
                .as_deref()
                .and_then(|s| s.chars().next()),
            value: element.value,
            description: element.description.clone(),
        });
    }

    let regenerate = doc
        .calc_id
        .clone()
        .filter(|calc_id| doc.auto_calculated && autocalc::is_known(calc_id));
    let state = row.visual_state();
    let row = row.into_ref();
    if let Err(warning) = ctx
        .registry
        .register(&key, Entity::Annotation(Rc::clone(&row)))
    {
        ctx.report.push(warning);
        return None;
    }
    ctx.annotation_sets.insert(key, sequence_set_id.to_string());

    if let Some(seq_id) = &doc.sequence_ref {
        let target = Rc::clone(&row);
        link(
            ctx,
            seq_id,
            "annotation sequence",
            None,
            Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                let Some(seq) = entity.as_sequence() else {
                    return false;
                };
                target.borrow_mut().sequence = Some(seq);
                true
            }),
        );
    }
    // Groups follow annotations in an entry, so this is usually deferred.
    if let Some(group_id) = &doc.group_ref {
        let target = Rc::clone(&row);
        link(
            ctx,
            group_id,
            "annotation group",
            None,
            Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                let Some(group) = entity.as_group() else {
                    return false;
                };
                target.borrow_mut().group = Some(group);
                true
            }),
        );
    }

    if let Some(calc_id) = regenerate {
        auto_rows.push(AutoRow {
            row: Rc::clone(&row),
            calc_id,
            state,
        });
    }
    Some(row)
}

fn load_group(ctx: &mut LoadContext, entry: &str, width: usize, doc: &GroupDoc) -> Option<GroupRef> {
    if !is_valid_id(&doc.id) {
        ctx.report
            .malformed(entry, format!("invalid group ID '{}'", doc.id));
        return None;
    }
    if doc.start > doc.end {
        ctx.report.malformed(
            entry,
            format!("group '{}' starts at column {} after its end {}", doc.id, doc.start, doc.end),
        );
        return None;
    }
    if doc.end >= width {
        ctx.report.malformed(
            entry,
            format!("group '{}' ends at column {} of a {width} column alignment", doc.id, doc.end),
        );
        return None;
    }
    let mut group = SequenceGroup::new(doc.name.clone(), doc.start, doc.end);
    group.style = GroupStyle {
        colour_scheme: doc.colour_scheme.clone(),
        outline_colour: doc.outline_colour,
        display_boxes: doc.display_boxes,
        display_text: doc.display_text,
        colour_text: doc.colour_text,
    };
    let group = group.into_ref();
    let key = ctx.local_id(&doc.id);
    if let Err(warning) = ctx.registry.register(&key, Entity::Group(Rc::clone(&group))) {
        ctx.report.push(warning);
        return None;
    }

    for member in &doc.members {
        let target = Rc::clone(&group);
        link(
            ctx,
            &member.id,
            "group member",
            None,
            Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                let Some(seq) = entity.as_sequence() else {
                    return false;
                };
                let mut g = target.borrow_mut();
                if !g.contains(&seq) {
                    g.sequences.push(seq);
                }
                true
            }),
        );
    }
    Some(group)
}

fn apply_viewport(viewport: &mut Viewport, doc: &ViewportDoc) {
    viewport.colour_scheme = doc.colour_scheme.clone();
    viewport.wrap = doc.wrap;
    viewport.show_annotation = doc.show_annotation;
    viewport.font = Font {
        name: doc.font_name.clone(),
        size: doc.font_size,
        style: doc.font_style,
    };
    viewport.hidden_columns = doc
        .hidden_columns
        .iter()
        .map(|r| (r.start, r.end))
        .collect();
    viewport.feature_settings = doc
        .feature_settings
        .iter()
        .map(|f| FeatureSetting {
            kind: f.kind.clone(),
            colour: f.colour,
            display: f.display,
        })
        .collect();
    viewport.start_res = doc.start_res;
    viewport.start_seq = doc.start_seq;
    viewport.geometry = Geometry {
        x: doc.x,
        y: doc.y,
        width: doc.width,
        height: doc.height,
    };
}

/// Materialize one view entry.
///
/// Views of a sequence set seen earlier in the load share its undo history
/// and its annotation rows. Split pairing and viewer attachment are only
/// recorded here; they are performed once every entry has been read.
pub fn reconstruct_view(ctx: &mut LoadContext, entry: &str, doc: &ViewDoc) -> Option<ViewRef> {
    if ctx.is_skipped(&doc.sequence_set_id) {
        debug!("skipping view {} of sequence set {}", doc.id, doc.sequence_set_id);
        return None;
    }
    if !is_valid_id(&doc.id) || !is_valid_id(&doc.sequence_set_id) {
        ctx.report.malformed(
            entry,
            format!(
                "view '{}' has an invalid ID or sequence set ID '{}'",
                doc.id, doc.sequence_set_id
            ),
        );
        return None;
    }
    let view_key = ctx.local_id(&doc.id);
    if ctx.registry.contains(&view_key) {
        ctx.report
            .push(Warning::IdentityCollision { id: doc.id.clone() });
        return None;
    }

    let molecule = parse_enum::<MoleculeType>(&doc.molecule).unwrap_or_else(|| {
        ctx.report
            .malformed(entry, format!("unknown molecule type '{}'", doc.molecule));
        MoleculeType::default()
    });
    let dataset = if is_valid_id(&doc.dataset_id) {
        let dataset_key = ctx.local_id(&doc.dataset_id);
        ctx.merger
            .dataset_alignment(&mut ctx.registry, &mut ctx.report, &dataset_key, molecule)
    } else {
        ctx.report.malformed(
            entry,
            format!("view '{}' has an invalid dataset ID '{}'", doc.id, doc.dataset_id),
        );
        Alignment::new(molecule).into_ref()
    };

    let mut alignment = Alignment::new(molecule);
    alignment.gap_char = doc.gap_char.chars().next().unwrap_or('-');
    alignment.dataset = Some(Rc::clone(&dataset));
    alignment.properties = doc
        .properties
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
    for seq_doc in &doc.sequences {
        if let Some(seq) = load_view_sequence(ctx, entry, &dataset, seq_doc) {
            alignment.sequences.push(seq);
        }
    }
    let width = alignment.width();
    let alignment = alignment.into_ref();

    let mut auto_rows = Vec::new();
    for annotation in &doc.annotations {
        if let Some(row) =
            load_annotation(ctx, entry, &doc.sequence_set_id, width, annotation, &mut auto_rows)
        {
            alignment.borrow_mut().annotations.push(row);
        }
    }

    for group_doc in &doc.groups {
        if let Some(group) = load_group(ctx, entry, width, group_doc) {
            alignment.borrow_mut().groups.push(group);
            ctx.resolver.drain(&ctx.registry);
        }
    }

    let set_key = ctx.local_id(&doc.sequence_set_id);
    let history = match ctx.registry.history(&set_key) {
        Some(history) => history,
        None => {
            let history = History::with_max_size(ctx.history_limit).into_ref();
            if let Err(warning) = ctx
                .registry
                .register(&set_key, Entity::History(Rc::clone(&history)))
            {
                ctx.report.push(warning);
            }
            history
        }
    };

    let mut view = View::with_history(
        doc.id.clone(),
        doc.sequence_set_id.clone(),
        doc.title.clone(),
        Rc::clone(&alignment),
        history,
    );
    apply_viewport(&mut view.viewport, &doc.viewport);
    view.complement_id = doc.complement_id.clone().filter(|id| !id.is_empty());
    view.gather_views = doc.gather_views;

    let mut links = Vec::new();
    for link_doc in &doc.viewers {
        let Ok(kind) = ViewerKind::from_str(&link_doc.kind) else {
            ctx.report.malformed(
                entry,
                format!("viewer '{}' has unknown kind '{}'", link_doc.id, link_doc.kind),
            );
            continue;
        };
        if !is_valid_id(&link_doc.id) {
            ctx.report
                .malformed(entry, format!("invalid viewer ID '{}'", link_doc.id));
            continue;
        }
        view.viewer_links.push(ViewerLink {
            viewer_id: link_doc.id.clone(),
            kind,
            title: link_doc.title.clone(),
            bindings: Vec::new(),
            inline_state: link_doc.state.clone(),
        });
        links.push(link_doc);
    }

    let view = view.into_ref();
    if let Err(warning) = ctx.registry.register(&view_key, Entity::View(Rc::clone(&view))) {
        ctx.report.push(warning);
        return None;
    }

    for hidden in &doc.viewport.hidden_sequences {
        let target = Rc::clone(&view);
        link(
            ctx,
            &hidden.id,
            "hidden sequence",
            None,
            Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                let Some(seq) = entity.as_sequence() else {
                    return false;
                };
                target.borrow_mut().viewport.hidden_sequences.push(seq);
                true
            }),
        );
    }

    for (index, link_doc) in links.into_iter().enumerate() {
        for mapped in &link_doc.sequences {
            let target = Rc::clone(&view);
            let model = mapped.model.clone();
            let chain = mapped.chain.clone();
            link(
                ctx,
                &mapped.seq,
                "viewer sequence",
                None,
                Box::new(move |entity: &Entity, _: &IdentityRegistry| {
                    let Some(sequence) = entity.as_sequence() else {
                        return false;
                    };
                    if let Some(link) = target.borrow_mut().viewer_links.get_mut(index) {
                        link.bindings.push(SeqBinding {
                            sequence,
                            model: model.clone(),
                            chain: chain.clone(),
                        });
                    }
                    true
                }),
            );
        }
    }

    for auto in auto_rows {
        let Some(mut fresh) = autocalc::regenerate(&auto.calc_id, &alignment.borrow()) else {
            continue;
        };
        let mut row = auto.row.borrow_mut();
        fresh.label = row.label.clone();
        fresh.description = row.description.clone();
        fresh.score = row.score;
        fresh.sequence = row.sequence.take();
        fresh.group = row.group.take();
        fresh.apply_visual_state(&auto.state);
        *row = fresh;
    }

    debug!(
        "reconstructed view {} ({} sequences, {} annotations, {} groups)",
        doc.id,
        alignment.borrow().num_sequences(),
        alignment.borrow().annotations.len(),
        alignment.borrow().groups.len()
    );
    ctx.views.push(Rc::clone(&view));
    Some(view)
}
