//! Loading hand-built archives: entry order, forward references, merging
//! and cross-view joins.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use aform_project::archive::container::{DEFAULT_COMPRESSION, EntryWriter, ViewerStates};
use aform_project::archive::{
    CrossViewLinker, Entity, IdentityRegistry, LoadOptions, LoadedProject, Warning, load,
    load_from_reader,
};
use aform_project::error::ArchiveError;
use aform_project::model::{Container, Sequence};

fn archive(entries: &[(&str, String)]) -> Vec<u8> {
    let mut writer = EntryWriter::new(Vec::new(), DEFAULT_COMPRESSION);
    for (name, data) in entries {
        writer.add(name, data.as_bytes()).unwrap();
    }
    writer.finish().unwrap()
}

fn load_bytes(bytes: &[u8]) -> LoadedProject {
    load_from_reader(bytes, LoadOptions::default()).unwrap()
}

/// A view entry. Each sequence is `(id, dataset id, residues)`.
fn view_xml(
    id: &str,
    set: &str,
    dataset: &str,
    molecule: &str,
    extra: &str,
    seqs: &[(&str, &str, &str)],
) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<view version="1" id="{id}" sequenceSetId="{set}" datasetId="{dataset}" title="{id}" type="{molecule}" {extra}>"#
    );
    for (seq_id, ds_ref, residues) in seqs {
        let end = residues.chars().filter(|c| *c != '-').count();
        xml.push_str(&format!(
            r#"<sequence id="{seq_id}" name="{seq_id}" start="1" end="{end}" dsRef="{ds_ref}"><residues>{residues}</residues></sequence>"#
        ));
    }
    xml.push_str("</view>");
    xml
}

fn dataset_with_mapping(id: &str, target: &str) -> String {
    format!(
        r#"<dataset version="1" id="{id}" type="nucleotide">
  <sequence id="sq1" name="cds1" start="1" end="9">
    <residues>ATGAAACTG</residues>
    <dbRef source="EMBLCDS" accession="X1">
      <mapping to="{target}" fromRatio="3" toRatio="1">
        <mapFrom start="1" end="9"/>
        <mapTo start="1" end="3"/>
      </mapping>
    </dbRef>
  </sequence>
</dataset>"#
    )
}

#[test]
fn test_mapping_resolves_to_later_sequence() {
    let protein = r#"<dataset version="1" id="ds2" type="protein">
  <sequence id="sq9" name="prot1" start="1" end="3"><residues>MKL</residues></sequence>
</dataset>"#;
    let bytes = archive(&[
        ("p Dataset for cds.xml", dataset_with_mapping("ds1", "sq9")),
        (
            "p.xml",
            view_xml("V1", "set1", "ds1", "nucleotide", "", &[("sq2", "sq1", "ATGAAACTG")]),
        ),
        ("p Dataset for prot.xml", protein.to_string()),
    ]);
    let project = load_bytes(&bytes);
    assert!(project.report.is_empty(), "{}", project.report.summary());

    let cds = project.registry.sequence(&project.local_id("sq1")).unwrap();
    let prot = project.registry.sequence(&project.local_id("sq9")).unwrap();
    let cds = cds.borrow();
    let target = cds.db_refs[0].map.as_ref().unwrap().to.as_ref().unwrap();
    assert!(Rc::ptr_eq(target, &prot));
}

#[test]
fn test_missing_mapping_target_is_reported() {
    let bytes = archive(&[
        ("p Dataset for cds.xml", dataset_with_mapping("ds1", "sqX")),
        (
            "p.xml",
            view_xml("V1", "set1", "ds1", "nucleotide", "", &[("sq2", "sq1", "ATGAAACTG")]),
        ),
    ]);
    let project = load_bytes(&bytes);
    assert_eq!(project.report.unresolved_ids(), vec!["sqX"]);

    // the rest of the view is intact and the mapping is left without a target
    let view = project.primary.borrow();
    assert_eq!(view.alignment.borrow().sequences[0].borrow().data(), "ATGAAACTG");
    let cds = project.registry.sequence(&project.local_id("sq1")).unwrap();
    assert!(cds.borrow().db_refs[0].map.as_ref().unwrap().to.is_none());
}

fn split_entries(protein_first: bool) -> Vec<(&'static str, String)> {
    let protein = (
        "prot.xml",
        view_xml("V1", "setP", "dsP", "protein", r#"complementId="V2""#, &[("sq1", "sq2", "MKL")]),
    );
    let dna = (
        "dna.xml",
        view_xml("V2", "setD", "dsD", "nucleotide", "", &[("sq3", "sq4", "ATGAAACTG")]),
    );
    if protein_first {
        vec![protein, dna]
    } else {
        vec![dna, protein]
    }
}

#[test]
fn test_split_pair_in_either_order() {
    for protein_first in [true, false] {
        let project = load_bytes(&archive(&split_entries(protein_first)));
        assert!(project.report.is_empty(), "{}", project.report.summary());
        assert_eq!(
            project.workspace.containers,
            vec![Container::Split {
                nucleotide: "V2".to_string(),
                protein: "V1".to_string(),
            }]
        );
        let protein = project.workspace.view("V1").unwrap();
        assert_eq!(protein.borrow().split_partner.as_deref(), Some("V2"));
    }
}

#[test]
fn test_missing_complement_opens_standalone() {
    let bytes = archive(&[(
        "prot.xml",
        view_xml("V1", "setP", "dsP", "protein", r#"complementId="V9""#, &[("sq1", "sq2", "MKL")]),
    )]);
    let project = load_bytes(&bytes);
    assert_eq!(
        project.report.warnings,
        vec![Warning::SplitPairing {
            view: "V1".to_string(),
            complement: "V9".to_string(),
        }]
    );
    assert_eq!(
        project.workspace.containers,
        vec![Container::Standalone {
            view: "V1".to_string()
        }]
    );
}

#[test]
fn test_linking_twice_changes_nothing() {
    let mut entries = split_entries(true);
    entries.push((
        "1tabs.xml",
        view_xml("V3", "setT", "dsT", "protein", r#"gatherViews="true""#, &[("sq5", "sq6", "MKV")]),
    ));
    entries.push((
        "2tabs.xml",
        view_xml("V4", "setT", "dsT", "protein", r#"gatherViews="true""#, &[("sq7", "sq6", "MKV")]),
    ));
    let mut project = load_bytes(&archive(&entries));
    assert_eq!(project.links.paired, 1);
    assert_eq!(project.workspace.containers.len(), 2);

    let before = project.workspace.containers.clone();
    let states = ViewerStates::new();
    let summary = CrossViewLinker::new(&states).link(&mut project.workspace, &mut project.report);
    assert!(summary.is_noop(), "{summary:?}");
    assert_eq!(project.workspace.containers, before);
}

#[test]
fn test_dataset_sequence_extended_never_truncated() {
    for (first, second) in [("ACDE", "ACDEFG"), ("ACDEFG", "ACDE")] {
        let bytes = archive(&[
            ("a.xml", view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", first)])),
            ("b.xml", view_xml("V2", "set2", "ds1", "protein", "", &[("sq2", "sqA", second)])),
        ]);
        let project = load_bytes(&bytes);
        assert!(project.report.is_empty(), "{}", project.report.summary());
        let merged = project.registry.sequence(&project.local_id("sqA")).unwrap();
        assert_eq!(merged.borrow().data(), "ACDEFG");
        assert_eq!(merged.borrow().end, 6);
    }
}

#[test]
fn test_conflicting_versions_keep_existing() {
    let bytes = archive(&[
        ("a.xml", view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "ACDE")])),
        ("b.xml", view_xml("V2", "set2", "ds1", "protein", "", &[("sq2", "sqA", "WWWWW")])),
    ]);
    let project = load_bytes(&bytes);
    assert!(project.report.has_data_loss());
    assert!(matches!(
        project.report.warnings[0],
        Warning::MergeConflict { ref id, existing: 4, incoming: 5 } if id == "sqA"
    ));
    let kept = project.registry.sequence(&project.local_id("sqA")).unwrap();
    assert_eq!(kept.borrow().data(), "ACDE");
    // both views still load
    assert_eq!(project.workspace.views.len(), 2);
}

#[test]
fn test_one_dataset_sequence_per_identity() {
    let bytes = archive(&[
        ("a.xml", view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "MK-L")])),
        ("b.xml", view_xml("V2", "set1", "ds1", "protein", "", &[("sq2", "sqA", "M-KL")])),
    ]);
    let project = load_bytes(&bytes);
    let v1 = project.workspace.view("V1").unwrap();
    let v2 = project.workspace.view("V2").unwrap();
    let s1 = Rc::clone(&v1.borrow().alignment.borrow().sequences[0]);
    let s2 = Rc::clone(&v2.borrow().alignment.borrow().sequences[0]);
    assert!(!Rc::ptr_eq(&s1, &s2));
    assert!(Rc::ptr_eq(
        s1.borrow().dataset.as_ref().unwrap(),
        s2.borrow().dataset.as_ref().unwrap()
    ));

    let dataset = project.registry.alignment(&project.local_id("ds1")).unwrap();
    assert_eq!(dataset.borrow().num_sequences(), 1);
    assert!(v1.borrow().shares_history_with(&v2.borrow()));
}

#[test]
fn test_skipped_sequence_set_not_loaded() {
    let bytes = archive(&[
        ("a.xml", view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "MKL")])),
        ("b.xml", view_xml("V2", "set2", "ds2", "protein", "", &[("sq2", "sqB", "MKV")])),
    ]);
    let options = LoadOptions {
        skip: HashSet::from(["set1".to_string()]),
        ..LoadOptions::default()
    };
    let project = load_from_reader(bytes.as_slice(), options).unwrap();
    assert_eq!(project.workspace.views.len(), 1);
    assert_eq!(project.primary.borrow().id, "V2");
    assert!(project.registry.sequence(&project.local_id("sqA")).is_none());

    let options = LoadOptions {
        skip: HashSet::from(["set1".to_string(), "set2".to_string()]),
        ..LoadOptions::default()
    };
    let result = load_from_reader(bytes.as_slice(), options);
    assert!(matches!(result, Err(ArchiveError::NoViews)));
}

#[test]
fn test_missing_viewer_state_skips_binding() {
    let xml = view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "MKL")]).replace(
        "</view>",
        r#"<viewer id="vr1" kind="structure"><seqMap seq="sq1" model="1abc" chain="A"/></viewer></view>"#,
    );
    let project = load_bytes(&archive(&[("a.xml", xml)]));
    assert_eq!(
        project.report.warnings,
        vec![Warning::MissingEntry {
            name: "viewer_vr1".to_string()
        }]
    );
    assert!(project.workspace.viewers.is_empty());
    assert!(project.primary.borrow().viewer_links.is_empty());
}

#[test]
fn test_cancelled_load() {
    let bytes = archive(&[(
        "a.xml",
        view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "MKL")]),
    )]);
    let options = LoadOptions {
        cancel: Some(Arc::new(AtomicBool::new(true))),
        ..LoadOptions::default()
    };
    let result = load_from_reader(bytes.as_slice(), options);
    assert!(matches!(result, Err(ArchiveError::Cancelled)));
}

#[test]
fn test_unreadable_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.aproj");
    std::fs::write(&path, b"not an archive").unwrap();
    assert!(matches!(
        load(&path, LoadOptions::default()),
        Err(ArchiveError::Io(_))
    ));
}

#[test]
fn test_out_of_range_coordinates_are_dropped() {
    let dataset = r#"<dataset version="1" id="ds1" type="protein">
  <sequence id="sqA" name="p1" start="1" end="3">
    <residues>MKL</residues>
    <dbRef source="UNIPROT" accession="P1">
      <mapping to="sqA" fromRatio="1" toRatio="1">
        <mapFrom start="-9223372036854775808" end="9223372036854775807"/>
        <mapTo start="1" end="3"/>
      </mapping>
    </dbRef>
  </sequence>
</dataset>"#;
    let view = view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "MKL")]).replace(
        "</view>",
        r#"<annotation id="an1" label="Scores">
  <element position="1" value="0.5"/>
  <element position="18446744073709551615" value="1"/>
</annotation>
<group id="gr1" name="ok" start="0" end="2"/>
<group id="gr2" name="wide" start="1" end="3"/>
</view>"#,
    );
    let project = load_bytes(&archive(&[
        ("p Dataset for p.xml", dataset.to_string()),
        ("p.xml", view),
    ]));

    assert_eq!(project.report.len(), 3, "{}", project.report.summary());
    assert!(
        project
            .report
            .warnings
            .iter()
            .all(|w| matches!(w, Warning::MalformedEntity { .. }))
    );
    assert!(project.report.unresolved_ids().is_empty());

    let view = project.primary.borrow();
    let alignment = view.alignment.borrow();
    assert_eq!(alignment.annotations[0].borrow().elements.len(), 2);
    assert_eq!(alignment.groups.len(), 1);
    assert_eq!(alignment.groups[0].borrow().name, "ok");
    let dataset_seq = project.registry.sequence(&project.local_id("sqA")).unwrap();
    assert!(dataset_seq.borrow().db_refs[0].map.is_none());
}

#[test]
fn test_second_load_against_first_registry() {
    let bytes = archive(&[
        ("a.xml", view_xml("V1", "set1", "ds1", "protein", "", &[("sq1", "sqA", "MK-L")])),
        ("b.xml", view_xml("V2", "set1", "ds1", "protein", "", &[("sq2", "sqA", "M-KL")])),
    ]);
    let first = load_bytes(&bytes);
    let first_key = first.local_id("sqA");
    let first_view = Rc::clone(&first.primary);

    let options = LoadOptions {
        registry: Some(first.registry),
        ..LoadOptions::default()
    };
    let second = load_from_reader(bytes.as_slice(), options).unwrap();
    assert!(second.report.is_empty(), "{}", second.report.summary());
    assert_eq!(second.workspace.views.len(), 2);
    assert_eq!(second.primary.borrow().id, "V1");

    // Both loads stay bound, each to its own entities.
    let second_key = second.local_id("sqA");
    assert_ne!(first_key, second_key);
    let old = second.registry.sequence(&first_key).unwrap();
    let new = second.registry.sequence(&second_key).unwrap();
    assert!(!Rc::ptr_eq(&old, &new));
    assert!(!second.primary.borrow().shares_history_with(&first_view.borrow()));
    let v2 = second.workspace.view("V2").unwrap();
    assert!(second.primary.borrow().shares_history_with(&v2.borrow()));
}

#[test]
fn test_reference_into_starting_registry_resolves() {
    let mut registry = IdentityRegistry::with_salt("");
    let protein = Sequence::new("prot1", "MKL", 1, 3).into_ref();
    registry
        .register("ext9", Entity::Sequence(Rc::clone(&protein)))
        .unwrap();
    let bytes = archive(&[
        ("p Dataset for cds.xml", dataset_with_mapping("ds1", "ext9")),
        (
            "p.xml",
            view_xml("V1", "set1", "ds1", "nucleotide", "", &[("sq2", "sq1", "ATGAAACTG")]),
        ),
    ]);
    let options = LoadOptions {
        registry: Some(registry),
        ..LoadOptions::default()
    };
    let project = load_from_reader(bytes.as_slice(), options).unwrap();
    assert!(project.report.is_empty(), "{}", project.report.summary());
    let cds = project.registry.sequence(&project.local_id("sq1")).unwrap();
    let cds = cds.borrow();
    let target = cds.db_refs[0].map.as_ref().unwrap().to.as_ref().unwrap();
    assert!(Rc::ptr_eq(target, &protein));
}
