//! Loads an archive into a workspace.
//!
//! Entries are read once, in stream order. Views may refer to anything in
//! the archive, so links are recorded as they are met and tied up after the
//! last entry.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::container::{EntryKind, EntryReader, RawEntry, classify};
use super::context::{LoadContext, LoadOptions};
use super::document::{DatasetDoc, ViewDoc, from_xml, root_element};
use super::linker::{CrossViewLinker, LinkSummary};
use super::reconstruct::{load_dataset, reconstruct_view};
use super::registry::IdentityRegistry;
use super::report::{Report, Warning};
use crate::error::{ArchiveError, Result};
use crate::model::{ViewRef, Workspace};

/// The outcome of a load.
#[derive(Debug)]
pub struct LoadedProject {
    pub workspace: Workspace,
    /// The first view read from the archive.
    pub primary: ViewRef,
    pub report: Report,
    pub links: LinkSummary,
    /// Every ID bound during the load, each under its archive ID plus
    /// `id_salt`. Pass it back through [`LoadOptions::registry`] to load
    /// another archive against the same entities.
    pub registry: IdentityRegistry,
    pub id_salt: String,
}

impl LoadedProject {
    /// The registry key this load bound an archive ID under.
    pub fn local_id(&self, id: &str) -> String {
        format!("{id}{}", self.id_salt)
    }
}

/// Load the archive at `path`.
pub fn load(path: &Path, options: LoadOptions) -> Result<LoadedProject> {
    let file = File::open(path)?;
    info!("loading project {}", path.display());
    load_from_reader(BufReader::new(file), options)
}

/// Load an archive from any byte stream.
pub fn load_from_reader<R: Read>(reader: R, options: LoadOptions) -> Result<LoadedProject> {
    let mut ctx = LoadContext::new(options);
    let mut entries = EntryReader::new(reader);
    let count = entries.read_entries(|entry| read_entry(&mut ctx, entry))?;
    debug!("read {count} entries");
    finish(ctx)
}

fn read_entry(ctx: &mut LoadContext, entry: RawEntry) -> Result<()> {
    ctx.check_cancelled()?;
    let RawEntry { name, data } = entry;
    match classify(&name) {
        EntryKind::View | EntryKind::Dataset => read_document(ctx, &name, &data),
        EntryKind::ViewerState { viewer_id } => {
            ctx.viewer_states.structures.insert(viewer_id, data);
        }
        EntryKind::RnaModel { viewer_id, index } => {
            ctx.viewer_states
                .rna
                .entry(viewer_id)
                .or_default()
                .insert(index, data);
        }
        EntryKind::ExternalFile => {
            ctx.external_files.insert(name, data);
        }
        EntryKind::Unknown => debug!("ignoring entry {name}"),
    }
    Ok(())
}

/// Parse an XML entry. The root element decides how it is read; the entry
/// name only says it is XML.
fn read_document(ctx: &mut LoadContext, name: &str, data: &[u8]) {
    let text = match std::str::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            ctx.report.malformed(name, format!("not UTF-8: {e}"));
            return;
        }
    };
    let parsed = match root_element(text) {
        Some("view") => from_xml::<ViewDoc>(name, text).map(|doc| {
            reconstruct_view(ctx, name, &doc);
        }),
        Some("dataset") => from_xml::<DatasetDoc>(name, text).map(|doc| load_dataset(ctx, name, &doc)),
        other => {
            ctx.report.malformed(
                name,
                format!("unexpected root element {}", other.unwrap_or("(none)")),
            );
            Ok(())
        }
    };
    if let Err(e) = parsed {
        ctx.report.malformed(name, e.to_string());
    }
}

fn finish(mut ctx: LoadContext) -> Result<LoadedProject> {
    let resolved = ctx.resolver.drain(&ctx.registry);
    debug!("resolved {resolved} references after the last entry");
    for (id, count) in ctx.resolver.take_unresolved() {
        ctx.report.push(Warning::UnresolvedReference { id, count });
    }
    place_files(&mut ctx);
    let salt = ctx.salt().to_string();
    ctx.report.strip_id_suffix(&salt);

    let Some(primary) = ctx.views.first().cloned() else {
        return Err(ArchiveError::NoViews);
    };

    let mut workspace = Workspace::new();
    for view in ctx.views.drain(..) {
        workspace.add_view(view);
    }
    workspace.external_files = std::mem::take(&mut ctx.external_files);
    let links = CrossViewLinker::new(&ctx.viewer_states).link(&mut workspace, &mut ctx.report);
    info!(
        "loaded {} views in {} windows with {} warnings",
        workspace.views.len(),
        workspace.containers.len(),
        ctx.report.len()
    );
    Ok(LoadedProject {
        workspace,
        primary,
        report: ctx.report,
        links,
        registry: ctx.registry,
        id_salt: salt,
    })
}

/// Write `data` as `name` in `dir` and return the path used.
///
/// A file already there with the same content is reused. One with other
/// content is left alone and the data goes to the first free `N_name`.
fn extract(dir: &Path, name: &str, data: &[u8]) -> io::Result<PathBuf> {
    let Some(file_name) = Path::new(name).file_name().and_then(|n| n.to_str()) else {
        return Err(io::Error::new(ErrorKind::InvalidInput, "entry has no file name"));
    };
    let mut path = dir.join(file_name);
    let mut attempt = 1;
    loop {
        match fs::read(&path) {
            Ok(existing) if existing == data => return Ok(path),
            Ok(_) => {
                path = dir.join(format!("{attempt}_{file_name}"));
                attempt += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::write(&path, data)?;
                debug!("extracted {}", path.display());
                return Ok(path);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Point structure entries at their copied files, extracting them when a
/// directory was given. A file that cannot be extracted stays in memory
/// under its entry name.
fn place_files(ctx: &mut LoadContext) {
    let dir = ctx.extract_dir.clone().filter(|dir| match fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            ctx.report.malformed(
                &dir.to_string_lossy(),
                format!("cannot create extraction directory: {e}"),
            );
            false
        }
    });
    let mut kept = HashSet::new();
    for pending in std::mem::take(&mut ctx.pending_files) {
        let mut seq = pending.sequence.borrow_mut();
        let Some(pdb) = seq.structures.get_mut(pending.structure) else {
            continue;
        };
        let Some(data) = ctx.external_files.get(&pending.entry) else {
            ctx.report.push(Warning::MissingEntry {
                name: pending.entry,
            });
            pdb.file = None;
            continue;
        };
        let Some(dir) = &dir else {
            kept.insert(pending.entry.clone());
            pdb.file = Some(pending.entry);
            continue;
        };
        match extract(dir, &pending.entry, data) {
            Ok(path) => pdb.file = Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                ctx.report
                    .malformed(&pending.entry, format!("cannot extract to {}: {e}", dir.display()));
                kept.insert(pending.entry.clone());
                pdb.file = Some(pending.entry);
            }
        }
    }
    if ctx.extract_dir.is_some() {
        ctx.external_files.retain(|name, _| kept.contains(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::container::{DEFAULT_COMPRESSION, EntryWriter};

    fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = EntryWriter::new(Vec::new(), DEFAULT_COMPRESSION);
        for (name, data) in entries {
            writer.add(name, data.as_bytes()).unwrap();
        }
        writer.finish().unwrap()
    }

    const DATASET: &str = r#"<dataset id="ds1" type="protein">
        <sequence id="sq1" name="p1" start="1" end="3"><residues>MKL</residues></sequence>
    </dataset>"#;

    const VIEW: &str = r#"<view id="V1" sequenceSetId="set1" datasetId="ds1" title="p" type="protein">
        <sequence id="sq2" name="p1" start="1" end="3" dsRef="sq1"><residues>MK-L</residues></sequence>
    </view>"#;

    #[test]
    fn test_empty_archive_has_no_views() {
        let bytes = archive(&[("notes.txt", "hello")]);
        let result = load_from_reader(bytes.as_slice(), LoadOptions::default());
        assert!(matches!(result, Err(ArchiveError::NoViews)));
    }

    #[test]
    fn test_view_read_by_root_element() {
        let bytes = archive(&[("p Dataset for p.xml", DATASET), ("p.xml", VIEW)]);
        let project = load_from_reader(bytes.as_slice(), LoadOptions::default()).unwrap();
        assert!(project.report.is_empty(), "{:?}", project.report);
        assert_eq!(project.primary.borrow().id, "V1");

        // a view stored under a dataset-style name is still read as a view
        let swapped = archive(&[("a.xml", DATASET), ("b Dataset for p.xml", VIEW)]);
        let project = load_from_reader(swapped.as_slice(), LoadOptions::default()).unwrap();
        assert_eq!(project.workspace.views.len(), 1);
    }

    #[test]
    fn test_broken_entry_is_a_warning() {
        let bytes = archive(&[
            ("p Dataset for p.xml", DATASET),
            ("broken.xml", "<view id=\"V0\"><sequence></view>"),
            ("p.xml", VIEW),
        ]);
        let project = load_from_reader(bytes.as_slice(), LoadOptions::default()).unwrap();
        assert_eq!(project.workspace.views.len(), 1);
        assert!(matches!(
            project.report.warnings[0],
            Warning::MalformedEntity { ref entry, .. } if entry == "broken.xml"
        ));
    }

    #[test]
    fn test_missing_structure_file_reported() {
        let dataset = r#"<dataset id="ds1" type="protein">
            <sequence id="sq1" name="p1" start="1" end="3"><residues>MKL</residues>
                <pdb id="1abc" file="/old/1abc.pdb" entry="file_1abc.pdb"/>
            </sequence>
        </dataset>"#;
        let bytes = archive(&[("p Dataset for p.xml", dataset), ("p.xml", VIEW)]);
        let project = load_from_reader(bytes.as_slice(), LoadOptions::default()).unwrap();
        assert_eq!(
            project.report.warnings,
            vec![Warning::MissingEntry {
                name: "file_1abc.pdb".to_string()
            }]
        );
        let view = project.primary.borrow();
        let seq = view.alignment.borrow().sequences[0].clone();
        let ds = seq.borrow().dataset.clone().unwrap();
        assert_eq!(ds.borrow().structures[0].file, None);
    }

    #[test]
    fn test_structure_file_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = r#"<dataset id="ds1" type="protein">
            <sequence id="sq1" name="p1" start="1" end="3"><residues>MKL</residues>
                <pdb id="1abc" entry="file_1abc.pdb"/>
            </sequence>
        </dataset>"#;
        let bytes = archive(&[
            ("p Dataset for p.xml", dataset),
            ("p.xml", VIEW),
            ("file_1abc.pdb", "ATOM"),
        ]);
        let options = LoadOptions {
            extract_dir: Some(dir.path().to_path_buf()),
            ..LoadOptions::default()
        };
        let project = load_from_reader(bytes.as_slice(), options).unwrap();
        assert!(project.report.is_empty());
        assert!(project.workspace.external_files.is_empty());
        let extracted = dir.path().join("file_1abc.pdb");
        assert_eq!(fs::read_to_string(&extracted).unwrap(), "ATOM");
    }

    fn structure_file(project: &LoadedProject) -> Option<String> {
        let view = project.primary.borrow();
        let seq = view.alignment.borrow().sequences[0].clone();
        let ds = seq.borrow().dataset.clone().unwrap();
        ds.borrow().structures[0].file.clone()
    }

    const PDB_DATASET: &str = r#"<dataset id="ds1" type="protein">
        <sequence id="sq1" name="p1" start="1" end="3"><residues>MKL</residues>
            <pdb id="1abc" entry="file_1abc.pdb"/>
        </sequence>
    </dataset>"#;

    #[test]
    fn test_extraction_keeps_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("file_1abc.pdb");
        fs::write(&existing, "HETATM").unwrap();
        let bytes = archive(&[
            ("p Dataset for p.xml", PDB_DATASET),
            ("p.xml", VIEW),
            ("file_1abc.pdb", "ATOM"),
        ]);
        let options = LoadOptions {
            extract_dir: Some(dir.path().to_path_buf()),
            ..LoadOptions::default()
        };
        let project = load_from_reader(bytes.as_slice(), options).unwrap();
        assert!(project.report.is_empty(), "{:?}", project.report);
        assert_eq!(fs::read_to_string(&existing).unwrap(), "HETATM");
        let placed = PathBuf::from(structure_file(&project).unwrap());
        assert_eq!(placed, dir.path().join("1_file_1abc.pdb"));
        assert_eq!(fs::read_to_string(&placed).unwrap(), "ATOM");

        // The same content again reuses the extracted copy.
        let options = LoadOptions {
            extract_dir: Some(dir.path().to_path_buf()),
            ..LoadOptions::default()
        };
        let again = load_from_reader(bytes.as_slice(), options).unwrap();
        assert_eq!(structure_file(&again).map(PathBuf::from), Some(placed));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_failed_extraction_keeps_file_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "").unwrap();
        let bytes = archive(&[
            ("p Dataset for p.xml", PDB_DATASET),
            ("p.xml", VIEW),
            ("file_1abc.pdb", "ATOM"),
        ]);
        let options = LoadOptions {
            extract_dir: Some(blocker.join("pdb")),
            ..LoadOptions::default()
        };
        let project = load_from_reader(bytes.as_slice(), options).unwrap();
        assert_eq!(project.report.len(), 1);
        assert!(matches!(project.report.warnings[0], Warning::MalformedEntity { .. }));
        assert_eq!(structure_file(&project).as_deref(), Some("file_1abc.pdb"));
        assert_eq!(
            project.workspace.external_files.get("file_1abc.pdb").map(Vec::as_slice),
            Some(b"ATOM".as_slice())
        );
    }
}
