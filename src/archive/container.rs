//! The archive container: a gzip-compressed tar stream of named entries.
//!
//! Entries are read strictly forward, once. Nothing here knows what an
//! entry contains beyond the naming convention.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use indexmap::IndexMap;
use log::debug;
use tar::{Archive, Builder, Header};

use crate::error::{ArchiveError, Result};

pub const DATASET_MARKER: &str = " Dataset for ";
pub const VIEWER_PREFIX: &str = "viewer_";
pub const RNA_PREFIX: &str = "rna_";
pub const FILE_PREFIX: &str = "file_";

/// Default gzip level.
pub const DEFAULT_COMPRESSION: u32 = 6;

/// What an entry holds, judged from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    View,
    Dataset,
    /// Opaque structure viewer session.
    ViewerState { viewer_id: String },
    /// One RNA sub-view state.
    RnaModel { viewer_id: String, index: usize },
    /// A copied external file, such as a coordinate file.
    ExternalFile,
    Unknown,
}

/// Classify an entry by its name.
pub fn classify(name: &str) -> EntryKind {
    if let Some(id) = name.strip_prefix(VIEWER_PREFIX) {
        return EntryKind::ViewerState {
            viewer_id: id.to_string(),
        };
    }
    if let Some(rest) = name.strip_prefix(RNA_PREFIX)
        && let Some((id, index)) = rest.rsplit_once('_')
        && let Ok(index) = index.parse()
    {
        return EntryKind::RnaModel {
            viewer_id: id.to_string(),
            index,
        };
    }
    if name.starts_with(FILE_PREFIX) {
        return EntryKind::ExternalFile;
    }
    if name.ends_with(".xml") {
        if name.contains(DATASET_MARKER) {
            return EntryKind::Dataset;
        }
        return EntryKind::View;
    }
    EntryKind::Unknown
}

/// Make a string safe to use inside an entry name.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn viewer_entry(viewer_id: &str) -> String {
    format!("{VIEWER_PREFIX}{}", sanitize(viewer_id))
}

pub fn rna_entry(viewer_id: &str, index: usize) -> String {
    format!("{RNA_PREFIX}{}_{index}", sanitize(viewer_id))
}

pub fn file_entry(source: &str) -> String {
    if source.starts_with(FILE_PREFIX) {
        return sanitize(source);
    }
    format!("{FILE_PREFIX}{}", sanitize(source))
}

/// Entry name of a view; `index` is its position when its window holds
/// several views.
pub fn view_entry(short_name: &str, index: Option<usize>) -> String {
    let mut short = sanitize(short_name);
    if [VIEWER_PREFIX, RNA_PREFIX, FILE_PREFIX]
        .iter()
        .any(|prefix| short.starts_with(prefix))
    {
        short.insert_str(0, "view ");
    }
    match index {
        Some(index) => format!("{index}{short}.xml"),
        None => format!("{short}.xml"),
    }
}

pub fn dataset_entry(short_name: &str, title: &str) -> String {
    format!("{}{DATASET_MARKER}{}.xml", sanitize(short_name), sanitize(title))
}

/// One entry, fully buffered.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: String,
    pub data: Vec<u8>,
}

/// Buffer `size` bytes from `reader`, failing cleanly if the allocation
/// cannot be made.
pub(crate) fn buffer_entry(name: &str, size: u64, mut reader: impl Read) -> Result<Vec<u8>> {
    let out_of_memory = || ArchiveError::OutOfMemory {
        entry: name.to_string(),
        size,
    };
    let len = usize::try_from(size).map_err(|_| out_of_memory())?;
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| out_of_memory())?;
    reader.read_to_end(&mut data)?;
    Ok(data)
}

/// Forward-only reader over the entries of a container.
pub struct EntryReader<R: Read> {
    archive: Archive<GzDecoder<R>>,
}

impl<R: Read> EntryReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            archive: Archive::new(GzDecoder::new(reader)),
        }
    }

    /// Visit every entry in stream order. The visitor may stop the pass by
    /// returning an error. Returns the number of entries visited.
    pub fn read_entries(&mut self, mut visit: impl FnMut(RawEntry) -> Result<()>) -> Result<usize> {
        let mut count = 0;
        for entry in self.archive.entries()? {
            let entry = entry?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path()?.to_string_lossy().into_owned();
            let size = entry.header().size()?;
            debug!("reading entry {name} ({size} bytes)");
            let data = buffer_entry(&name, size, entry)?;
            visit(RawEntry { name, data })?;
            count += 1;
        }
        Ok(count)
    }
}

/// Writer of a container. Entry names are unique; a repeated name is
/// refused.
pub struct EntryWriter<W: Write> {
    builder: Builder<GzEncoder<W>>,
    names: HashSet<String>,
}

impl<W: Write> EntryWriter<W> {
    pub fn new(writer: W, level: u32) -> Self {
        let encoder = GzEncoder::new(writer, Compression::new(level.min(9)));
        Self {
            builder: Builder::new(encoder),
            names: HashSet::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// A name not yet used, derived from `name` by prefixing a counter.
    pub fn unique_name(&self, name: &str) -> String {
        if !self.contains(name) {
            return name.to_string();
        }
        (1..)
            .map(|n| format!("{n}{name}"))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    /// Append an entry. Returns false if the name was already written.
    pub fn add(&mut self, name: &str, data: &[u8]) -> Result<bool> {
        if !self.names.insert(name.to_string()) {
            return Ok(false);
        }
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_cksum();
        self.builder.append_data(&mut header, name, data)?;
        debug!("wrote entry {name} ({} bytes)", data.len());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Finish the tar stream and the gzip stream, returning the writer.
    pub fn finish(self) -> Result<W> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// Viewer payloads found in a container, held until every view is read.
#[derive(Debug, Clone, Default)]
pub struct ViewerStates {
    pub structures: IndexMap<String, Vec<u8>>,
    /// RNA sub-view states per viewer, ordered by index.
    pub rna: IndexMap<String, BTreeMap<usize, Vec<u8>>>,
}

impl ViewerStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty() && self.rna.is_empty()
    }
}
