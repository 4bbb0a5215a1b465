//! Stockholm format parser.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::rc::Rc;

use indexmap::IndexMap;

use super::{ParseError, SS_CONS_LABEL};
use crate::model::sequence::{derive_dataset, is_gap};
use crate::model::{
    Alignment, AnnotationElement, AnnotationRow, MoleculeType, PdbEntry, SeqRef, Sequence,
};

/// Split `name/start-end` into its parts. Names without a valid range keep
/// the whole ID.
pub fn split_name(id: &str) -> (&str, Option<(usize, usize)>) {
    if let Some((name, range)) = id.rsplit_once('/')
        && let Some((start, end)) = range.split_once('-')
        && let (Ok(start), Ok(end)) = (start.parse(), end.parse())
    {
        return (name, Some((start, end)));
    }
    (id, None)
}

/// Guess the molecule type from the residues.
fn guess_molecule<'a>(residues: impl Iterator<Item = &'a str>) -> MoleculeType {
    let mut seen = false;
    for data in residues {
        for c in data.chars().filter(|c| !is_gap(*c)) {
            seen = true;
            if !"ACGTUN".contains(c.to_ascii_uppercase()) {
                return MoleculeType::Protein;
            }
        }
    }
    if seen {
        MoleculeType::Nucleotide
    } else {
        MoleculeType::Protein
    }
}

/// A row of per-column characters. Gap characters leave the column empty.
fn column_row(label: &str, data: &str, secondary_structure: bool) -> AnnotationRow {
    let mut row = AnnotationRow::new(label);
    row.elements = data
        .chars()
        .map(|c| {
            if is_gap(c) {
                return None;
            }
            Some(AnnotationElement {
                display_char: Some(c.to_string()),
                secondary_structure: secondary_structure.then_some(c),
                ..AnnotationElement::default()
            })
        })
        .collect();
    row
}

/// Parse a Stockholm format alignment from a reader.
///
/// `#=GF` lines become alignment properties, `#=GC` and `#=GR` lines become
/// annotation rows, and `#=GS DE` and `#=GS DR PDB` lines are attached to
/// the sequences. Every sequence is given a dataset sequence.
pub fn parse<R: Read>(reader: R) -> Result<Alignment, ParseError> {
    let buf_reader = BufReader::new(reader);
    let mut lines = buf_reader.lines();

    let header = lines.next().ok_or(ParseError::UnexpectedEof)??;
    if !header.starts_with("# STOCKHOLM") {
        return Err(ParseError::InvalidHeader);
    }

    let mut properties: IndexMap<String, String> = IndexMap::new();
    // blocked format: sequence data accumulates across blocks
    let mut seq_data: IndexMap<String, String> = IndexMap::new();
    let mut descriptions: HashMap<String, String> = HashMap::new();
    let mut structures: HashMap<String, Vec<PdbEntry>> = HashMap::new();
    let mut gc_data: IndexMap<String, String> = IndexMap::new();
    let mut gr_data: IndexMap<(String, String), String> = IndexMap::new();

    for line_result in lines {
        let line = line_result?;
        if line.is_empty() {
            continue;
        }
        if line.starts_with("//") {
            break;
        }
        if line.starts_with('#') && !line.starts_with("#=") {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#=GF") {
            let mut parts = rest.trim().splitn(2, char::is_whitespace);
            let Some(tag) = parts.next().filter(|t| !t.is_empty()) else {
                continue;
            };
            let value = parts.next().unwrap_or("").trim();
            // repeated tags keep every line
            properties
                .entry(tag.to_string())
                .and_modify(|v| {
                    v.push('\n');
                    v.push_str(value);
                })
                .or_insert_with(|| value.to_string());
            continue;
        }

        if let Some(rest) = line.strip_prefix("#=GS") {
            let parts: Vec<&str> = rest.trim().splitn(3, char::is_whitespace).collect();
            if parts.len() < 3 {
                continue;
            }
            let (seqid, tag, value) = (parts[0], parts[1], parts[2].trim());
            match tag {
                "DE" => {
                    descriptions
                        .entry(seqid.to_string())
                        .and_modify(|d| {
                            d.push(' ');
                            d.push_str(value);
                        })
                        .or_insert_with(|| value.to_string());
                }
                "DR" => {
                    // DR PDB; 1abc A; 1-50;
                    let fields: Vec<&str> = value.split(';').map(str::trim).collect();
                    if fields.first() == Some(&"PDB")
                        && let Some(structure) = fields.get(1)
                    {
                        let mut words = structure.split_whitespace();
                        if let Some(id) = words.next() {
                            structures.entry(seqid.to_string()).or_default().push(PdbEntry {
                                id: id.to_string(),
                                file: None,
                                chain: words.next().map(str::to_string),
                            });
                        }
                    }
                }
                _ => {}
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("#=GC") {
            let parts: Vec<&str> = rest.trim().splitn(2, char::is_whitespace).collect();
            if parts.len() >= 2 {
                let data = parts[1].trim();
                gc_data
                    .entry(parts[0].to_string())
                    .and_modify(|s| s.push_str(data))
                    .or_insert_with(|| data.to_string());
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("#=GR") {
            let parts: Vec<&str> = rest.trim().splitn(3, char::is_whitespace).collect();
            if parts.len() >= 3 {
                let data = parts[2].trim();
                gr_data
                    .entry((parts[0].to_string(), parts[1].to_string()))
                    .and_modify(|s| s.push_str(data))
                    .or_insert_with(|| data.to_string());
            }
            continue;
        }

        let parts: Vec<&str> = line.trim().splitn(2, char::is_whitespace).collect();
        if parts.len() < 2 {
            return Err(ParseError::InvalidLine(line));
        }
        let data = parts[1].trim().replace(' ', "");
        seq_data
            .entry(parts[0].to_string())
            .and_modify(|s| s.push_str(&data))
            .or_insert(data);
    }

    let width = seq_data.values().next().map(|d| d.chars().count());
    if let Some(width) = width
        && (seq_data.values().any(|d| d.chars().count() != width)
            || gc_data.values().any(|d| d.chars().count() != width))
    {
        return Err(ParseError::InconsistentLengths);
    }

    let molecule = guess_molecule(seq_data.values().map(String::as_str));
    let mut alignment = Alignment::new(molecule);
    alignment.properties = properties;

    let mut dataset = Alignment::new(molecule);
    let mut by_id: HashMap<String, SeqRef> = HashMap::new();
    for (seqid, data) in seq_data {
        let (name, range) = split_name(&seqid);
        let mut seq = match range {
            Some((start, end)) => Sequence::new(name, data, start, end),
            None => Sequence::from_residues(name, data),
        };
        seq.description = descriptions.remove(&seqid);
        let seq = seq.into_ref();
        let ds_seq = derive_dataset(&seq);
        if let Some(entries) = structures.remove(&seqid) {
            ds_seq.borrow_mut().structures = entries;
        }
        dataset.sequences.push(ds_seq);
        alignment.sequences.push(Rc::clone(&seq));
        by_id.insert(seqid, seq);
    }

    for (tag, data) in gc_data {
        let row = if tag == "SS_cons" {
            column_row(SS_CONS_LABEL, &data, true)
        } else {
            column_row(&tag, &data, false)
        };
        alignment.annotations.push(row.into_ref());
    }

    for ((seqid, tag), data) in gr_data {
        let Some(seq) = by_id.get(&seqid) else {
            continue;
        };
        let mut row = column_row(&tag, &data, tag == "SS");
        row.sequence = Some(Rc::clone(seq));
        alignment.annotations.push(row.into_ref());
    }

    alignment.dataset = Some(dataset.into_ref());
    Ok(alignment)
}

/// Parse a Stockholm alignment from a string.
pub fn parse_str(s: &str) -> Result<Alignment, ParseError> {
    parse(s.as_bytes())
}

/// Parse a Stockholm alignment from a file path.
pub fn parse_file(path: &std::path::Path) -> Result<Alignment, ParseError> {
    let file = std::fs::File::open(path)?;
    parse(file)
}
