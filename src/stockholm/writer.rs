//! Stockholm format writer.

use std::io::{Result, Write};
use std::rc::Rc;

use super::SS_CONS_LABEL;
use crate::model::{AnnotationRow, SeqRef, View};

fn stockholm_id(seq: &SeqRef) -> String {
    let s = seq.borrow();
    format!("{}/{}-{}", s.name, s.start, s.end)
}

/// Tag for a row label; Stockholm tags cannot contain whitespace.
fn tag(row: &AnnotationRow) -> String {
    if row.label == SS_CONS_LABEL {
        return "SS_cons".to_string();
    }
    row.label.split_whitespace().collect::<Vec<_>>().join("_")
}

/// One character per column; empty columns are written as `.`.
fn row_data(row: &AnnotationRow, width: usize) -> String {
    (0..width)
        .map(|col| {
            row.elements
                .get(col)
                .and_then(Option::as_ref)
                .and_then(|e| {
                    e.secondary_structure
                        .or_else(|| e.display_char.as_ref().and_then(|d| d.chars().next()))
                })
                .unwrap_or('.')
        })
        .collect()
}

/// Write a view's alignment as Stockholm. Auto-calculated rows are left out.
pub fn write<W: Write>(view: &View, mut writer: W) -> Result<()> {
    let alignment = view.alignment.borrow();
    let width = alignment.width();

    writeln!(writer, "# STOCKHOLM 1.0")?;

    for (tag, value) in &alignment.properties {
        for line in value.split('\n') {
            writeln!(writer, "#=GF {tag} {line}")?;
        }
    }
    if !alignment.properties.is_empty() {
        writeln!(writer)?;
    }

    let ids: Vec<String> = alignment.sequences.iter().map(stockholm_id).collect();
    let padding = ids.iter().map(String::len).max().unwrap_or(0).max(10);

    let mut wrote_gs = false;
    for (seq, id) in alignment.sequences.iter().zip(&ids) {
        let s = seq.borrow();
        if let Some(description) = &s.description {
            writeln!(writer, "#=GS {id:padding$} DE {description}")?;
            wrote_gs = true;
        }
        if let Some(ds) = &s.dataset {
            for pdb in &ds.borrow().structures {
                match &pdb.chain {
                    Some(chain) => writeln!(writer, "#=GS {id:padding$} DR PDB; {} {chain};", pdb.id)?,
                    None => writeln!(writer, "#=GS {id:padding$} DR PDB; {};", pdb.id)?,
                }
                wrote_gs = true;
            }
        }
    }
    if wrote_gs {
        writeln!(writer)?;
    }

    let rows: Vec<_> = alignment
        .annotations
        .iter()
        .filter(|row| !row.borrow().auto_calculated)
        .collect();

    for (seq, id) in alignment.sequences.iter().zip(&ids) {
        writeln!(writer, "{id:padding$} {}", seq.borrow().data())?;
        for row in &rows {
            let row = row.borrow();
            if row.sequence.as_ref().is_some_and(|s| Rc::ptr_eq(s, seq)) {
                writeln!(writer, "#=GR {id:padding$} {} {}", tag(&row), row_data(&row, width))?;
            }
        }
    }

    for row in &rows {
        let row = row.borrow();
        if row.sequence.is_none() {
            writeln!(writer, "#=GC {:padding$} {}", tag(&row), row_data(&row, width))?;
        }
    }

    writeln!(writer, "//")?;
    Ok(())
}

/// Write a view as Stockholm to a string.
pub fn write_string(view: &View) -> Result<String> {
    let mut buffer = Vec::new();
    write(view, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).to_string())
}

/// Write a view as Stockholm to a file.
pub fn write_file(view: &View, path: &std::path::Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write(view, std::io::BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::autocalc;
    use crate::stockholm::parser;

    #[test]
    fn test_roundtrip() {
        let input = r#"# STOCKHOLM 1.0
#=GF AC RF00001
#=GF ID 5S_rRNA

#=GS seq1/1-8 DE first copy
seq1/1-8   ACGU..ACGU
seq2/1-8   ACGU..ACGU
#=GC SS_cons   <<<<..>>>>
//
"#;

        let alignment = parser::parse_str(input).unwrap();
        let view = View::new("V1", "S1", "5S", alignment.into_ref());
        let output = write_string(&view).unwrap();
        assert!(output.contains("#=GS seq1/1-8"));

        let reparsed = parser::parse_str(&output).unwrap();
        let original = view.alignment.borrow();
        assert_eq!(original.num_sequences(), reparsed.num_sequences());
        assert_eq!(
            original.sequences[0].borrow().data(),
            reparsed.sequences[0].borrow().data()
        );
        assert_eq!(reparsed.properties, original.properties);
        let ss = |a: &crate::model::Alignment| {
            a.annotations
                .iter()
                .find(|r| r.borrow().label == SS_CONS_LABEL)
                .map(|r| row_data(&r.borrow(), 10))
        };
        assert_eq!(ss(&original), Some("<<<<..>>>>".to_string()));
        assert_eq!(ss(&reparsed), ss(&original));
    }

    #[test]
    fn test_auto_rows_not_written() {
        let alignment = parser::parse_str("# STOCKHOLM 1.0\nseq1 MKLV\nseq2 MKLI\n//\n").unwrap();
        let row = autocalc::regenerate(autocalc::CONSENSUS, &alignment).unwrap();
        let alignment = alignment.into_ref();
        alignment.borrow_mut().annotations.push(row.into_ref());
        let view = View::new("V1", "S1", "p", alignment);

        let output = write_string(&view).unwrap();
        assert!(output.starts_with("# STOCKHOLM 1.0"));
        assert!(output.contains("seq1/1-4"));
        assert!(!output.contains("#=GC"));
        assert!(output.trim_end().ends_with("//"));
    }
}
