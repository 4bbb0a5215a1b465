//! Auto-calculated annotation rows.
//!
//! These rows are derived from the alignment columns, so an archive stores
//! only their visual state and they are rebuilt after loading.

use std::collections::HashMap;

use super::alignment::Alignment;
use super::annotation::{AnnotationElement, AnnotationRow, GraphType};
use super::sequence::is_gap;

pub const CONSENSUS: &str = "Consensus";
pub const CONSERVATION: &str = "Conservation";

/// Whether rows with this calculation ID can be regenerated.
pub fn is_known(calc_id: &str) -> bool {
    matches!(calc_id, CONSENSUS | CONSERVATION)
}

/// Residue counts (uppercased, gaps excluded) for one column.
fn column_counts(col: usize, alignment: &Alignment) -> (HashMap<char, usize>, usize) {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0;
    for seq in &alignment.sequences {
        if let Some(ch) = seq.borrow().get(col)
            && !is_gap(ch)
        {
            *counts.entry(ch.to_ascii_uppercase()).or_insert(0) += 1;
            total += 1;
        }
    }
    (counts, total)
}

/// Frequency of the most common residue in a column (0.0 to 1.0).
pub fn column_conservation(col: usize, alignment: &Alignment) -> f64 {
    let (counts, total) = column_counts(col, alignment);
    if total == 0 {
        return 0.0;
    }
    let max_count = counts.values().max().copied().unwrap_or(0);
    max_count as f64 / total as f64
}

/// Most common residue in a column; ties go to the later character.
pub fn consensus_char(col: usize, alignment: &Alignment) -> Option<char> {
    let (counts, _) = column_counts(col, alignment);
    counts
        .into_iter()
        .max_by(|(ch_a, count_a), (ch_b, count_b)| count_a.cmp(count_b).then_with(|| ch_a.cmp(ch_b)))
        .map(|(ch, _)| ch)
}

/// Build a fresh row for a known calculation ID.
pub fn regenerate(calc_id: &str, alignment: &Alignment) -> Option<AnnotationRow> {
    let width = alignment.width();
    let mut row = AnnotationRow::new(calc_id);
    row.calc_id = Some(calc_id.to_string());
    row.auto_calculated = true;
    match calc_id {
        CONSENSUS => {
            row.graph = GraphType::Bar;
            row.elements = (0..width)
                .map(|col| {
                    consensus_char(col, alignment).map(|ch| AnnotationElement {
                        display_char: Some(ch.to_string()),
                        value: Some((column_conservation(col, alignment) * 100.0) as f32),
                        ..AnnotationElement::default()
                    })
                })
                .collect();
        }
        CONSERVATION => {
            row.graph = GraphType::Bar;
            row.elements = (0..width)
                .map(|col| {
                    let score = column_conservation(col, alignment);
                    Some(AnnotationElement {
                        display_char: Some(((score * 10.0).round() as u32).min(9).to_string()),
                        value: Some(score as f32),
                        ..AnnotationElement::default()
                    })
                })
                .collect();
        }
        _ => return None,
    }
    Some(row)
}
