//! Piecewise-linear coordinate mappings and codon frames.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use super::sequence::SeqRef;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("mapping ratio must be positive (got {from}:{to})")]
    ZeroRatio { from: u32, to: u32 },
    #[error("mapping has no ranges")]
    Empty,
    #[error("from-range length {from_len} does not match to-range length {to_len} at ratio {from_ratio}:{to_ratio}")]
    RatioMismatch {
        from_len: u64,
        to_len: u64,
        from_ratio: u32,
        to_ratio: u32,
    },
    #[error("mapping ranges are too long to measure")]
    Overflow,
}

/// Length of an inclusive range, in either direction. `None` when it does
/// not fit in a `u64`.
fn range_len(&(start, end): &(i64, i64)) -> Option<u64> {
    start.abs_diff(end).checked_add(1)
}

fn total_len(ranges: &[(i64, i64)]) -> Option<u64> {
    ranges
        .iter()
        .try_fold(0u64, |sum, range| sum.checked_add(range_len(range)?))
}

/// Coordinate correspondence between two sequences, as matching lists of
/// inclusive ranges with a residue ratio (3:1 for nucleotide to peptide).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapList {
    pub from_ranges: Vec<(i64, i64)>,
    pub to_ranges: Vec<(i64, i64)>,
    pub from_ratio: u32,
    pub to_ratio: u32,
}

impl MapList {
    /// Build a validated mapping.
    pub fn new(
        from_ranges: Vec<(i64, i64)>,
        to_ranges: Vec<(i64, i64)>,
        from_ratio: u32,
        to_ratio: u32,
    ) -> Result<Self, MapError> {
        let map = Self {
            from_ranges,
            to_ranges,
            from_ratio,
            to_ratio,
        };
        map.validate()?;
        Ok(map)
    }

    /// Residues covered on the `from` side; `None` on overflow.
    pub fn from_length(&self) -> Option<u64> {
        total_len(&self.from_ranges)
    }

    pub fn to_length(&self) -> Option<u64> {
        total_len(&self.to_ranges)
    }

    /// Check that both sides cover the same number of units at the stated
    /// ratio. One trailing unit on the `from` side is tolerated so a
    /// nucleotide mapping may include its stop codon.
    pub fn validate(&self) -> Result<(), MapError> {
        if self.from_ratio == 0 || self.to_ratio == 0 {
            return Err(MapError::ZeroRatio {
                from: self.from_ratio,
                to: self.to_ratio,
            });
        }
        if self.from_ranges.is_empty() || self.to_ranges.is_empty() {
            return Err(MapError::Empty);
        }
        let (Some(from_len), Some(to_len)) = (self.from_length(), self.to_length()) else {
            return Err(MapError::Overflow);
        };
        let from_units = from_len
            .checked_mul(u64::from(self.to_ratio))
            .ok_or(MapError::Overflow)?;
        let to_units = to_len
            .checked_mul(u64::from(self.from_ratio))
            .ok_or(MapError::Overflow)?;
        let with_stop = to_units
            .checked_add(u64::from(self.from_ratio))
            .ok_or(MapError::Overflow)?;
        if from_units == to_units || from_units == with_stop {
            Ok(())
        } else {
            Err(MapError::RatioMismatch {
                from_len,
                to_len,
                from_ratio: self.from_ratio,
                to_ratio: self.to_ratio,
            })
        }
    }

    /// Map a `from` position onto the `to` coordinate system.
    pub fn locate(&self, pos: i64) -> Option<i64> {
        let mut offset: u64 = 0;
        for range in &self.from_ranges {
            let (start, end) = *range;
            let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
            if (lo..=hi).contains(&pos) {
                offset = offset.checked_add(pos.abs_diff(start))?;
                let units = offset.checked_mul(u64::from(self.to_ratio))? / u64::from(self.from_ratio);
                return self.to_position(units);
            }
            offset = offset.checked_add(range_len(range)?)?;
        }
        None
    }

    fn to_position(&self, mut offset: u64) -> Option<i64> {
        for range in &self.to_ranges {
            let len = range_len(range)?;
            if offset < len {
                let (start, end) = *range;
                return if start <= end {
                    start.checked_add_unsigned(offset)
                } else {
                    start.checked_sub_unsigned(offset)
                };
            }
            offset -= len;
        }
        None
    }
}

/// A mapping onto a target sequence. The target is `None` until the
/// referenced sequence has been resolved.
#[derive(Clone)]
pub struct Mapping {
    pub map: MapList,
    pub to: Option<SeqRef>,
}

impl fmt::Debug for Mapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.to.as_ref().map(|s| s.borrow().name.clone());
        f.debug_struct("Mapping")
            .field("map", &self.map)
            .field("to", &target)
            .finish()
    }
}

impl Mapping {
    pub fn new(map: MapList) -> Self {
        Self { map, to: None }
    }

    pub fn with_target(map: MapList, to: SeqRef) -> Self {
        Self { map, to: Some(to) }
    }
}

pub type CodonFrameRef = Rc<RefCell<CodonFrame>>;

/// One nucleotide sequence and its mapping onto a protein product.
#[derive(Debug, Clone)]
pub struct CodonMapping {
    /// Nucleotide dataset sequence, `None` until resolved.
    pub dna: Option<SeqRef>,
    /// Mapping whose target is the protein dataset sequence.
    pub mapping: Mapping,
}

/// Codon correspondences between nucleotide and protein dataset sequences.
#[derive(Debug, Clone, Default)]
pub struct CodonFrame {
    pub mappings: Vec<CodonMapping>,
}

impl CodonFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ref(self) -> CodonFrameRef {
        Rc::new(RefCell::new(self))
    }

    /// Add a fully linked codon mapping.
    pub fn add(&mut self, dna: SeqRef, map: MapList, protein: SeqRef) {
        self.mappings.push(CodonMapping {
            dna: Some(dna),
            mapping: Mapping::with_target(map, protein),
        });
    }

    /// Whether every mapping has both ends linked.
    pub fn is_complete(&self) -> bool {
        self.mappings
            .iter()
            .all(|m| m.dna.is_some() && m.mapping.to.is_some())
    }

    /// Whether `seq` takes part in any mapping of this frame.
    pub fn involves(&self, seq: &SeqRef) -> bool {
        self.mappings.iter().any(|m| {
            m.dna.as_ref().is_some_and(|d| Rc::ptr_eq(d, seq))
                || m.mapping.to.as_ref().is_some_and(|p| Rc::ptr_eq(p, seq))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codon_map_validates() {
        let map = MapList::new(vec![(1, 12)], vec![(1, 4)], 3, 1).unwrap();
        assert_eq!(map.from_length(), Some(12));
        assert_eq!(map.to_length(), Some(4));
        assert_eq!(map.locate(4), Some(2));
        assert_eq!(map.locate(12), Some(4));
        assert_eq!(map.locate(13), None);
    }

    #[test]
    fn test_stop_codon_tolerated() {
        assert!(MapList::new(vec![(1, 15)], vec![(1, 4)], 3, 1).is_ok());
    }

    #[test]
    fn test_ratio_mismatch_rejected() {
        let err = MapList::new(vec![(1, 10)], vec![(1, 4)], 3, 1).unwrap_err();
        assert!(matches!(err, MapError::RatioMismatch { .. }));
        assert!(matches!(
            MapList::new(vec![(1, 3)], vec![(1, 1)], 0, 1),
            Err(MapError::ZeroRatio { .. })
        ));
    }

    #[test]
    fn test_extreme_coordinates_rejected() {
        // The full i64 range is one residue longer than a u64 can count.
        let err = MapList::new(vec![(i64::MIN, i64::MAX)], vec![(1, 1)], 1, 1).unwrap_err();
        assert_eq!(err, MapError::Overflow);

        let half = vec![(0, i64::MAX), (0, i64::MAX), (0, i64::MAX)];
        let err = MapList::new(half, vec![(1, 1)], 1, 1).unwrap_err();
        assert_eq!(err, MapError::Overflow);

        let long = vec![(0, i64::MAX - 1)];
        let err = MapList::new(long.clone(), long, 3, 3).unwrap_err();
        assert_eq!(err, MapError::Overflow);
    }

    #[test]
    fn test_wide_map_locates_without_overflow() {
        let map = MapList::new(vec![(i64::MIN, 0)], vec![(0, i64::MAX)], 1, 1).unwrap();
        assert_eq!(map.locate(-1), Some(i64::MAX));
        assert_eq!(map.locate(i64::MIN), Some(0));
        // The trailing unit is the tolerated stop.
        assert_eq!(map.locate(0), None);
    }

    #[test]
    fn test_reverse_strand_locate() {
        let map = MapList::new(vec![(9, 1)], vec![(1, 3)], 3, 1).unwrap();
        assert_eq!(map.locate(9), Some(1));
        assert_eq!(map.locate(3), Some(3));
    }
}
