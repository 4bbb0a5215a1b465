//! Annotation rows and sequence groups.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use strum::{AsRefStr, Display, EnumString};

use super::sequence::SeqRef;

pub type AnnotationRef = Rc<RefCell<AnnotationRow>>;
pub type GroupRef = Rc<RefCell<SequenceGroup>>;

/// How an annotation row is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum GraphType {
    #[default]
    None,
    Bar,
    Line,
}

/// A horizontal threshold line on a graph row.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub value: f32,
    pub label: String,
}

/// One column of an annotation row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationElement {
    pub display_char: Option<String>,
    pub secondary_structure: Option<char>,
    pub value: Option<f32>,
    pub description: Option<String>,
}

/// The persisted visual state of a row. Auto-calculated rows are rebuilt
/// on load and then have this reapplied.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualState {
    pub visible: bool,
    pub height: u32,
    pub graph: GraphType,
    pub threshold: Option<Threshold>,
}

/// A per-column (or per-residue) annotation row.
#[derive(Clone)]
pub struct AnnotationRow {
    pub label: String,
    pub description: Option<String>,
    /// Identifies the calculation that produced the row.
    pub calc_id: Option<String>,
    pub auto_calculated: bool,
    pub visible: bool,
    pub height: u32,
    pub graph: GraphType,
    pub threshold: Option<Threshold>,
    pub score: Option<f64>,
    pub elements: Vec<Option<AnnotationElement>>,
    /// Sequence this row annotates, if any.
    pub sequence: Option<SeqRef>,
    /// Group this row annotates, if any.
    pub group: Option<GroupRef>,
}

impl fmt::Debug for AnnotationRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationRow")
            .field("label", &self.label)
            .field("calc_id", &self.calc_id)
            .field("auto_calculated", &self.auto_calculated)
            .field("visible", &self.visible)
            .field("graph", &self.graph)
            .field("elements", &self.elements.len())
            .field("sequence", &self.sequence.as_ref().map(|s| s.borrow().name.clone()))
            .field("group", &self.group.as_ref().map(|g| g.borrow().name.clone()))
            .finish()
    }
}

impl AnnotationRow {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            description: None,
            calc_id: None,
            auto_calculated: false,
            visible: true,
            height: 40,
            graph: GraphType::None,
            threshold: None,
            score: None,
            elements: Vec::new(),
            sequence: None,
            group: None,
        }
    }

    pub fn into_ref(self) -> AnnotationRef {
        Rc::new(RefCell::new(self))
    }

    pub fn visual_state(&self) -> VisualState {
        VisualState {
            visible: self.visible,
            height: self.height,
            graph: self.graph,
            threshold: self.threshold.clone(),
        }
    }

    pub fn apply_visual_state(&mut self, state: &VisualState) {
        self.visible = state.visible;
        self.height = state.height;
        self.graph = state.graph;
        self.threshold = state.threshold.clone();
    }
}

/// Display style of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStyle {
    pub colour_scheme: Option<String>,
    /// Outline colour as 0xRRGGBB.
    pub outline_colour: u32,
    pub display_boxes: bool,
    pub display_text: bool,
    pub colour_text: bool,
}

impl Default for GroupStyle {
    fn default() -> Self {
        Self {
            colour_scheme: None,
            outline_colour: 0x000000,
            display_boxes: true,
            display_text: true,
            colour_text: false,
        }
    }
}

/// A named rectangular selection: a column range over a set of sequences.
#[derive(Clone)]
pub struct SequenceGroup {
    pub name: String,
    /// First column (0-based, inclusive).
    pub start: usize,
    /// Last column (0-based, inclusive).
    pub end: usize,
    pub sequences: Vec<SeqRef>,
    pub style: GroupStyle,
}

impl fmt::Debug for SequenceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceGroup")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("sequences", &self.sequences.len())
            .field("style", &self.style)
            .finish()
    }
}

impl SequenceGroup {
    pub fn new(name: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            name: name.into(),
            start,
            end,
            sequences: Vec::new(),
            style: GroupStyle::default(),
        }
    }

    pub fn into_ref(self) -> GroupRef {
        Rc::new(RefCell::new(self))
    }

    pub fn contains(&self, seq: &SeqRef) -> bool {
        self.sequences.iter().any(|s| Rc::ptr_eq(s, seq))
    }

    /// Number of columns covered.
    pub fn width(&self) -> usize {
        self.end.saturating_sub(self.start) + 1
    }
}
