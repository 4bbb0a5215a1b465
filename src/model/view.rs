//! Views: an alignment plus its per-window display state.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::alignment::AlignmentRef;
use super::sequence::SeqRef;
use super::viewer::ViewerLink;
use crate::editor::{History, HistoryRef};

pub type ViewRef = Rc<RefCell<View>>;

/// Font used to draw residues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Font {
    pub name: String,
    pub size: u32,
    pub style: u32,
}

impl Default for Font {
    fn default() -> Self {
        Self {
            name: "SansSerif".to_string(),
            size: 12,
            style: 0,
        }
    }
}

/// Display setting for one sequence feature type.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSetting {
    pub kind: String,
    /// Colour as 0xRRGGBB.
    pub colour: u32,
    pub display: bool,
}

/// Window position and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Per-window display configuration.
#[derive(Clone)]
pub struct Viewport {
    pub title: String,
    pub colour_scheme: Option<String>,
    pub wrap: bool,
    pub show_annotation: bool,
    pub font: Font,
    /// Hidden column ranges (0-based, inclusive).
    pub hidden_columns: Vec<(usize, usize)>,
    pub hidden_sequences: Vec<SeqRef>,
    pub feature_settings: Vec<FeatureSetting>,
    pub start_res: usize,
    pub start_seq: usize,
    pub geometry: Geometry,
    /// Undo/redo history, shared with sibling views of the same sequence set.
    pub history: HistoryRef,
}

impl fmt::Debug for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Viewport")
            .field("title", &self.title)
            .field("colour_scheme", &self.colour_scheme)
            .field("wrap", &self.wrap)
            .field("font", &self.font)
            .field("hidden_columns", &self.hidden_columns)
            .field("hidden_sequences", &self.hidden_sequences.len())
            .finish()
    }
}

impl Viewport {
    pub fn new(title: impl Into<String>, history: HistoryRef) -> Self {
        Self {
            title: title.into(),
            colour_scheme: None,
            wrap: false,
            show_annotation: true,
            font: Font::default(),
            hidden_columns: Vec::new(),
            hidden_sequences: Vec::new(),
            feature_settings: Vec::new(),
            start_res: 0,
            start_seq: 0,
            geometry: Geometry::default(),
            history,
        }
    }

    pub fn is_hidden(&self, seq: &SeqRef) -> bool {
        self.hidden_sequences.iter().any(|s| Rc::ptr_eq(s, seq))
    }
}

/// One alignment window (or one tab/half of a window).
#[derive(Clone)]
pub struct View {
    /// View identifier, unique within a workspace.
    pub id: String,
    /// Shared by every view derived from one alignment import.
    pub sequence_set_id: String,
    pub alignment: AlignmentRef,
    pub viewport: Viewport,
    /// ID of the complementary (nucleotide/protein) view, if this view is
    /// one half of a split pair.
    pub complement_id: Option<String>,
    /// Set once this view has been joined with its complement.
    pub split_partner: Option<String>,
    /// Whether views of this sequence set should be gathered into tabs.
    pub gather_views: bool,
    pub viewer_links: Vec<ViewerLink>,
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("id", &self.id)
            .field("sequence_set_id", &self.sequence_set_id)
            .field("alignment", &self.alignment.borrow())
            .field("viewport", &self.viewport)
            .field("complement_id", &self.complement_id)
            .field("split_partner", &self.split_partner)
            .field("gather_views", &self.gather_views)
            .field("viewer_links", &self.viewer_links.len())
            .finish()
    }
}

impl View {
    /// Create a view with a fresh history.
    pub fn new(
        id: impl Into<String>,
        sequence_set_id: impl Into<String>,
        title: impl Into<String>,
        alignment: AlignmentRef,
    ) -> Self {
        Self::with_history(id, sequence_set_id, title, alignment, History::new().into_ref())
    }

    pub fn with_history(
        id: impl Into<String>,
        sequence_set_id: impl Into<String>,
        title: impl Into<String>,
        alignment: AlignmentRef,
        history: HistoryRef,
    ) -> Self {
        Self {
            id: id.into(),
            sequence_set_id: sequence_set_id.into(),
            alignment,
            viewport: Viewport::new(title, history),
            complement_id: None,
            split_partner: None,
            gather_views: false,
            viewer_links: Vec::new(),
        }
    }

    pub fn into_ref(self) -> ViewRef {
        Rc::new(RefCell::new(self))
    }

    pub fn title(&self) -> &str {
        &self.viewport.title
    }

    pub fn is_nucleotide(&self) -> bool {
        self.alignment.borrow().molecule == super::MoleculeType::Nucleotide
    }

    /// Whether two views share one undo/redo history.
    pub fn shares_history_with(&self, other: &View) -> bool {
        Rc::ptr_eq(&self.viewport.history, &other.viewport.history)
    }
}
