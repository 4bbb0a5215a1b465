//! In-memory workbench graph: sequences, alignments, annotations, views
//! and viewer bindings.

pub mod alignment;
pub mod annotation;
pub mod autocalc;
pub mod mapping;
pub mod sequence;
pub mod view;
pub mod viewer;
pub mod workspace;

pub use alignment::{Alignment, AlignmentRef, MoleculeType};
pub use annotation::{
    AnnotationElement, AnnotationRef, AnnotationRow, GraphType, GroupRef, GroupStyle,
    SequenceGroup, Threshold, VisualState,
};
pub use mapping::{CodonFrame, CodonFrameRef, CodonMapping, MapError, MapList, Mapping};
pub use sequence::{DbRef, PdbEntry, SeqRef, Sequence, SequenceFeature};
pub use view::{FeatureSetting, Font, Geometry, View, ViewRef, Viewport};
pub use viewer::{SeqBinding, ViewerBinding, ViewerKind, ViewerLink, ViewerRef, ViewerState};
pub use workspace::{Container, Workspace};
