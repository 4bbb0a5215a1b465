//! Project archives: saving a workspace into one container and rebuilding
//! it, with every shared entity restored exactly once.

pub mod container;
pub mod context;
pub mod document;
pub mod linker;
pub mod load;
pub mod merger;
pub mod reconstruct;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod writer;

pub use context::{CancelFlag, LoadOptions, SaveOptions};
pub use linker::{CrossViewLinker, LinkSummary, duplicate_and_link};
pub use load::{LoadedProject, load, load_from_reader};
pub use registry::{Entity, IdentityRegistry};
pub use report::{Report, Warning};
pub use writer::{ArchiveWriter, save_all, save_view, write_workspace};
