//! Per-operation state for one load or one save.
//!
//! A context is created when the operation starts and dropped when it
//! ends; two loads never share one.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;

use super::container::ViewerStates;
use super::merger::DatasetMerger;
use super::registry::{IdentityRegistry, session_salt};
use super::report::Report;
use super::resolver::ForwardResolver;
use crate::editor::history::DEFAULT_HISTORY_LIMIT;
use crate::error::{ArchiveError, Result};
use crate::model::{SeqRef, ViewRef};

/// Cooperative cancellation flag, checked between entries.
pub type CancelFlag = Arc<AtomicBool>;

fn is_cancelled(flag: &Option<CancelFlag>) -> bool {
    flag.as_ref().is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Settings for one load.
#[derive(Debug, Default)]
pub struct LoadOptions {
    /// Sequence-set IDs whose views are not loaded.
    pub skip: HashSet<String>,
    pub cancel: Option<CancelFlag>,
    /// Where copied external files are written. When unset they are kept
    /// in memory on the workspace.
    pub extract_dir: Option<PathBuf>,
    /// Undo depth for histories created by this load.
    pub history_limit: Option<usize>,
    /// Registry tables to start from. A reference whose plain archive ID is
    /// bound in it, and not declared by this load, resolves to that entity.
    pub registry: Option<IdentityRegistry>,
    /// Suffix for every ID this load binds. A fresh one is drawn when unset,
    /// so loads sharing a registry never collide.
    pub id_salt: Option<String>,
}

/// Settings for one save.
#[derive(Debug, Default, Clone)]
pub struct SaveOptions {
    /// Gzip level; `None` uses the default.
    pub compression: Option<u32>,
    /// Sequence-set IDs whose views are not saved.
    pub skip: HashSet<String>,
    pub cancel: Option<CancelFlag>,
    /// Fixed salt for minted IDs, for reproducible output.
    pub id_salt: Option<String>,
}

/// A PDB entry that names a copied file, checked once all entries are read.
#[derive(Debug)]
pub struct PendingFile {
    pub sequence: SeqRef,
    pub structure: usize,
    pub entry: String,
}

#[derive(Debug)]
pub struct LoadContext {
    pub registry: IdentityRegistry,
    pub resolver: ForwardResolver,
    pub merger: DatasetMerger,
    pub report: Report,
    pub views: Vec<ViewRef>,
    pub viewer_states: ViewerStates,
    pub external_files: IndexMap<String, Vec<u8>>,
    pub pending_files: Vec<PendingFile>,
    /// Sequence set each shared annotation row was first loaded for.
    pub annotation_sets: HashMap<String, String>,
    pub skip: HashSet<String>,
    pub history_limit: usize,
    pub extract_dir: Option<PathBuf>,
    salt: String,
    cancel: Option<CancelFlag>,
}

impl LoadContext {
    pub fn new(options: LoadOptions) -> Self {
        Self {
            registry: options.registry.unwrap_or_default(),
            resolver: ForwardResolver::new(),
            merger: DatasetMerger::new(),
            report: Report::new(),
            views: Vec::new(),
            viewer_states: ViewerStates::new(),
            external_files: IndexMap::new(),
            pending_files: Vec::new(),
            annotation_sets: HashMap::new(),
            skip: options.skip,
            history_limit: options.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
            extract_dir: options.extract_dir,
            salt: options.id_salt.unwrap_or_else(session_salt),
            cancel: options.cancel,
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// The registry key this load binds an archive ID under.
    pub fn local_id(&self, id: &str) -> String {
        format!("{id}{}", self.salt)
    }

    /// The registry key a reference to `id` resolves through: this load's
    /// binding, or else a binding of the plain ID in the starting registry.
    pub fn reference_key(&self, id: &str) -> String {
        let local = self.local_id(id);
        if !self.registry.contains(&local) && self.registry.contains(id) {
            return id.to_string();
        }
        local
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if is_cancelled(&self.cancel) {
            return Err(ArchiveError::Cancelled);
        }
        Ok(())
    }

    pub fn is_skipped(&self, sequence_set_id: &str) -> bool {
        self.skip.contains(sequence_set_id)
    }
}

#[derive(Debug)]
pub struct SaveContext {
    pub registry: IdentityRegistry,
    pub report: Report,
    /// Dataset alignment IDs already written.
    pub datasets: HashSet<String>,
    /// Viewer IDs whose state has been queued.
    pub viewers: HashSet<String>,
    /// Entry name for each copied external file, by source.
    pub files: IndexMap<String, String>,
    pub skip: HashSet<String>,
    cancel: Option<CancelFlag>,
}

impl SaveContext {
    pub fn new(options: &SaveOptions) -> Self {
        let registry = match &options.id_salt {
            Some(salt) => IdentityRegistry::with_salt(salt.clone()),
            None => IdentityRegistry::new(),
        };
        Self {
            registry,
            report: Report::new(),
            datasets: HashSet::new(),
            viewers: HashSet::new(),
            files: IndexMap::new(),
            skip: options.skip.clone(),
            cancel: options.cancel.clone(),
        }
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if is_cancelled(&self.cancel) {
            return Err(ArchiveError::Cancelled);
        }
        Ok(())
    }

    pub fn is_skipped(&self, sequence_set_id: &str) -> bool {
        self.skip.contains(sequence_set_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_cancel_flag_checked() {
        let flag: CancelFlag = Arc::new(AtomicBool::new(false));
        let ctx = LoadContext::new(LoadOptions {
            cancel: Some(Arc::clone(&flag)),
            ..LoadOptions::default()
        });
        assert!(ctx.check_cancelled().is_ok());
        flag.store(true, Ordering::Relaxed);
        assert!(matches!(ctx.check_cancelled(), Err(ArchiveError::Cancelled)));
    }

    #[test]
    fn test_each_load_binds_under_its_own_salt() {
        let first = LoadContext::new(LoadOptions::default());
        let second = LoadContext::new(LoadOptions::default());
        assert_ne!(first.local_id("V1"), second.local_id("V1"));
        assert!(first.local_id("V1").starts_with("V1"));

        let fixed = LoadContext::new(LoadOptions {
            id_salt: Some(String::new()),
            ..LoadOptions::default()
        });
        assert_eq!(fixed.local_id("V1"), "V1");
    }

    #[test]
    fn test_reference_falls_back_to_starting_registry() {
        use crate::archive::registry::Entity;
        use crate::model::Sequence;

        let mut registry = IdentityRegistry::with_salt("");
        let seq = Sequence::new("s", "MKL", 1, 3).into_ref();
        registry
            .register("ext1", Entity::Sequence(Rc::clone(&seq)))
            .unwrap();
        let mut ctx = LoadContext::new(LoadOptions {
            registry: Some(registry),
            id_salt: Some("_b".to_string()),
            ..LoadOptions::default()
        });
        assert_eq!(ctx.reference_key("ext1"), "ext1");
        assert_eq!(ctx.reference_key("sq1"), "sq1_b");

        // A binding made by this load wins over the plain ID.
        ctx.registry
            .register("ext1_b", Entity::Sequence(seq))
            .unwrap();
        assert_eq!(ctx.reference_key("ext1"), "ext1_b");
    }

    #[test]
    fn test_fixed_salt_for_save() {
        let ctx = SaveContext::new(&SaveOptions {
            id_salt: Some("_x".to_string()),
            ..SaveOptions::default()
        });
        assert_eq!(ctx.registry.salt(), "_x");
    }
}
