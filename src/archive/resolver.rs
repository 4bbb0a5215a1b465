//! Deferred resolution of references to IDs that are not registered yet.
//!
//! A reference is queued with the ID it needs and a closure that performs
//! the linkage. The worklist is drained to a fixpoint: each pass resolves
//! whatever has become resolvable, and draining stops after a pass that
//! makes no progress.

use indexmap::IndexMap;
use log::debug;

use super::registry::{Entity, IdentityRegistry};

/// Performs the linkage once the target exists. Returns false if the
/// linkage could not be completed yet; the reference then stays queued.
pub type ResolveFn = Box<dyn FnMut(&Entity, &IdentityRegistry) -> bool>;

/// Extra precondition beyond the target being registered.
pub type ReadyFn = Box<dyn Fn(&IdentityRegistry) -> bool>;

struct Deferred {
    target: String,
    /// Short description of the reference, for logging.
    what: &'static str,
    ready: Option<ReadyFn>,
    resolve: ResolveFn,
}

/// Worklist of references waiting for their targets.
#[derive(Default)]
pub struct ForwardResolver {
    pending: Vec<Deferred>,
    resolved: usize,
}

impl std::fmt::Debug for ForwardResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardResolver")
            .field("pending", &self.pending.len())
            .field("resolved", &self.resolved)
            .finish()
    }
}

impl ForwardResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reference to `target`.
    pub fn defer(&mut self, target: impl Into<String>, what: &'static str, resolve: ResolveFn) {
        self.pending.push(Deferred {
            target: target.into(),
            what,
            ready: None,
            resolve,
        });
    }

    /// Queue a reference that additionally waits for `ready` to hold.
    pub fn defer_when(
        &mut self,
        target: impl Into<String>,
        what: &'static str,
        ready: ReadyFn,
        resolve: ResolveFn,
    ) {
        self.pending.push(Deferred {
            target: target.into(),
            what,
            ready: Some(ready),
            resolve,
        });
    }

    fn is_ready(deferred: &Deferred, registry: &IdentityRegistry) -> bool {
        registry.contains(&deferred.target)
            && deferred.ready.as_ref().is_none_or(|ready| ready(registry))
    }

    /// Whether references to `target` could be resolved now: the target is
    /// registered and every queued reference to it has its precondition met.
    pub fn is_resolvable(&self, target: &str, registry: &IdentityRegistry) -> bool {
        registry.contains(target)
            && self
                .pending
                .iter()
                .filter(|d| d.target == target)
                .all(|d| Self::is_ready(d, registry))
    }

    /// Resolve everything that can be resolved. Returns the number of
    /// references resolved by this call.
    pub fn drain(&mut self, registry: &IdentityRegistry) -> usize {
        let mut resolved = 0;
        loop {
            let mut progress = false;
            let mut index = 0;
            while index < self.pending.len() {
                if !Self::is_ready(&self.pending[index], registry) {
                    index += 1;
                    continue;
                }
                let linked = {
                    let deferred = &mut self.pending[index];
                    match registry.entity_for(&deferred.target) {
                        Some(entity) => (deferred.resolve)(entity, registry),
                        None => false,
                    }
                };
                if linked {
                    let done = self.pending.remove(index);
                    debug!("resolved {} -> {}", done.what, done.target);
                    resolved += 1;
                    progress = true;
                } else {
                    index += 1;
                }
            }
            if !progress {
                break;
            }
        }
        self.resolved += resolved;
        resolved
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn resolved_total(&self) -> usize {
        self.resolved
    }

    /// Remove all remaining references and count them per target ID.
    pub fn take_unresolved(&mut self) -> IndexMap<String, usize> {
        let mut counts: IndexMap<String, usize> = IndexMap::new();
        for deferred in self.pending.drain(..) {
            *counts.entry(deferred.target).or_insert(0) += 1;
        }
        counts
    }
}
