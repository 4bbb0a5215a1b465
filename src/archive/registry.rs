//! Bidirectional mapping between live entities and archive ID strings.

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use strum::{AsRefStr, Display};

use super::report::Warning;
use crate::editor::HistoryRef;
use crate::model::{
    AlignmentRef, AnnotationRef, CodonFrameRef, GroupRef, SeqRef, ViewRef, ViewerRef,
};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh per-session suffix. Two sessions in one process never share one.
pub fn session_salt() -> String {
    let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let clock = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64 & 0xff_ffff)
        .unwrap_or(0);
    format!("_{clock:x}{session}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum EntityKind {
    Sequence,
    Alignment,
    Annotation,
    Group,
    CodonFrame,
    History,
    View,
    Viewer,
}

impl EntityKind {
    /// Prefix for minted IDs of this kind.
    fn prefix(self) -> &'static str {
        match self {
            EntityKind::Sequence => "sq",
            EntityKind::Alignment => "ds",
            EntityKind::Annotation => "an",
            EntityKind::Group => "gr",
            EntityKind::CodonFrame => "cf",
            EntityKind::History => "ss",
            EntityKind::View => "vw",
            EntityKind::Viewer => "vr",
        }
    }
}

/// Any entity that can be given an archive ID.
#[derive(Debug, Clone)]
pub enum Entity {
    Sequence(SeqRef),
    Alignment(AlignmentRef),
    Annotation(AnnotationRef),
    Group(GroupRef),
    CodonFrame(CodonFrameRef),
    History(HistoryRef),
    View(ViewRef),
    Viewer(ViewerRef),
}

type EntityKey = (EntityKind, usize);

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Sequence(_) => EntityKind::Sequence,
            Entity::Alignment(_) => EntityKind::Alignment,
            Entity::Annotation(_) => EntityKind::Annotation,
            Entity::Group(_) => EntityKind::Group,
            Entity::CodonFrame(_) => EntityKind::CodonFrame,
            Entity::History(_) => EntityKind::History,
            Entity::View(_) => EntityKind::View,
            Entity::Viewer(_) => EntityKind::Viewer,
        }
    }

    fn address(&self) -> usize {
        match self {
            Entity::Sequence(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::Alignment(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::Annotation(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::Group(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::CodonFrame(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::History(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::View(e) => Rc::as_ptr(e) as *const () as usize,
            Entity::Viewer(e) => Rc::as_ptr(e) as *const () as usize,
        }
    }

    /// Identity key: two entities are the same only if they are the same
    /// allocation, never by value.
    fn key(&self) -> EntityKey {
        (self.kind(), self.address())
    }

    pub fn same_as(&self, other: &Entity) -> bool {
        self.key() == other.key()
    }

    pub fn as_sequence(&self) -> Option<SeqRef> {
        match self {
            Entity::Sequence(s) => Some(Rc::clone(s)),
            _ => None,
        }
    }

    pub fn as_alignment(&self) -> Option<AlignmentRef> {
        match self {
            Entity::Alignment(a) => Some(Rc::clone(a)),
            _ => None,
        }
    }

    pub fn as_annotation(&self) -> Option<AnnotationRef> {
        match self {
            Entity::Annotation(a) => Some(Rc::clone(a)),
            _ => None,
        }
    }

    pub fn as_group(&self) -> Option<GroupRef> {
        match self {
            Entity::Group(g) => Some(Rc::clone(g)),
            _ => None,
        }
    }

    pub fn as_history(&self) -> Option<HistoryRef> {
        match self {
            Entity::History(h) => Some(Rc::clone(h)),
            _ => None,
        }
    }

    pub fn as_view(&self) -> Option<ViewRef> {
        match self {
            Entity::View(v) => Some(Rc::clone(v)),
            _ => None,
        }
    }
}

/// Entity/ID tables for one load or save.
///
/// Entities are held by strong reference so an address cannot be reused by
/// a new allocation while its ID is still bound.
#[derive(Debug)]
pub struct IdentityRegistry {
    by_key: HashMap<EntityKey, String>,
    by_id: HashMap<String, Entity>,
    counter: u64,
    salt: String,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::with_salt(session_salt())
    }
}

impl IdentityRegistry {
    /// Create a registry with a fresh session salt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with a fixed salt (used for reproducible output).
    pub fn with_salt(salt: impl Into<String>) -> Self {
        Self {
            by_key: HashMap::new(),
            by_id: HashMap::new(),
            counter: 0,
            salt: salt.into(),
        }
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Existing ID of `entity`, if it has been seen.
    pub fn existing_id(&self, entity: &Entity) -> Option<&str> {
        self.by_key.get(&entity.key()).map(String::as_str)
    }

    /// ID for `entity`, minting and binding a new one on first sight.
    pub fn id_for(&mut self, entity: &Entity) -> String {
        if let Some(id) = self.by_key.get(&entity.key()) {
            return id.clone();
        }
        let id = self.mint(entity.kind());
        self.by_key.insert(entity.key(), id.clone());
        self.by_id.insert(id.clone(), entity.clone());
        id
    }

    fn mint(&mut self, kind: EntityKind) -> String {
        loop {
            self.counter += 1;
            let id = format!("{}{}{}", kind.prefix(), self.counter, self.salt);
            if !self.by_id.contains_key(&id) {
                return id;
            }
        }
    }

    /// Entity bound to `id`, or `None` if it has not been registered yet.
    pub fn entity_for(&self, id: &str) -> Option<&Entity> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Bind `id` to `entity`.
    ///
    /// Rebinding an ID to the same entity is a no-op. Binding it to a
    /// different entity is refused and reported; the first binding wins.
    pub fn register(&mut self, id: &str, entity: Entity) -> Result<(), Warning> {
        if let Some(existing) = self.by_id.get(id) {
            if existing.same_as(&entity) {
                return Ok(());
            }
            return Err(Warning::IdentityCollision { id: id.to_string() });
        }
        self.by_key.entry(entity.key()).or_insert_with(|| id.to_string());
        self.by_id.insert(id.to_string(), entity);
        Ok(())
    }

    pub fn sequence(&self, id: &str) -> Option<SeqRef> {
        self.entity_for(id).and_then(Entity::as_sequence)
    }

    pub fn alignment(&self, id: &str) -> Option<AlignmentRef> {
        self.entity_for(id).and_then(Entity::as_alignment)
    }

    pub fn annotation(&self, id: &str) -> Option<AnnotationRef> {
        self.entity_for(id).and_then(Entity::as_annotation)
    }

    pub fn group(&self, id: &str) -> Option<GroupRef> {
        self.entity_for(id).and_then(Entity::as_group)
    }

    pub fn history(&self, id: &str) -> Option<HistoryRef> {
        self.entity_for(id).and_then(Entity::as_history)
    }

    pub fn view(&self, id: &str) -> Option<ViewRef> {
        self.entity_for(id).and_then(Entity::as_view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Sequence;

    #[test]
    fn test_identity_not_value() {
        let mut registry = IdentityRegistry::with_salt("_t");
        let a = Sequence::from_residues("same", "ACGT").into_ref();
        let b = Sequence::from_residues("same", "ACGT").into_ref();

        let id_a = registry.id_for(&Entity::Sequence(Rc::clone(&a)));
        let id_b = registry.id_for(&Entity::Sequence(Rc::clone(&b)));
        assert_ne!(id_a, id_b);
        assert_eq!(registry.id_for(&Entity::Sequence(Rc::clone(&a))), id_a);
        assert_eq!(id_a, "sq1_t");
        assert!(Rc::ptr_eq(&registry.sequence(&id_b).unwrap(), &b));
    }

    #[test]
    fn test_register_collision_keeps_first() {
        let mut registry = IdentityRegistry::with_salt("");
        let a = Sequence::from_residues("a", "A").into_ref();
        let b = Sequence::from_residues("b", "C").into_ref();

        assert!(registry.register("sq9", Entity::Sequence(Rc::clone(&a))).is_ok());
        assert!(registry.register("sq9", Entity::Sequence(Rc::clone(&a))).is_ok());
        let err = registry.register("sq9", Entity::Sequence(b)).unwrap_err();
        assert_eq!(err, Warning::IdentityCollision { id: "sq9".to_string() });
        assert!(Rc::ptr_eq(&registry.sequence("sq9").unwrap(), &a));
    }

    #[test]
    fn test_minted_ids_skip_registered() {
        let mut registry = IdentityRegistry::with_salt("");
        let a = Sequence::from_residues("a", "A").into_ref();
        registry.register("sq1", Entity::Sequence(a)).unwrap();
        let b = Sequence::from_residues("b", "C").into_ref();
        assert_eq!(registry.id_for(&Entity::Sequence(b)), "sq2");
    }

    #[test]
    fn test_session_salts_differ() {
        assert_ne!(session_salt(), session_salt());
    }

    #[test]
    fn test_unregistered_lookup_is_none() {
        let registry = IdentityRegistry::new();
        assert!(registry.entity_for("sq1").is_none());
        assert!(registry.sequence("sq1").is_none());
    }
}
