//! # Universe of Discourse
//!
//! The registry that owns every concept and the indexes derived from them:
//!
//! - id -> concept cell
//! - uri -> id
//! - owner id -> {child ids}
//! - target id -> {listener ids} (the reverse edge of every Reference and
//!   Refinement pointer)
//!
//! plus the reactive function registry, the observers and the undo manager.
//!
//! ## Cached Pointers
//!
//! A concept may name an owner or pointer target that is not (yet) a member,
//! typically while a concept space is being recovered piece by piece. Such
//! edges are parked in the pending indexes and moved into the live ones when
//! the target is inserted, so the live indexes only ever describe resolvable
//! edges.

use crate::concept::Concept;
use crate::dispatch::{FunctionCallRecord, Observer, ReactiveFunction};
use crate::index::OneToNMap;
use crate::notification::{ChangeNotification, NatureOfChange};
use crate::primitives::{
    CORE_CONCEPT_SPACE_URI, ELEMENT_URI, LITERAL_URI, REFERENCE_URI, REFINEMENT_URI, UNIVERSE_URI,
};
use crate::transaction::{Transaction, WriteGuard};
use crate::types::{ConceptId, ConceptType, CrlError};
use crate::undo::{UndoEntryKind, UndoManager};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::mpsc::Sender;

/// Shared, individually lockable storage for one concept.
pub(crate) type ConceptCell = Arc<RwLock<Concept>>;

// =============================================================================
// UNIVERSE
// =============================================================================

/// The container and registry of all concepts.
pub struct Universe {
    concepts: RwLock<BTreeMap<ConceptId, ConceptCell>>,
    uri_index: RwLock<BTreeMap<String, ConceptId>>,
    pub(crate) owned: OneToNMap,
    pub(crate) listeners: OneToNMap,
    pending_owned: OneToNMap,
    pending_listeners: OneToNMap,
    pub(crate) functions: RwLock<BTreeMap<String, Vec<ReactiveFunction>>>,
    pub(crate) observers: RwLock<Vec<Arc<dyn Observer>>>,
    pub(crate) concept_observers: RwLock<BTreeMap<ConceptId, Vec<Arc<dyn Observer>>>>,
    pub(crate) undo_manager: Mutex<UndoManager>,
    call_log: Mutex<Option<Sender<FunctionCallRecord>>>,
    universe_concept: ConceptId,
}

impl std::fmt::Debug for Universe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Universe")
            .field("concepts", &self.concept_count())
            .field("universe_concept", &self.universe_concept)
            .finish()
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::new()
    }
}

impl Universe {
    /// Create a Universe containing only the core concept space.
    #[must_use]
    pub fn new() -> Self {
        let universe = Self {
            concepts: RwLock::new(BTreeMap::new()),
            uri_index: RwLock::new(BTreeMap::new()),
            owned: OneToNMap::new(),
            listeners: OneToNMap::new(),
            pending_owned: OneToNMap::new(),
            pending_listeners: OneToNMap::new(),
            functions: RwLock::new(BTreeMap::new()),
            observers: RwLock::new(Vec::new()),
            concept_observers: RwLock::new(BTreeMap::new()),
            undo_manager: Mutex::new(UndoManager::new()),
            call_log: Mutex::new(None),
            universe_concept: ConceptId::derive_from_uri(UNIVERSE_URI),
        };
        universe.build_core_concept_space();
        universe
    }

    fn build_core_concept_space(&self) {
        let core = |uri: &str, concept_type: ConceptType, label: &str, owner: Option<ConceptId>| {
            let id = ConceptId::derive_from_uri(uri);
            let mut concept = Concept::new(id, concept_type, Some(uri.to_string()));
            concept.label = label.to_string();
            concept.is_core = true;
            concept.owner = owner;
            self.insert_cell(Arc::new(RwLock::new(concept)));
            id
        };

        core(
            UNIVERSE_URI,
            ConceptType::Element,
            "UniverseOfDiscourse",
            None,
        );
        let space = core(
            CORE_CONCEPT_SPACE_URI,
            ConceptType::Element,
            "CoreConceptSpace",
            None,
        );
        core(ELEMENT_URI, ConceptType::Element, "Element", Some(space));
        core(LITERAL_URI, ConceptType::Literal, "Literal", Some(space));
        core(REFERENCE_URI, ConceptType::Reference, "Reference", Some(space));
        core(
            REFINEMENT_URI,
            ConceptType::Refinement,
            "Refinement",
            Some(space),
        );
    }

    /// Open a new transaction on this Universe.
    #[must_use]
    pub fn new_transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    pub(crate) fn check_transaction(&self, trans: &Transaction<'_>) -> Result<(), CrlError> {
        if std::ptr::eq(trans.universe(), self) {
            Ok(())
        } else {
            Err(CrlError::UniverseMismatch)
        }
    }

    /// The concept that stands for this Universe.
    #[must_use]
    pub const fn universe_concept_id(&self) -> ConceptId {
        self.universe_concept
    }

    // =========================================================================
    // LOOKUP
    // =========================================================================

    pub(crate) fn cell(&self, id: &ConceptId) -> Option<ConceptCell> {
        self.concepts.read().get(id).cloned()
    }

    /// Whether the concept is a member of this Universe.
    #[must_use]
    pub fn contains(&self, id: &ConceptId) -> bool {
        self.concepts.read().contains_key(id)
    }

    /// Number of member concepts, core concepts included.
    #[must_use]
    pub fn concept_count(&self) -> usize {
        self.concepts.read().len()
    }

    /// Identifiers of every member concept.
    #[must_use]
    pub fn concept_ids(&self) -> BTreeSet<ConceptId> {
        self.concepts.read().keys().copied().collect()
    }

    /// A snapshot of a concept, read-locking it in the transaction.
    pub fn get_concept(&self, id: &ConceptId, trans: &Transaction<'_>) -> Option<Concept> {
        trans.read_lock(id).ok()?;
        trans.view(id, Concept::clone).ok()
    }

    /// A snapshot of the concept carrying `uri`.
    pub fn get_concept_with_uri(&self, uri: &str, trans: &Transaction<'_>) -> Option<Concept> {
        let id = self.concept_id_for_uri(uri)?;
        self.get_concept(&id, trans)
    }

    /// The identifier registered for a URI.
    #[must_use]
    pub fn concept_id_for_uri(&self, uri: &str) -> Option<ConceptId> {
        self.uri_index.read().get(uri).copied()
    }

    pub(crate) fn uri_entries(&self) -> Vec<(String, ConceptId)> {
        self.uri_index
            .read()
            .iter()
            .map(|(uri, id)| (uri.clone(), *id))
            .collect()
    }

    /// Current version of a concept.
    pub fn version(&self, id: &ConceptId, trans: &Transaction<'_>) -> Result<u64, CrlError> {
        trans.read_lock(id)?;
        trans.view(id, Concept::version)
    }

    /// Children of a concept.
    #[must_use]
    pub fn owned_concept_ids(&self, id: &ConceptId) -> BTreeSet<ConceptId> {
        self.owned.get(id)
    }

    /// Concepts holding a Reference/Refinement pointer to `id`.
    #[must_use]
    pub fn listener_ids(&self, id: &ConceptId) -> BTreeSet<ConceptId> {
        self.listeners.get(id)
    }

    /// Every concept owned directly or transitively by `id`, excluding `id`.
    #[must_use]
    pub fn descendant_ids(&self, id: &ConceptId) -> BTreeSet<ConceptId> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<ConceptId> = self.owned.get(id).into_iter().collect();
        while let Some(next) = stack.pop() {
            if next != *id && found.insert(next) {
                stack.extend(self.owned.get(&next));
            }
        }
        found
    }

    /// Member concepts without a member owner.
    pub fn root_concept_ids(&self, trans: &Transaction<'_>) -> BTreeSet<ConceptId> {
        self.concept_ids()
            .into_iter()
            .filter(|id| {
                trans
                    .view(id, Concept::owner)
                    .map(|owner| owner.is_none_or(|o| !self.contains(&o)))
                    .unwrap_or(false)
            })
            .collect()
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Create an Element, optionally named by a URI.
    pub fn new_element(
        &self,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.new_concept(ConceptType::Element, uri, trans)
    }

    /// Create a Literal, optionally named by a URI.
    pub fn new_literal(
        &self,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.new_concept(ConceptType::Literal, uri, trans)
    }

    /// Create a Reference, optionally named by a URI.
    pub fn new_reference(
        &self,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.new_concept(ConceptType::Reference, uri, trans)
    }

    /// Create a Refinement, optionally named by a URI.
    pub fn new_refinement(
        &self,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.new_concept(ConceptType::Refinement, uri, trans)
    }

    /// Create a concept of any type.
    ///
    /// A URI-named concept gets the identifier derived from its URI, so
    /// creating the same URI twice fails with `DuplicateUri` instead of
    /// producing a second concept. The new concept is write-locked in
    /// `trans`.
    pub fn new_concept(
        &self,
        concept_type: ConceptType,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.check_transaction(trans)?;
        let id = match uri {
            Some(uri) => {
                let id = ConceptId::from_uri(uri)?;
                if let Some(holder) = self.concept_id_for_uri(uri) {
                    return Err(CrlError::DuplicateUri {
                        uri: uri.to_string(),
                        holder,
                    });
                }
                if self.contains(&id) {
                    return Err(CrlError::AlreadyExists(id));
                }
                id
            }
            None => ConceptId::generate(),
        };

        let concept = Concept::new(id, concept_type, uri.map(str::to_string));
        let snapshot = concept.clone();
        let cell = Arc::new(RwLock::new(concept));
        let guard = cell.write_arc();
        self.insert_locked(Arc::clone(&cell), &guard);
        trans.adopt_write_guard(id, guard);
        self.record_undo(UndoEntryKind::Creation, &cell, &snapshot);
        tracing::debug!(%id, %concept_type, "concept created");

        let added =
            ChangeNotification::new(NatureOfChange::UofDConceptAdded, id, None, Some(snapshot));
        self.dispatch(self.universe_concept, Arc::new(added), trans)?;
        Ok(id)
    }

    // =========================================================================
    // INDEX MAINTENANCE
    // =========================================================================

    /// Add a cell to the Universe and derive its index entries.
    ///
    /// Takes a transient read lock on the cell.
    pub(crate) fn insert_cell(&self, cell: ConceptCell) {
        let concept = cell.read().clone();
        self.insert_with_state(cell, &concept);
    }

    /// Add a cell whose write guard is already held, using `guard` for its state.
    pub(crate) fn insert_locked(&self, cell: ConceptCell, guard: &WriteGuard) {
        let concept = (**guard).clone();
        self.insert_with_state(cell, &concept);
    }

    fn insert_with_state(&self, cell: ConceptCell, concept: &Concept) {
        let id = concept.id;
        self.concepts.write().insert(id, cell);
        if let Some(uri) = &concept.uri {
            self.uri_index.write().insert(uri.clone(), id);
        }
        if let Some(owner) = concept.owner {
            self.link_owner(id, owner);
        }
        for target in concept.pointer_targets() {
            self.link_target(id, target);
        }
        self.resolve_pending(id);
    }

    /// Remove a concept from every index.
    ///
    /// Edges other members still hold towards it are parked as pending.
    pub(crate) fn unindex(&self, concept: &Concept) {
        let id = concept.id;
        self.concepts.write().remove(&id);
        if let Some(uri) = &concept.uri {
            self.release_uri(uri, &id);
        }
        if let Some(owner) = concept.owner {
            self.unlink_owner(id, owner);
        }
        for target in concept.pointer_targets() {
            self.unlink_target(id, target);
        }
        for child in self.owned.take(&id) {
            self.pending_owned.add(id, child);
        }
        for listener in self.listeners.take(&id) {
            self.pending_listeners.add(id, listener);
        }
    }

    fn resolve_pending(&self, id: ConceptId) {
        for child in self.pending_owned.take(&id) {
            self.owned.add(id, child);
        }
        for listener in self.pending_listeners.take(&id) {
            self.listeners.add(id, listener);
        }
    }

    pub(crate) fn link_owner(&self, child: ConceptId, owner: ConceptId) {
        if self.contains(&owner) {
            self.owned.add(owner, child);
        } else {
            self.pending_owned.add(owner, child);
        }
    }

    pub(crate) fn unlink_owner(&self, child: ConceptId, owner: ConceptId) {
        self.owned.remove(&owner, &child);
        self.pending_owned.remove(&owner, &child);
    }

    pub(crate) fn link_target(&self, holder: ConceptId, target: ConceptId) {
        if self.contains(&target) {
            self.listeners.add(target, holder);
        } else {
            self.pending_listeners.add(target, holder);
        }
    }

    pub(crate) fn unlink_target(&self, holder: ConceptId, target: ConceptId) {
        self.listeners.remove(&target, &holder);
        self.pending_listeners.remove(&target, &holder);
    }

    /// Apply the listener index delta between two pointer target sets.
    pub(crate) fn relink_targets(
        &self,
        holder: ConceptId,
        before: &BTreeSet<ConceptId>,
        after: &BTreeSet<ConceptId>,
    ) {
        for gone in before.difference(after) {
            self.unlink_target(holder, *gone);
        }
        for added in after.difference(before) {
            self.link_target(holder, *added);
        }
    }

    /// Restore the owned and listener sets recorded for a concept.
    ///
    /// Entries that are not members are skipped; they re-link themselves when
    /// they are inserted again.
    pub(crate) fn restore_edge_sets(
        &self,
        id: ConceptId,
        owned: &BTreeSet<ConceptId>,
        listeners: &BTreeSet<ConceptId>,
    ) {
        let live = |ids: &BTreeSet<ConceptId>| -> BTreeSet<ConceptId> {
            ids.iter().copied().filter(|c| self.contains(c)).collect()
        };
        self.owned.set(id, live(owned));
        self.listeners.set(id, live(listeners));
    }

    /// Register `uri` for `id`, failing if another concept holds it.
    pub(crate) fn claim_uri(&self, uri: &str, id: ConceptId) -> Result<(), CrlError> {
        let mut index = self.uri_index.write();
        match index.get(uri) {
            Some(holder) if *holder != id => Err(CrlError::DuplicateUri {
                uri: uri.to_string(),
                holder: *holder,
            }),
            _ => {
                index.insert(uri.to_string(), id);
                Ok(())
            }
        }
    }

    /// Unregister `uri` if it is held by `id`.
    pub(crate) fn release_uri(&self, uri: &str, id: &ConceptId) {
        let mut index = self.uri_index.write();
        if index.get(uri) == Some(id) {
            index.remove(uri);
        }
    }

    /// Edges parked until their owner or target joins, keyed by the missing concept.
    #[must_use]
    pub fn pending_edges(&self) -> Vec<(ConceptId, BTreeSet<ConceptId>)> {
        let mut edges = self.pending_owned.entries();
        edges.extend(self.pending_listeners.entries());
        edges
    }

    /// Increment a concept's version under a write lock held by the transaction.
    ///
    /// Fails with `LockUpgrade` if the transaction only holds a read lock on it.
    pub(crate) fn bump_version(
        &self,
        id: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<u64, CrlError> {
        trans.view_mut(id, |c| c.version.increment())
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// Send every executed reactive call to `sender` when a transaction is released.
    pub fn set_call_log(&self, sender: Sender<FunctionCallRecord>) {
        *self.call_log.lock() = Some(sender);
    }

    /// Stop logging executed calls.
    pub fn clear_call_log(&self) {
        *self.call_log.lock() = None;
    }

    pub(crate) fn flush_call_log(&self, executed: Vec<FunctionCallRecord>) {
        if executed.is_empty() {
            return;
        }
        let mut log = self.call_log.lock();
        let Some(sender) = log.as_ref() else {
            return;
        };
        for record in executed {
            if sender.send(record).is_err() {
                tracing::debug!("call log receiver dropped, disabling call log");
                *log = None;
                return;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::CORE_PREFIX;

    #[test]
    fn new_universe_has_core_space() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();

        for uri in [
            UNIVERSE_URI,
            CORE_CONCEPT_SPACE_URI,
            ELEMENT_URI,
            LITERAL_URI,
            REFERENCE_URI,
            REFINEMENT_URI,
        ] {
            let concept = uofd.get_concept_with_uri(uri, &trans).expect("core concept");
            assert!(concept.is_core());
            assert!(concept.uri().is_some_and(|u| u.starts_with(CORE_PREFIX)));
        }

        let space = ConceptId::derive_from_uri(CORE_CONCEPT_SPACE_URI);
        assert_eq!(uofd.owned_concept_ids(&space).len(), 4);
        assert_eq!(uofd.concept_count(), 6);
    }

    #[test]
    fn core_ids_match_across_universes() {
        let a = Universe::new();
        let b = Universe::new();
        assert_eq!(a.universe_concept_id(), b.universe_concept_id());
        assert_eq!(
            a.concept_id_for_uri(ELEMENT_URI),
            b.concept_id_for_uri(ELEMENT_URI)
        );
    }

    #[test]
    fn create_with_uri_is_deterministic_and_unique() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let uri = "http://example.com/thing";

        let id = uofd.new_element(Some(uri), &trans).expect("create");
        assert_eq!(id, ConceptId::from_uri(uri).expect("id"));
        assert_eq!(uofd.concept_id_for_uri(uri), Some(id));

        let count = uofd.concept_count();
        assert!(matches!(
            uofd.new_literal(Some(uri), &trans),
            Err(CrlError::DuplicateUri { holder, .. }) if holder == id
        ));
        assert_eq!(uofd.concept_count(), count);
    }

    #[test]
    fn invalid_uri_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        assert!(matches!(
            uofd.new_element(Some("nope"), &trans),
            Err(CrlError::InvalidUri(_))
        ));
    }

    #[test]
    fn foreign_transaction_rejected() {
        let a = Universe::new();
        let b = Universe::new();
        let trans = b.new_transaction();
        assert!(matches!(
            a.new_element(None, &trans),
            Err(CrlError::UniverseMismatch)
        ));
    }

    #[test]
    fn pending_edges_resolve_on_insert() {
        let uofd = Universe::new();
        let owner_id = ConceptId::generate();
        let mut child = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        child.owner = Some(owner_id);
        let child_id = child.id();

        uofd.insert_cell(Arc::new(RwLock::new(child)));
        assert!(uofd.owned_concept_ids(&owner_id).is_empty());
        assert_eq!(uofd.pending_edges().len(), 1);

        let owner = Concept::new(owner_id, ConceptType::Element, None);
        uofd.insert_cell(Arc::new(RwLock::new(owner)));
        assert!(uofd.owned_concept_ids(&owner_id).contains(&child_id));
        assert!(uofd.pending_edges().is_empty());
    }

    #[test]
    fn descendants_and_roots() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let a = uofd.new_element(None, &trans).expect("a");
        let b = uofd.new_element(None, &trans).expect("b");
        let c = uofd.new_element(None, &trans).expect("c");
        uofd.set_owning_concept(&b, Some(a), &trans).expect("own b");
        uofd.set_owning_concept(&c, Some(b), &trans).expect("own c");

        let descendants = uofd.descendant_ids(&a);
        assert_eq!(descendants, BTreeSet::from([b, c]));

        let roots = uofd.root_concept_ids(&trans);
        assert!(roots.contains(&a));
        assert!(!roots.contains(&b));
        assert!(roots.contains(&uofd.universe_concept_id()));
    }

    #[test]
    fn call_log_receives_records() {
        let uofd = Universe::new();
        let (tx, rx) = std::sync::mpsc::channel();
        uofd.set_call_log(tx);
        uofd.add_function("http://example.com/watched", |_, _, _| Ok(()));

        let trans = uofd.new_transaction();
        let id = uofd.new_element(Some("http://example.com/watched"), &trans).expect("create");
        uofd.set_label(&id, "x", &trans).expect("label");
        trans.release();

        let records: Vec<_> = rx.try_iter().collect();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.target == id));
    }
}
