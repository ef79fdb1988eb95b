//! # Undo / Redo
//!
//! Two stacks of entries captured before every recorded mutation. Each entry
//! keeps the concept cell, a clone of the concept and the concept's owned and
//! listener sets at capture time.
//!
//! Undo and redo are the same traversal in opposite directions: pop entries
//! back to the nearest marker, replay each one and push its mirror image onto
//! the other stack. Replay edits the indexes directly and sends no
//! notifications.

use crate::concept::Concept;
use crate::transaction::Transaction;
use crate::types::{ConceptId, CrlError};
use crate::universe::{ConceptCell, Universe};
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// ENTRIES
// =============================================================================

/// What a recorded entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UndoEntryKind {
    /// Boundary between user-level operations.
    Marker,
    /// The concept was added to the Universe.
    Creation,
    /// The concept was removed from the Universe.
    Deletion,
    /// One or more attributes of the concept changed.
    Change,
}

/// Concept state captured for an entry.
pub(crate) struct CapturedState {
    cell: ConceptCell,
    concept: Concept,
    owned: BTreeSet<ConceptId>,
    listeners: BTreeSet<ConceptId>,
}

pub(crate) struct UndoEntry {
    kind: UndoEntryKind,
    state: Option<CapturedState>,
}

impl UndoEntry {
    const fn marker() -> Self {
        Self {
            kind: UndoEntryKind::Marker,
            state: None,
        }
    }

    const fn new(kind: UndoEntryKind, state: CapturedState) -> Self {
        Self {
            kind,
            state: Some(state),
        }
    }
}

// =============================================================================
// UNDO MANAGER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

/// The undo and redo stacks. Recording starts disabled.
#[derive(Default)]
pub(crate) struct UndoManager {
    undo_stack: Vec<UndoEntry>,
    redo_stack: Vec<UndoEntry>,
    recording: bool,
}

impl UndoManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    /// Push a marker if recording.
    pub fn mark(&mut self) {
        if self.recording {
            self.undo_stack.push(UndoEntry::marker());
        }
    }

    /// Push a newly recorded entry. Anything that could be redone is discarded.
    fn push(&mut self, entry: UndoEntry) {
        self.undo_stack.push(entry);
        self.redo_stack.clear();
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    fn source(&mut self, direction: Direction) -> &mut Vec<UndoEntry> {
        match direction {
            Direction::Undo => &mut self.undo_stack,
            Direction::Redo => &mut self.redo_stack,
        }
    }

    fn destination(&mut self, direction: Direction) -> &mut Vec<UndoEntry> {
        match direction {
            Direction::Undo => &mut self.redo_stack,
            Direction::Redo => &mut self.undo_stack,
        }
    }
}

// =============================================================================
// UNIVERSE API
// =============================================================================

impl Universe {
    /// Capture a concept for undo, if recording.
    pub(crate) fn record_undo(&self, kind: UndoEntryKind, cell: &ConceptCell, concept: &Concept) {
        let mut manager = self.undo_manager.lock();
        if !manager.is_recording() {
            return;
        }
        let state = self.capture(cell, concept.clone());
        manager.push(UndoEntry::new(kind, state));
    }

    fn capture(&self, cell: &ConceptCell, concept: Concept) -> CapturedState {
        CapturedState {
            cell: Arc::clone(cell),
            owned: self.owned.get(&concept.id),
            listeners: self.listeners.get(&concept.id),
            concept,
        }
    }

    /// Push a marker separating user-level operations.
    pub fn mark_undo_point(&self) {
        self.undo_manager.lock().mark();
    }

    pub fn set_recording_undo(&self, recording: bool) {
        self.undo_manager.lock().set_recording(recording);
    }

    #[must_use]
    pub fn is_recording_undo(&self) -> bool {
        self.undo_manager.lock().is_recording()
    }

    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.undo_manager.lock().undo_depth()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.undo_manager.lock().redo_depth()
    }

    /// Revert everything back to the most recent marker.
    ///
    /// An empty undo stack is a no-op.
    pub fn undo(&self, trans: &Transaction<'_>) -> Result<(), CrlError> {
        self.check_transaction(trans)?;
        self.unwind(Direction::Undo, trans)
    }

    /// Reapply what the last `undo` reverted.
    ///
    /// An empty redo stack is a no-op.
    pub fn redo(&self, trans: &Transaction<'_>) -> Result<(), CrlError> {
        self.check_transaction(trans)?;
        self.unwind(Direction::Redo, trans)
    }

    fn unwind(&self, direction: Direction, trans: &Transaction<'_>) -> Result<(), CrlError> {
        let mut first = true;
        let mut replayed = 0usize;
        loop {
            let Some(entry) = self.undo_manager.lock().source(direction).pop() else {
                break;
            };
            if entry.kind == UndoEntryKind::Marker {
                let mut manager = self.undo_manager.lock();
                if first {
                    manager.destination(direction).push(entry);
                    first = false;
                    continue;
                }
                manager.source(direction).push(entry);
                break;
            }
            first = false;

            match self.replay(entry, trans) {
                Ok(mirror) => {
                    self.undo_manager.lock().destination(direction).push(mirror);
                    replayed += 1;
                }
                Err((entry, e)) => {
                    self.undo_manager.lock().source(direction).push(entry);
                    return Err(e);
                }
            }
        }
        tracing::debug!(?direction, replayed, "undo stack unwound");
        Ok(())
    }

    /// Apply one entry, returning its mirror image.
    ///
    /// On failure the entry is handed back untouched.
    fn replay(
        &self,
        entry: UndoEntry,
        trans: &Transaction<'_>,
    ) -> Result<UndoEntry, (UndoEntry, CrlError)> {
        let kind = entry.kind;
        let Some(state) = entry.state else {
            return Ok(UndoEntry::marker());
        };
        let result = match kind {
            UndoEntryKind::Marker => return Ok(UndoEntry::marker()),
            UndoEntryKind::Creation => self.replay_creation(&state, trans),
            UndoEntryKind::Deletion => self.replay_deletion(&state, trans),
            UndoEntryKind::Change => self.replay_change(&state, trans),
        };
        result.map_err(|e| (UndoEntry::new(kind, state), e))
    }

    /// Take a created concept back out of the Universe.
    fn replay_creation(
        &self,
        state: &CapturedState,
        trans: &Transaction<'_>,
    ) -> Result<UndoEntry, CrlError> {
        let id = state.concept.id;
        trans.write_lock(&id)?;
        let current = trans.view(&id, Concept::clone)?;
        let mirror = self.capture(&state.cell, current.clone());
        self.unindex(&current);
        trans.forget(&id);
        tracing::trace!(%id, "replayed creation");
        Ok(UndoEntry::new(UndoEntryKind::Deletion, mirror))
    }

    /// Put a deleted concept back, exactly as captured.
    fn replay_deletion(
        &self,
        state: &CapturedState,
        trans: &Transaction<'_>,
    ) -> Result<UndoEntry, CrlError> {
        let id = state.concept.id;
        if self.contains(&id) {
            return Err(CrlError::AlreadyExists(id));
        }
        if let Some(uri) = &state.concept.uri {
            if let Some(holder) = self.concept_id_for_uri(uri).filter(|h| *h != id) {
                return Err(CrlError::DuplicateUri {
                    uri: uri.clone(),
                    holder,
                });
            }
        }

        let mut guard = state.cell.write_arc();
        guard.copy_attributes_from(&state.concept);
        self.insert_locked(Arc::clone(&state.cell), &guard);
        self.restore_edge_sets(id, &state.owned, &state.listeners);
        let restored = (*guard).clone();
        trans.adopt_write_guard(id, guard);
        tracing::trace!(%id, "replayed deletion");
        Ok(UndoEntry::new(
            UndoEntryKind::Creation,
            self.capture(&state.cell, restored),
        ))
    }

    /// Restore a concept's prior attributes and the index edges they imply.
    fn replay_change(
        &self,
        state: &CapturedState,
        trans: &Transaction<'_>,
    ) -> Result<UndoEntry, CrlError> {
        let id = state.concept.id;
        let prior = &state.concept;
        trans.write_lock(&id)?;
        let current = trans.view(&id, Concept::clone)?;

        if current.uri != prior.uri {
            if let Some(uri) = &prior.uri {
                self.claim_uri(uri, id)?;
            }
            if let Some(uri) = &current.uri {
                self.release_uri(uri, &id);
            }
        }
        let mirror = self.capture(&state.cell, current.clone());

        if current.owner != prior.owner {
            if let Some(owner) = current.owner {
                self.unlink_owner(id, owner);
            }
            if let Some(owner) = prior.owner {
                self.link_owner(id, owner);
            }
        }
        self.relink_targets(id, &current.pointer_targets(), &prior.pointer_targets());

        trans.view_mut(&id, |c| {
            let version = c.version().max(prior.version()).saturating_add(1);
            c.copy_attributes_from(prior);
            c.version.set(version);
        })?;
        self.restore_edge_sets(id, &state.owned, &state.listeners);
        tracing::trace!(%id, "replayed change");
        Ok(UndoEntry::new(UndoEntryKind::Change, mirror))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttributeName;

    fn recording() -> Universe {
        let uofd = Universe::new();
        uofd.set_recording_undo(true);
        uofd
    }

    #[test]
    fn recording_is_off_by_default() {
        let uofd = Universe::new();
        assert!(!uofd.is_recording_undo());
        let trans = uofd.new_transaction();
        uofd.mark_undo_point();
        uofd.new_element(None, &trans).expect("create");
        assert_eq!(uofd.undo_depth(), 0);
    }

    #[test]
    fn undo_on_empty_stack_is_a_no_op() {
        let uofd = recording();
        let trans = uofd.new_transaction();
        uofd.undo(&trans).expect("undo");
        uofd.redo(&trans).expect("redo");
        assert_eq!(uofd.undo_depth(), 0);
        assert_eq!(uofd.redo_depth(), 0);
    }

    #[test]
    fn undo_creation_then_redo() {
        let uofd = recording();
        let trans = uofd.new_transaction();
        uofd.mark_undo_point();
        let id = uofd.new_element(Some("http://example.com/undo"), &trans).expect("create");

        uofd.undo(&trans).expect("undo");
        assert!(!uofd.contains(&id));
        assert_eq!(uofd.concept_id_for_uri("http://example.com/undo"), None);

        uofd.redo(&trans).expect("redo");
        assert!(uofd.contains(&id));
        assert_eq!(uofd.concept_id_for_uri("http://example.com/undo"), Some(id));
    }

    #[test]
    fn undo_change_restores_label_and_bumps_version() {
        let uofd = recording();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        uofd.set_label(&id, "before", &trans).expect("label");
        uofd.mark_undo_point();
        uofd.set_label(&id, "after", &trans).expect("label");
        let version = uofd.version(&id, &trans).expect("version");

        uofd.undo(&trans).expect("undo");
        let concept = uofd.get_concept(&id, &trans).expect("get");
        assert_eq!(concept.label(), "before");
        assert!(concept.version() > version);

        uofd.redo(&trans).expect("redo");
        assert_eq!(uofd.get_concept(&id, &trans).expect("get").label(), "after");
    }

    #[test]
    fn undo_stops_at_marker() {
        let uofd = recording();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        uofd.mark_undo_point();
        uofd.set_label(&id, "one", &trans).expect("label");
        uofd.mark_undo_point();
        uofd.set_label(&id, "two", &trans).expect("label");

        uofd.undo(&trans).expect("undo");
        assert_eq!(uofd.get_concept(&id, &trans).expect("get").label(), "one");
        uofd.undo(&trans).expect("undo");
        assert_eq!(uofd.get_concept(&id, &trans).expect("get").label(), "");
    }

    #[test]
    fn undo_pointer_change_restores_listeners() {
        let uofd = recording();
        let trans = uofd.new_transaction();
        let target = uofd.new_element(None, &trans).expect("target");
        let reference = uofd.new_reference(None, &trans).expect("reference");
        uofd.mark_undo_point();
        uofd.set_referenced_concept(&reference, Some(target), AttributeName::NoAttribute, &trans)
            .expect("point");
        assert!(uofd.listener_ids(&target).contains(&reference));

        uofd.undo(&trans).expect("undo");
        assert!(uofd.listener_ids(&target).is_empty());
        uofd.redo(&trans).expect("redo");
        assert!(uofd.listener_ids(&target).contains(&reference));
    }

    #[test]
    fn new_edit_clears_redo() {
        let uofd = recording();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        uofd.mark_undo_point();
        uofd.set_label(&id, "one", &trans).expect("label");
        uofd.undo(&trans).expect("undo");
        assert!(uofd.redo_depth() > 0);

        uofd.set_label(&id, "other", &trans).expect("label");
        assert_eq!(uofd.redo_depth(), 0);
    }
}
