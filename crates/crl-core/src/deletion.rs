//! # Deletion
//!
//! Removing a concept removes its whole ownership subtree. Before anything is
//! touched the complete set is validated, so a rejected delete leaves the
//! Universe exactly as it was.
//!
//! Concepts outside the deleted set that point into it are told about the
//! removal and then have those pointers cleared through the regular setters,
//! which records their edits for undo and drives the usual cascade.

use crate::concept::Concept;
use crate::mutation::ensure_editable;
use crate::notification::{ChangeNotification, NatureOfChange};
use crate::transaction::Transaction;
use crate::types::{ConceptId, CrlError};
use crate::undo::UndoEntryKind;
use crate::universe::Universe;
use std::collections::BTreeSet;
use std::sync::Arc;

impl Universe {
    /// Delete a concept and everything it owns.
    pub fn delete_concept(&self, id: &ConceptId, trans: &Transaction<'_>) -> Result<(), CrlError> {
        self.delete_concepts(&BTreeSet::from([*id]), trans)
    }

    /// Delete a set of concepts and everything they own.
    pub fn delete_concepts(
        &self,
        ids: &BTreeSet<ConceptId>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.check_transaction(trans)?;

        let mut doomed = BTreeSet::new();
        for id in ids {
            if !self.contains(id) {
                return Err(CrlError::NotFound(*id));
            }
            doomed.insert(*id);
            doomed.extend(self.descendant_ids(id));
        }
        self.validate_deletion(&doomed, trans)?;

        for id in &doomed {
            trans.write_lock(id)?;
        }

        // Pointers from outside the set.
        for id in &doomed {
            for listener in self.listener_ids(id) {
                if doomed.contains(&listener) {
                    continue;
                }
                let state = trans.view(id, Concept::clone).ok();
                let removed = Arc::new(ChangeNotification::new(
                    NatureOfChange::UofDConceptRemoved,
                    *id,
                    state.clone(),
                    None,
                ));
                let indicated = ChangeNotification::forwarded(
                    NatureOfChange::IndicatedConceptChanged,
                    *id,
                    state,
                    removed,
                );
                self.dispatch(listener, Arc::new(indicated), trans)?;
                self.clear_pointers_to(&listener, id, trans)?;
            }
        }

        // Owners outside the set.
        for id in &doomed {
            let owner = trans.view(id, Concept::owner)?;
            if owner.is_some_and(|o| !doomed.contains(&o)) {
                self.set_owning_concept(id, None, trans)?;
            }
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for id in &doomed {
            let cell = self.cell(id).ok_or(CrlError::NotFound(*id))?;
            let snapshot = trans.view(id, Concept::clone)?;
            self.record_undo(UndoEntryKind::Deletion, &cell, &snapshot);
            removed.push(snapshot);
        }
        for snapshot in &removed {
            self.unindex(snapshot);
            trans.forget(&snapshot.id);
        }
        tracing::debug!(count = removed.len(), "concepts deleted");

        for snapshot in removed {
            let id = snapshot.id;
            let notification = ChangeNotification::new(
                NatureOfChange::UofDConceptRemoved,
                id,
                Some(snapshot),
                None,
            );
            self.dispatch(self.universe_concept_id(), Arc::new(notification), trans)?;
        }
        Ok(())
    }

    /// Check every policy a deletion touches.
    fn validate_deletion(
        &self,
        doomed: &BTreeSet<ConceptId>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        for id in doomed {
            if trans.is_read_locked(id) {
                return Err(CrlError::LockUpgrade(*id));
            }
            let concept = trans.view(id, Concept::clone)?;
            ensure_editable(&concept)?;

            if let Some(owner) = concept.owner.filter(|o| !doomed.contains(o)) {
                if trans.is_read_locked(&owner) {
                    return Err(CrlError::LockUpgrade(owner));
                }
                if !trans.view(&owner, Concept::is_editable).unwrap_or(true) {
                    return Err(CrlError::ReadOnlyOwner {
                        concept: *id,
                        owner,
                    });
                }
            }

            for listener in self.listener_ids(id) {
                if doomed.contains(&listener) {
                    continue;
                }
                if trans.is_read_locked(&listener) {
                    return Err(CrlError::LockUpgrade(listener));
                }
                let state = trans.view(&listener, Concept::clone)?;
                ensure_editable(&state)?;
            }
        }
        Ok(())
    }

    /// Clear every pointer field of `holder` that names `target`.
    ///
    /// A Reference keeps its attribute name.
    fn clear_pointers_to(
        &self,
        holder: &ConceptId,
        target: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        let (referenced, attribute, abstract_concept, refined_concept) = trans.view(holder, |c| {
            (
                c.referenced_concept(),
                c.referenced_attribute(),
                c.abstract_concept(),
                c.refined_concept(),
            )
        })?;
        if referenced == Some(*target) {
            self.set_referenced_concept(holder, None, attribute, trans)?;
        }
        if abstract_concept == Some(*target) {
            self.set_abstract_concept(holder, None, trans)?;
        }
        if refined_concept == Some(*target) {
            self.set_refined_concept(holder, None, trans)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{NotificationRecorder, Observer};
    use crate::primitives::ELEMENT_URI;
    use crate::types::AttributeName;

    #[test]
    fn delete_removes_subtree() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let root = uofd.new_element(Some("http://example.com/root"), &trans).expect("root");
        let child = uofd.new_element(None, &trans).expect("child");
        uofd.set_owning_concept(&child, Some(root), &trans).expect("own");
        let count = uofd.concept_count();

        uofd.delete_concept(&root, &trans).expect("delete");
        assert!(!uofd.contains(&root));
        assert!(!uofd.contains(&child));
        assert_eq!(uofd.concept_count(), count - 2);
        assert_eq!(uofd.concept_id_for_uri("http://example.com/root"), None);
        assert!(uofd.pending_edges().is_empty());
    }

    #[test]
    fn delete_detaches_from_external_owner() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let owner = uofd.new_element(None, &trans).expect("owner");
        let child = uofd.new_element(None, &trans).expect("child");
        uofd.set_owning_concept(&child, Some(owner), &trans).expect("own");

        uofd.delete_concept(&child, &trans).expect("delete");
        assert!(uofd.owned_concept_ids(&owner).is_empty());
    }

    #[test]
    fn delete_clears_inbound_reference() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let target = uofd.new_element(None, &trans).expect("target");
        let reference = uofd.new_reference(None, &trans).expect("reference");
        uofd.set_referenced_concept(&reference, Some(target), AttributeName::Label, &trans)
            .expect("point");

        let recorder = Arc::new(NotificationRecorder::new());
        let observer: Arc<dyn Observer> = recorder.clone();
        uofd.register_concept_observer(&reference, observer).expect("register");

        uofd.delete_concept(&target, &trans).expect("delete");
        let concept = uofd.get_concept(&reference, &trans).expect("reference");
        assert_eq!(concept.referenced_concept(), None);
        assert_eq!(concept.referenced_attribute(), AttributeName::Label);
        assert_eq!(
            recorder.natures_for(&reference),
            vec![
                NatureOfChange::IndicatedConceptChanged,
                NatureOfChange::ReferencedConceptChanged,
            ]
        );
    }

    #[test]
    fn core_and_read_only_cannot_be_deleted() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let element = uofd.concept_id_for_uri(ELEMENT_URI).expect("core");
        assert!(matches!(
            uofd.delete_concept(&element, &trans),
            Err(CrlError::CoreConcept(_))
        ));

        let id = uofd.new_element(None, &trans).expect("create");
        uofd.set_read_only(&id, true, &trans).expect("read-only");
        assert!(matches!(
            uofd.delete_concept(&id, &trans),
            Err(CrlError::NotEditable(_))
        ));
        assert!(uofd.contains(&id));
    }

    #[test]
    fn read_only_listener_blocks_delete() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let target = uofd.new_element(None, &trans).expect("target");
        let reference = uofd.new_reference(None, &trans).expect("reference");
        uofd.set_referenced_concept(&reference, Some(target), AttributeName::NoAttribute, &trans)
            .expect("point");
        uofd.set_read_only(&reference, true, &trans).expect("read-only");

        assert!(matches!(
            uofd.delete_concept(&target, &trans),
            Err(CrlError::NotEditable(found)) if found == reference
        ));
        assert!(uofd.contains(&target));
    }

    #[test]
    fn missing_concept_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        assert!(matches!(
            uofd.delete_concept(&ConceptId::generate(), &trans),
            Err(CrlError::NotFound(_))
        ));
    }

    #[test]
    fn read_locked_concept_cannot_be_deleted() {
        let uofd = Universe::new();
        let id = {
            let trans = uofd.new_transaction();
            uofd.new_element(None, &trans).expect("create")
        };
        let trans = uofd.new_transaction();
        uofd.get_concept(&id, &trans).expect("read");
        assert!(matches!(
            uofd.delete_concept(&id, &trans),
            Err(CrlError::LockUpgrade(_))
        ));
    }

    #[test]
    fn deletion_is_undoable() {
        let uofd = Universe::new();
        uofd.set_recording_undo(true);
        let trans = uofd.new_transaction();
        let owner = uofd.new_element(None, &trans).expect("owner");
        let child = uofd.new_element(None, &trans).expect("child");
        let reference = uofd.new_reference(None, &trans).expect("reference");
        uofd.set_owning_concept(&child, Some(owner), &trans).expect("own");
        uofd.set_referenced_concept(&reference, Some(child), AttributeName::NoAttribute, &trans)
            .expect("point");

        uofd.mark_undo_point();
        uofd.delete_concept(&child, &trans).expect("delete");
        uofd.undo(&trans).expect("undo");

        assert!(uofd.contains(&child));
        assert!(uofd.owned_concept_ids(&owner).contains(&child));
        assert!(uofd.listener_ids(&child).contains(&reference));
        let concept = uofd.get_concept(&reference, &trans).expect("reference");
        assert_eq!(concept.referenced_concept(), Some(child));
    }
}
