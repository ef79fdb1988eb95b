//! # Mutation
//!
//! Every attribute setter follows the same sequence:
//!
//! 1. Write-lock the concept in the transaction.
//! 2. Validate against a snapshot; policy failures return before anything changes.
//! 3. Return early if the value is unchanged.
//! 4. Record the snapshot for undo.
//! 5. Apply the change and increment the version.
//! 6. Update the derived indexes.
//! 7. Dispatch the change notification, which drives the cascade.

use crate::concept::{Concept, ConceptKind};
use crate::notification::{ChangeNotification, NatureOfChange};
use crate::transaction::Transaction;
use crate::types::{AttributeName, ConceptId, ConceptType, CrlError, validate_uri};
use crate::undo::UndoEntryKind;
use crate::universe::Universe;
use std::sync::Arc;

/// A concept may be changed only when it is neither core nor read-only.
pub(crate) fn ensure_editable(concept: &Concept) -> Result<(), CrlError> {
    if concept.is_core {
        Err(CrlError::CoreConcept(concept.id))
    } else if concept.read_only {
        Err(CrlError::NotEditable(concept.id))
    } else {
        Ok(())
    }
}

fn ensure_type(concept: &Concept, expected: ConceptType) -> Result<(), CrlError> {
    let actual = concept.concept_type();
    if actual == expected {
        Ok(())
    } else {
        Err(CrlError::TypeMismatch {
            concept: concept.id,
            expected,
            actual,
        })
    }
}

impl Universe {
    // =========================================================================
    // PLUMBING
    // =========================================================================

    /// Lock, validate and apply one attribute change.
    ///
    /// `change` validates against the current state and edits the draft.
    fn edit(
        &self,
        id: &ConceptId,
        nature: NatureOfChange,
        trans: &Transaction<'_>,
        change: impl FnOnce(&Concept, &mut Concept) -> Result<(), CrlError>,
    ) -> Result<(), CrlError> {
        self.check_transaction(trans)?;
        trans.write_lock(id)?;
        let before = trans.view(id, Concept::clone)?;
        let mut draft = before.clone();
        change(&before, &mut draft)?;
        if draft.matches_ignoring_version(&before) {
            return Ok(());
        }
        self.commit(id, nature, before, &draft, trans)
    }

    fn commit(
        &self,
        id: &ConceptId,
        nature: NatureOfChange,
        before: Concept,
        draft: &Concept,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if before.uri != draft.uri {
            if let Some(uri) = &draft.uri {
                self.claim_uri(uri, *id)?;
            }
            if let Some(uri) = &before.uri {
                self.release_uri(uri, id);
            }
        }

        let cell = self.cell(id).ok_or(CrlError::NotFound(*id))?;
        self.record_undo(UndoEntryKind::Change, &cell, &before);

        let after = trans.view_mut(id, |c| {
            let version = c.version();
            c.copy_attributes_from(draft);
            c.version.set(version);
            c.version.increment();
            c.clone()
        })?;

        if before.owner != after.owner {
            if let Some(old) = before.owner {
                self.unlink_owner(*id, old);
            }
            if let Some(new) = after.owner {
                self.link_owner(*id, new);
            }
        }
        self.relink_targets(*id, &before.pointer_targets(), &after.pointer_targets());

        tracing::trace!(%id, %nature, version = after.version(), "concept changed");
        let notification = ChangeNotification::new(nature, *id, Some(before), Some(after));
        self.dispatch(*id, Arc::new(notification), trans)
    }

    /// Check a prospective pointer target.
    fn pointer_target_type(
        &self,
        target: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<ConceptType, CrlError> {
        if !self.contains(target) {
            return Err(CrlError::NotFound(*target));
        }
        trans.view(target, Concept::concept_type)
    }

    // =========================================================================
    // COMMON ATTRIBUTES
    // =========================================================================

    pub fn set_label(
        &self,
        id: &ConceptId,
        label: &str,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.edit(id, NatureOfChange::ConceptChanged, trans, |before, draft| {
            ensure_editable(before)?;
            draft.label = label.to_string();
            Ok(())
        })
    }

    pub fn set_definition(
        &self,
        id: &ConceptId,
        definition: &str,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.edit(id, NatureOfChange::ConceptChanged, trans, |before, draft| {
            ensure_editable(before)?;
            draft.definition = definition.to_string();
            Ok(())
        })
    }

    /// Set or clear a concept's URI.
    ///
    /// The identifier does not change. Fails with `DuplicateUri` if another
    /// concept holds the URI, leaving every index untouched.
    pub fn set_uri(
        &self,
        id: &ConceptId,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if let Some(uri) = uri {
            validate_uri(uri)?;
            if let Some(holder) = self.concept_id_for_uri(uri).filter(|h| h != id) {
                return Err(CrlError::DuplicateUri {
                    uri: uri.to_string(),
                    holder,
                });
            }
        }
        self.edit(id, NatureOfChange::ConceptChanged, trans, |before, draft| {
            ensure_editable(before)?;
            draft.uri = uri.map(str::to_string);
            Ok(())
        })
    }

    /// Toggle a concept's read-only flag.
    ///
    /// Core concepts are always rejected, as is any concept whose owner is
    /// read-only.
    pub fn set_read_only(
        &self,
        id: &ConceptId,
        value: bool,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.edit(id, NatureOfChange::ConceptChanged, trans, |before, draft| {
            if before.is_core {
                return Err(CrlError::CoreConcept(*id));
            }
            if let Some(owner) = before.owner {
                if trans.view(&owner, Concept::is_read_only).unwrap_or(false) {
                    return Err(CrlError::ReadOnlyOwner {
                        concept: *id,
                        owner,
                    });
                }
            }
            draft.read_only = value;
            Ok(())
        })
    }

    /// Set the read-only flag on a concept and all its descendants.
    ///
    /// Children are locked before their owner, and unlocked after it.
    pub fn set_read_only_recursively(
        &self,
        id: &ConceptId,
        value: bool,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if value {
            for child in self.owned_concept_ids(id) {
                self.set_read_only_recursively(&child, value, trans)?;
            }
            self.set_read_only(id, value, trans)
        } else {
            self.set_read_only(id, value, trans)?;
            for child in self.owned_concept_ids(id) {
                self.set_read_only_recursively(&child, value, trans)?;
            }
            Ok(())
        }
    }

    /// Mark a concept as core. This cannot be undone through the setters.
    pub fn set_is_core(&self, id: &ConceptId, trans: &Transaction<'_>) -> Result<(), CrlError> {
        self.edit(id, NatureOfChange::ConceptChanged, trans, |_, draft| {
            draft.is_core = true;
            Ok(())
        })
    }

    pub fn set_is_core_recursively(
        &self,
        id: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.set_is_core(id, trans)?;
        for child in self.owned_concept_ids(id) {
            self.set_is_core_recursively(&child, trans)?;
        }
        Ok(())
    }

    // =========================================================================
    // OWNERSHIP
    // =========================================================================

    /// Move a concept under a new owner, or detach it with `None`.
    ///
    /// Both the previous and the new owner must be editable. A concept cannot
    /// own itself or one of its ancestors.
    pub fn set_owning_concept(
        &self,
        id: &ConceptId,
        owner: Option<ConceptId>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if let Some(new_owner) = owner {
            if new_owner == *id {
                return Err(CrlError::SelfOwnership(*id));
            }
            if !self.contains(&new_owner) {
                return Err(CrlError::NotFound(new_owner));
            }
        }
        self.edit(id, NatureOfChange::OwningConceptChanged, trans, |before, draft| {
            ensure_editable(before)?;
            if before.owner == owner {
                return Ok(());
            }
            for checked in before.owner.iter().chain(owner.iter()) {
                let editable = trans.view(checked, Concept::is_editable).unwrap_or(true);
                if !editable {
                    return Err(CrlError::ReadOnlyOwner {
                        concept: *id,
                        owner: *checked,
                    });
                }
            }
            if let Some(new_owner) = owner {
                if self.descendant_ids(id).contains(&new_owner) {
                    return Err(CrlError::OwnershipCycle(new_owner));
                }
            }
            draft.owner = owner;
            Ok(())
        })
    }

    // =========================================================================
    // TYPE-SPECIFIC ATTRIBUTES
    // =========================================================================

    pub fn set_literal_value(
        &self,
        id: &ConceptId,
        value: &str,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.edit(id, NatureOfChange::ConceptChanged, trans, |before, draft| {
            ensure_type(before, ConceptType::Literal)?;
            ensure_editable(before)?;
            draft.kind = ConceptKind::Literal {
                value: value.to_string(),
            };
            Ok(())
        })
    }

    /// Point a Reference at `target`, naming the attribute it refers to.
    ///
    /// An attribute that only exists on one concept type requires a target of
    /// that type.
    pub fn set_referenced_concept(
        &self,
        id: &ConceptId,
        target: Option<ConceptId>,
        attribute: AttributeName,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if let Some(target) = target {
            let target_type = self.pointer_target_type(&target, trans)?;
            if let Some(required) = attribute.required_target_type() {
                if required != target_type {
                    return Err(CrlError::AttributeMismatch {
                        attribute,
                        target,
                        target_type,
                    });
                }
            }
        }
        self.edit(id, NatureOfChange::ReferencedConceptChanged, trans, |before, draft| {
            ensure_type(before, ConceptType::Reference)?;
            ensure_editable(before)?;
            draft.kind = ConceptKind::Reference {
                referenced: target,
                attribute,
            };
            Ok(())
        })
    }

    pub fn set_abstract_concept(
        &self,
        id: &ConceptId,
        target: Option<ConceptId>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if let Some(target) = target {
            self.pointer_target_type(&target, trans)?;
        }
        self.edit(id, NatureOfChange::AbstractConceptChanged, trans, |before, draft| {
            ensure_type(before, ConceptType::Refinement)?;
            ensure_editable(before)?;
            draft.kind = ConceptKind::Refinement {
                abstract_concept: target,
                refined_concept: before.refined_concept(),
            };
            Ok(())
        })
    }

    pub fn set_refined_concept(
        &self,
        id: &ConceptId,
        target: Option<ConceptId>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if let Some(target) = target {
            self.pointer_target_type(&target, trans)?;
        }
        self.edit(id, NatureOfChange::RefinedConceptChanged, trans, |before, draft| {
            ensure_type(before, ConceptType::Refinement)?;
            ensure_editable(before)?;
            draft.kind = ConceptKind::Refinement {
                abstract_concept: before.abstract_concept(),
                refined_concept: target,
            };
            Ok(())
        })
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

    #[test]
    fn set_owning_concept_updates_index_and_notifies() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let a = uofd.new_element(None, &trans).expect("a");
        let b = uofd.new_element(None, &trans).expect("b");
        let recorder = Arc::new(NotificationRecorder::new());
        let observer: Arc<dyn Observer> = recorder.clone();
        uofd.register_concept_observer(&a, observer).expect("register");

        let version = uofd.version(&b, &trans).expect("version");
        uofd.set_owning_concept(&b, Some(a), &trans).expect("own");

        assert!(uofd.owned_concept_ids(&a).contains(&b));
        assert_eq!(uofd.version(&b, &trans).expect("version"), version + 1);
        assert!(recorder.received(&a, NatureOfChange::ChildChanged));
    }

    #[test]
    fn unchanged_value_is_a_no_op() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        uofd.set_label(&id, "same", &trans).expect("label");
        let version = uofd.version(&id, &trans).expect("version");
        uofd.set_label(&id, "same", &trans).expect("label again");
        assert_eq!(uofd.version(&id, &trans).expect("version"), version);
    }

    #[test]
    fn self_ownership_and_cycles_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let a = uofd.new_element(None, &trans).expect("a");
        let b = uofd.new_element(None, &trans).expect("b");
        uofd.set_owning_concept(&b, Some(a), &trans).expect("own");

        assert!(matches!(
            uofd.set_owning_concept(&a, Some(a), &trans),
            Err(CrlError::SelfOwnership(_))
        ));
        assert!(matches!(
            uofd.set_owning_concept(&a, Some(b), &trans),
            Err(CrlError::OwnershipCycle(found)) if found == b
        ));
    }

    #[test]
    fn read_only_blocks_edits() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        uofd.set_read_only(&id, true, &trans).expect("read-only");
        assert!(matches!(
            uofd.set_label(&id, "x", &trans),
            Err(CrlError::NotEditable(_))
        ));
        uofd.set_read_only(&id, false, &trans).expect("editable again");
        uofd.set_label(&id, "x", &trans).expect("label");
    }

    #[test]
    fn read_only_owner_blocks_child_toggle() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let owner = uofd.new_element(None, &trans).expect("owner");
        let child = uofd.new_element(None, &trans).expect("child");
        uofd.set_owning_concept(&child, Some(owner), &trans).expect("own");
        uofd.set_read_only(&owner, true, &trans).expect("read-only");

        for value in [true, false] {
            assert!(matches!(
                uofd.set_read_only(&child, value, &trans),
                Err(CrlError::ReadOnlyOwner { owner: found, .. }) if found == owner
            ));
        }
    }

    #[test]
    fn read_only_recursively_round_trip() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let root = uofd.new_element(None, &trans).expect("root");
        let mid = uofd.new_element(None, &trans).expect("mid");
        let leaf = uofd.new_element(None, &trans).expect("leaf");
        uofd.set_owning_concept(&mid, Some(root), &trans).expect("own");
        uofd.set_owning_concept(&leaf, Some(mid), &trans).expect("own");

        uofd.set_read_only_recursively(&root, true, &trans).expect("lock tree");
        for id in [root, mid, leaf] {
            assert!(uofd.get_concept(&id, &trans).expect("get").is_read_only());
        }
        uofd.set_read_only_recursively(&root, false, &trans).expect("unlock tree");
        for id in [root, mid, leaf] {
            assert!(!uofd.get_concept(&id, &trans).expect("get").is_read_only());
        }
    }

    #[test]
    fn core_concepts_are_immutable() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let element = uofd.concept_id_for_uri(ELEMENT_URI).expect("core");
        assert!(matches!(
            uofd.set_label(&element, "x", &trans),
            Err(CrlError::CoreConcept(_))
        ));
        assert!(matches!(
            uofd.set_read_only(&element, true, &trans),
            Err(CrlError::CoreConcept(_))
        ));

        let id = uofd.new_element(None, &trans).expect("create");
        uofd.set_is_core(&id, &trans).expect("core");
        assert!(matches!(
            uofd.set_label(&id, "x", &trans),
            Err(CrlError::CoreConcept(_))
        ));
    }

    #[test]
    fn set_uri_rejects_duplicates_without_side_effects() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let a = uofd.new_element(Some("http://example.com/a"), &trans).expect("a");
        let b = uofd.new_element(None, &trans).expect("b");
        let version = uofd.version(&b, &trans).expect("version");

        assert!(matches!(
            uofd.set_uri(&b, Some("http://example.com/a"), &trans),
            Err(CrlError::DuplicateUri { holder, .. }) if holder == a
        ));
        assert_eq!(uofd.version(&b, &trans).expect("version"), version);
        assert_eq!(uofd.concept_id_for_uri("http://example.com/a"), Some(a));

        uofd.set_uri(&b, Some("http://example.com/b"), &trans).expect("set");
        uofd.set_uri(&b, None, &trans).expect("clear");
        assert_eq!(uofd.concept_id_for_uri("http://example.com/b"), None);
    }

    #[test]
    fn type_specific_setters_check_type() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let element = uofd.new_element(None, &trans).expect("element");
        assert!(matches!(
            uofd.set_literal_value(&element, "v", &trans),
            Err(CrlError::TypeMismatch { expected: ConceptType::Literal, .. })
        ));

        let literal = uofd.new_literal(None, &trans).expect("literal");
        uofd.set_literal_value(&literal, "v", &trans).expect("value");
        let concept = uofd.get_concept(&literal, &trans).expect("get");
        assert_eq!(concept.literal_value(), Some("v"));
    }

    #[test]
    fn reference_attribute_must_exist_on_target() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let element = uofd.new_element(None, &trans).expect("element");
        let reference = uofd.new_reference(None, &trans).expect("reference");

        assert!(matches!(
            uofd.set_referenced_concept(
                &reference,
                Some(element),
                AttributeName::LiteralValue,
                &trans,
            ),
            Err(CrlError::AttributeMismatch { .. })
        ));
        uofd.set_referenced_concept(&reference, Some(element), AttributeName::Label, &trans)
            .expect("point");
        assert!(uofd.listener_ids(&element).contains(&reference));

        uofd.set_referenced_concept(&reference, None, AttributeName::Label, &trans).expect("clear");
        assert!(uofd.listener_ids(&element).is_empty());
    }

    #[test]
    fn refinement_pointing_twice_at_same_target() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let target = uofd.new_element(None, &trans).expect("target");
        let refinement = uofd.new_refinement(None, &trans).expect("refinement");
        uofd.set_abstract_concept(&refinement, Some(target), &trans).expect("abstract");
        uofd.set_refined_concept(&refinement, Some(target), &trans).expect("refined");
        uofd.set_abstract_concept(&refinement, None, &trans).expect("clear abstract");

        assert!(uofd.listener_ids(&target).contains(&refinement));
        uofd.set_refined_concept(&refinement, None, &trans).expect("clear refined");
        assert!(uofd.listener_ids(&target).is_empty());
    }
}
