//! # Queries
//!
//! Read-only questions about the concept graph: refinement relationships,
//! owned-concept lookups and index verification, plus the replicate-as-
//! refinement builder that is defined in terms of them.
//!
//! Queries read through transient locks and record nothing in the
//! transaction, so they can be freely mixed with later edits.

use crate::concept::Concept;
use crate::primitives::{ELEMENT_URI, LITERAL_URI, REFERENCE_URI, REFINEMENT_URI};
use crate::transaction::Transaction;
use crate::types::{AttributeName, ConceptId, ConceptType, CrlError};
use crate::universe::Universe;
use std::collections::BTreeSet;

impl Universe {
    // =========================================================================
    // ABSTRACTIONS
    // =========================================================================

    /// Abstract concepts of the Refinements that refine `id`.
    fn immediate_abstraction_ids(&self, id: &ConceptId, trans: &Transaction<'_>) -> Vec<ConceptId> {
        self.listener_ids(id)
            .into_iter()
            .filter_map(|listener| {
                trans
                    .view(&listener, |c| match c.concept_type() {
                        ConceptType::Refinement => c.abstract_concept(),
                        _ => None,
                    })
                    .ok()
                    .flatten()
            })
            .filter(|abstraction| abstraction != id)
            .collect()
    }

    /// Every transitive abstraction of `id`.
    pub(crate) fn abstraction_ids(
        &self,
        id: &ConceptId,
        trans: &Transaction<'_>,
    ) -> BTreeSet<ConceptId> {
        let mut found = BTreeSet::new();
        let mut stack = vec![*id];
        while let Some(next) = stack.pop() {
            for abstraction in self.immediate_abstraction_ids(&next, trans) {
                if abstraction != *id && found.insert(abstraction) {
                    stack.push(abstraction);
                }
            }
        }
        found
    }

    /// Concepts `id` is refined from, directly or transitively.
    pub fn find_abstractions(
        &self,
        id: &ConceptId,
        trans: &Transaction<'_>,
    ) -> BTreeSet<ConceptId> {
        self.abstraction_ids(id, trans)
    }

    /// Concepts `id` is directly refined from.
    pub fn find_immediate_abstractions(
        &self,
        id: &ConceptId,
        trans: &Transaction<'_>,
    ) -> BTreeSet<ConceptId> {
        self.immediate_abstraction_ids(id, trans).into_iter().collect()
    }

    /// Whether `id` is a refinement of `abstraction`.
    ///
    /// Every concept refines the core Element, and each concept refines the
    /// core concept matching its own type.
    pub fn is_refinement_of(
        &self,
        id: &ConceptId,
        abstraction: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<bool, CrlError> {
        let concept_type = trans.view(id, Concept::concept_type)?;
        let abstraction_uri = trans.view(abstraction, |c| c.uri.clone())?;
        match abstraction_uri.as_deref() {
            Some(ELEMENT_URI) => return Ok(true),
            Some(LITERAL_URI) if concept_type == ConceptType::Literal => return Ok(true),
            Some(REFERENCE_URI) if concept_type == ConceptType::Reference => return Ok(true),
            Some(REFINEMENT_URI) if concept_type == ConceptType::Refinement => return Ok(true),
            _ => {}
        }
        Ok(self.abstraction_ids(id, trans).contains(abstraction))
    }

    /// Whether `id` is a refinement of the concept carrying `uri`.
    ///
    /// False when no concept carries the URI.
    pub fn is_refinement_of_uri(
        &self,
        id: &ConceptId,
        uri: &str,
        trans: &Transaction<'_>,
    ) -> Result<bool, CrlError> {
        match self.concept_id_for_uri(uri) {
            Some(abstraction) => self.is_refinement_of(id, &abstraction, trans),
            None => Ok(false),
        }
    }

    // =========================================================================
    // OWNED CONCEPTS
    // =========================================================================

    /// Children of `owner` that refine the concept carrying `uri`.
    pub fn owned_concepts_refined_from_uri(
        &self,
        owner: &ConceptId,
        uri: &str,
        trans: &Transaction<'_>,
    ) -> Result<BTreeSet<ConceptId>, CrlError> {
        let mut found = BTreeSet::new();
        for child in self.owned_concept_ids(owner) {
            if self.is_refinement_of_uri(&child, uri, trans)? {
                found.insert(child);
            }
        }
        Ok(found)
    }

    pub fn first_owned_concept_refined_from_uri(
        &self,
        owner: &ConceptId,
        uri: &str,
        trans: &Transaction<'_>,
    ) -> Result<Option<ConceptId>, CrlError> {
        Ok(self
            .owned_concepts_refined_from_uri(owner, uri, trans)?
            .into_iter()
            .next())
    }

    pub fn first_owned_concept_with_uri(&self, owner: &ConceptId, uri: &str) -> Option<ConceptId> {
        self.concept_id_for_uri(uri)
            .filter(|id| self.owned_concept_ids(owner).contains(id))
    }

    /// The value of the attribute a Reference points at, rendered as text.
    ///
    /// `None` when the Reference has no target or names no attribute.
    pub fn referenced_attribute_value(
        &self,
        reference: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<Option<String>, CrlError> {
        let (target, attribute) =
            trans.view(reference, |c| (c.referenced_concept(), c.referenced_attribute()))?;
        let Some(target) = target else {
            return Ok(None);
        };
        let id_text = |id: Option<ConceptId>| id.map(|i| i.to_string());
        trans.view(&target, |c| match attribute {
            AttributeName::NoAttribute => None,
            AttributeName::OwningConceptId => id_text(c.owner()),
            AttributeName::ReferencedConceptId => id_text(c.referenced_concept()),
            AttributeName::AbstractConceptId => id_text(c.abstract_concept()),
            AttributeName::RefinedConceptId => id_text(c.refined_concept()),
            AttributeName::LiteralValue => c.literal_value().map(str::to_string),
            AttributeName::Label => Some(c.label().to_string()),
            AttributeName::Definition => Some(c.definition().to_string()),
        })
    }

    // =========================================================================
    // REPLICATION
    // =========================================================================

    /// Create a concept of the original's type and replicate the original's
    /// structure into it as refinements.
    pub fn create_replicate_as_refinement(
        &self,
        original: &ConceptId,
        uri: Option<&str>,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        let concept_type = trans.view(original, Concept::concept_type)?;
        let replicate = self.new_concept(concept_type, uri, trans)?;
        self.replicate_as_refinement(original, &replicate, trans)?;
        Ok(replicate)
    }

    /// Make `replicate` mirror `original` and its non-Refinement descendants,
    /// each replica refining its original.
    ///
    /// Idempotent: replicas that already refine their original are reused.
    pub fn replicate_as_refinement(
        &self,
        original: &ConceptId,
        replicate: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        let label = trans.view(original, |c| c.label.clone())?;
        self.set_label(replicate, &label, trans)?;
        if !self.is_refinement_of(replicate, original, trans)? {
            self.add_refinement_link(original, replicate, &label, trans)?;
        }

        for original_child in self.owned_concept_ids(original) {
            let (child_type, child_label) =
                trans.view(&original_child, |c| (c.concept_type(), c.label.clone()))?;
            if child_type == ConceptType::Refinement {
                continue;
            }

            let existing = self
                .owned_concept_ids(replicate)
                .into_iter()
                .find(|candidate| self.abstraction_ids(candidate, trans).contains(&original_child));
            let replicate_child = match existing {
                Some(child) => child,
                None => {
                    let child = self.new_concept(child_type, None, trans)?;
                    self.set_owning_concept(&child, Some(*replicate), trans)?;
                    self.add_refinement_link(&original_child, &child, &child_label, trans)?;
                    self.set_label(&child, &child_label, trans)?;
                    child
                }
            };
            self.replicate_as_refinement(&original_child, &replicate_child, trans)?;
        }
        Ok(())
    }

    /// Create a Refinement owned by `refined` from `abstract_id` to `refined`.
    fn add_refinement_link(
        &self,
        abstract_id: &ConceptId,
        refined: &ConceptId,
        label: &str,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        let refinement = self.new_refinement(None, trans)?;
        self.set_owning_concept(&refinement, Some(*refined), trans)?;
        self.set_abstract_concept(&refinement, Some(*abstract_id), trans)?;
        self.set_refined_concept(&refinement, Some(*refined), trans)?;
        self.set_label(&refinement, &format!("Refines {}", label), trans)?;
        Ok(refinement)
    }

    // =========================================================================
    // VERIFICATION
    // =========================================================================

    /// Check that every derived index agrees with the concepts.
    pub fn verify_indexes(&self, trans: &Transaction<'_>) -> Result<(), CrlError> {
        for id in self.concept_ids() {
            let concept = trans.view(&id, Concept::clone)?;
            if let Some(owner) = concept.owner {
                if self.contains(&owner) && !self.owned.contains(&owner, &id) {
                    return Err(CrlError::IndexInconsistency(format!(
                        "{} is missing from the owned set of {}",
                        id, owner
                    )));
                }
            }
            for target in concept.pointer_targets() {
                if self.contains(&target) && !self.listeners.contains(&target, &id) {
                    return Err(CrlError::IndexInconsistency(format!(
                        "{} is missing from the listener set of {}",
                        id, target
                    )));
                }
            }
            if let Some(uri) = &concept.uri {
                if self.concept_id_for_uri(uri) != Some(id) {
                    return Err(CrlError::IndexInconsistency(format!(
                        "uri {} does not map to {}",
                        uri, id
                    )));
                }
            }
        }

        for (owner, children) in self.owned.entries() {
            for child in children {
                let actual = trans.view(&child, Concept::owner).ok().flatten();
                if actual != Some(owner) {
                    return Err(CrlError::IndexInconsistency(format!(
                        "{} is listed as owned by {} but is not",
                        child, owner
                    )));
                }
            }
        }
        for (target, holders) in self.listeners.entries() {
            for holder in holders {
                let points = trans
                    .view(&holder, |c| c.pointer_targets().contains(&target))
                    .unwrap_or(false);
                if !points {
                    return Err(CrlError::IndexInconsistency(format!(
                        "{} is listed as listening to {} but does not point at it",
                        holder, target
                    )));
                }
            }
        }
        for (uri, id) in self.uri_entries() {
            let actual = trans.view(&id, |c| c.uri.clone()).ok().flatten();
            if actual.as_deref() != Some(uri.as_str()) {
                return Err(CrlError::IndexInconsistency(format!(
                    "uri {} is registered for {} which does not carry it",
                    uri, id
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
