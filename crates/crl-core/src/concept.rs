//! # Concept
//!
//! The vertex type of the Universe of Discourse.
//!
//! A `Concept` carries the attributes every concept has (identity, label,
//! definition, URI, flags, version, owner) plus a `ConceptKind` payload that
//! holds the attributes specific to its variant. Concepts never hold
//! references to one another; every relationship is a `ConceptId` that the
//! Universe resolves through its indexes.

use crate::types::{AttributeName, ConceptId, ConceptType};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// VERSION COUNTER
// =============================================================================

/// Monotonic per-concept version.
///
/// Atomic so that the cascade can bump the version of a concept it only holds
/// a shared lock on.
#[derive(Debug, Default)]
pub struct VersionCounter(AtomicU64);

impl VersionCounter {
    /// Create a counter starting at `value`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment by one and return the new value.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    /// Overwrite the value. Used by undo replay and recovery only.
    pub(crate) fn set(&self, value: u64) {
        self.0.store(value, Ordering::SeqCst);
    }
}

impl Clone for VersionCounter {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl PartialEq for VersionCounter {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for VersionCounter {}

// =============================================================================
// CONCEPT KIND
// =============================================================================

/// Variant-specific payload of a concept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConceptKind {
    Element,
    Literal {
        value: String,
    },
    Reference {
        referenced: Option<ConceptId>,
        attribute: AttributeName,
    },
    Refinement {
        abstract_concept: Option<ConceptId>,
        refined_concept: Option<ConceptId>,
    },
}

impl ConceptKind {
    /// Empty payload for a concept type.
    #[must_use]
    pub const fn empty(concept_type: ConceptType) -> Self {
        match concept_type {
            ConceptType::Element => Self::Element,
            ConceptType::Literal => Self::Literal {
                value: String::new(),
            },
            ConceptType::Reference => Self::Reference {
                referenced: None,
                attribute: AttributeName::NoAttribute,
            },
            ConceptType::Refinement => Self::Refinement {
                abstract_concept: None,
                refined_concept: None,
            },
        }
    }

    #[must_use]
    pub const fn concept_type(&self) -> ConceptType {
        match self {
            Self::Element => ConceptType::Element,
            Self::Literal { .. } => ConceptType::Literal,
            Self::Reference { .. } => ConceptType::Reference,
            Self::Refinement { .. } => ConceptType::Refinement,
        }
    }
}

// =============================================================================
// CONCEPT
// =============================================================================

/// A node in the Universe of Discourse.
///
/// `Clone` produces a detached snapshot; cloning never changes the version.
#[derive(Debug, Clone)]
pub struct Concept {
    pub(crate) id: ConceptId,
    pub(crate) label: String,
    pub(crate) definition: String,
    pub(crate) uri: Option<String>,
    pub(crate) is_core: bool,
    pub(crate) read_only: bool,
    pub(crate) version: VersionCounter,
    pub(crate) owner: Option<ConceptId>,
    pub(crate) kind: ConceptKind,
}

impl Concept {
    /// Create a fresh concept at version 0.
    #[must_use]
    pub fn new(id: ConceptId, concept_type: ConceptType, uri: Option<String>) -> Self {
        Self {
            id,
            label: String::new(),
            definition: String::new(),
            uri,
            is_core: false,
            read_only: false,
            version: VersionCounter::new(0),
            owner: None,
            kind: ConceptKind::empty(concept_type),
        }
    }

    #[must_use]
    pub const fn id(&self) -> ConceptId {
        self.id
    }

    #[must_use]
    pub const fn concept_type(&self) -> ConceptType {
        self.kind.concept_type()
    }

    #[must_use]
    pub const fn kind(&self) -> &ConceptKind {
        &self.kind
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn definition(&self) -> &str {
        &self.definition
    }

    #[must_use]
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    #[must_use]
    pub const fn is_core(&self) -> bool {
        self.is_core
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// A concept is editable when it is neither core nor read-only.
    #[must_use]
    pub const fn is_editable(&self) -> bool {
        !self.is_core && !self.read_only
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    #[must_use]
    pub const fn owner(&self) -> Option<ConceptId> {
        self.owner
    }

    /// Literal value, if this is a Literal.
    #[must_use]
    pub fn literal_value(&self) -> Option<&str> {
        match &self.kind {
            ConceptKind::Literal { value } => Some(value),
            _ => None,
        }
    }

    /// Referenced concept, if this is a Reference with a target.
    #[must_use]
    pub const fn referenced_concept(&self) -> Option<ConceptId> {
        match &self.kind {
            ConceptKind::Reference { referenced, .. } => *referenced,
            _ => None,
        }
    }

    /// Referenced attribute name; `NoAttribute` for non-References.
    #[must_use]
    pub const fn referenced_attribute(&self) -> AttributeName {
        match &self.kind {
            ConceptKind::Reference { attribute, .. } => *attribute,
            _ => AttributeName::NoAttribute,
        }
    }

    /// Abstract concept, if this is a Refinement with one.
    #[must_use]
    pub const fn abstract_concept(&self) -> Option<ConceptId> {
        match &self.kind {
            ConceptKind::Refinement {
                abstract_concept, ..
            } => *abstract_concept,
            _ => None,
        }
    }

    /// Refined concept, if this is a Refinement with one.
    #[must_use]
    pub const fn refined_concept(&self) -> Option<ConceptId> {
        match &self.kind {
            ConceptKind::Refinement {
                refined_concept, ..
            } => *refined_concept,
            _ => None,
        }
    }

    /// Every concept this one points at through a Reference/Refinement field.
    ///
    /// These are exactly the keys under which this concept must appear in the
    /// listener index.
    #[must_use]
    pub fn pointer_targets(&self) -> BTreeSet<ConceptId> {
        match &self.kind {
            ConceptKind::Element | ConceptKind::Literal { .. } => BTreeSet::new(),
            ConceptKind::Reference { referenced, .. } => referenced.iter().copied().collect(),
            ConceptKind::Refinement {
                abstract_concept,
                refined_concept,
            } => abstract_concept
                .iter()
                .chain(refined_concept.iter())
                .copied()
                .collect(),
        }
    }

    /// Field-for-field comparison, version included.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.matches_ignoring_version(other) && self.version() == other.version()
    }

    /// Field-for-field comparison of everything except the version.
    #[must_use]
    pub fn matches_ignoring_version(&self, other: &Self) -> bool {
        self.id == other.id
            && self.label == other.label
            && self.definition == other.definition
            && self.uri == other.uri
            && self.is_core == other.is_core
            && self.read_only == other.read_only
            && self.owner == other.owner
            && self.kind == other.kind
    }

    /// Copy every attribute except the identity from `source`.
    ///
    /// The version is copied too; callers that must keep versions monotonic
    /// adjust it afterwards.
    pub(crate) fn copy_attributes_from(&mut self, source: &Self) {
        self.label.clone_from(&source.label);
        self.definition.clone_from(&source.definition);
        self.uri.clone_from(&source.uri);
        self.is_core = source.is_core;
        self.read_only = source.read_only;
        self.owner = source.owner;
        self.kind = source.kind.clone();
        self.version.set(source.version());
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn refinement(abs: Option<ConceptId>, refined: Option<ConceptId>) -> Concept {
        let mut c = Concept::new(ConceptId::generate(), ConceptType::Refinement, None);
        c.kind = ConceptKind::Refinement {
            abstract_concept: abs,
            refined_concept: refined,
        };
        c
    }

    #[test]
    fn new_concept_starts_at_version_zero() {
        let c = Concept::new(ConceptId::generate(), ConceptType::Literal, None);
        assert_eq!(c.version(), 0);
        assert_eq!(c.concept_type(), ConceptType::Literal);
        assert_eq!(c.literal_value(), Some(""));
        assert!(c.is_editable());
    }

    #[test]
    fn clone_keeps_version() {
        let c = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        c.version.increment();
        c.version.increment();
        let snapshot = c.clone();
        assert_eq!(snapshot.version(), 2);
        assert!(snapshot.is_equivalent(&c));

        c.version.increment();
        assert!(!snapshot.is_equivalent(&c));
        assert!(snapshot.matches_ignoring_version(&c));
    }

    #[test]
    fn pointer_targets_deduplicate() {
        let x = ConceptId::generate();
        let r = refinement(Some(x), Some(x));
        assert_eq!(r.pointer_targets().len(), 1);

        let y = ConceptId::generate();
        let r = refinement(Some(x), Some(y));
        assert_eq!(r.pointer_targets().len(), 2);

        let r = refinement(None, None);
        assert!(r.pointer_targets().is_empty());
    }

    #[test]
    fn copy_attributes_preserves_identity() {
        let mut target = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        let mut source = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        source.label = "copied".to_string();
        source.read_only = true;
        source.version.set(7);

        let id = target.id();
        target.copy_attributes_from(&source);
        assert_eq!(target.id(), id);
        assert_eq!(target.label(), "copied");
        assert!(target.is_read_only());
        assert_eq!(target.version(), 7);
    }

    #[test]
    fn accessors_are_type_specific() {
        let c = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        assert_eq!(c.literal_value(), None);
        assert_eq!(c.referenced_concept(), None);
        assert_eq!(c.referenced_attribute(), AttributeName::NoAttribute);
        assert_eq!(c.abstract_concept(), None);
    }
}
