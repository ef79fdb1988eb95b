//! # Change Notifications
//!
//! Immutable records describing a change and the causal chain that led to it.
//!
//! A notification created by a setter carries the before/after state of the
//! edited concept. Every notification forwarded by the cascade wraps the
//! notification that caused it as its `underlying` change, so the chain can
//! be walked back to the original edit.

use crate::concept::Concept;
use crate::types::ConceptId;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// NATURE OF CHANGE
// =============================================================================

/// What happened, from the point of view of the concept receiving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NatureOfChange {
    /// One of the concept's own attributes changed.
    ConceptChanged,
    /// The concept's owner changed.
    OwningConceptChanged,
    /// A Reference's target (or attribute name) changed.
    ReferencedConceptChanged,
    /// A Refinement's abstract concept changed.
    AbstractConceptChanged,
    /// A Refinement's refined concept changed.
    RefinedConceptChanged,
    /// A child of the receiving concept changed.
    ChildChanged,
    /// An abstraction of a child of the receiving concept changed.
    ChildAbstractionChanged,
    /// An abstraction of the receiving concept changed.
    AbstractionChanged,
    /// A concept the receiver points at changed.
    IndicatedConceptChanged,
    UofDConceptAdded,
    UofDConceptChanged,
    UofDConceptRemoved,
}

impl NatureOfChange {
    /// Changes reported by a setter on the concept itself.
    #[must_use]
    pub const fn is_own_change(self) -> bool {
        matches!(
            self,
            Self::ConceptChanged
                | Self::OwningConceptChanged
                | Self::ReferencedConceptChanged
                | Self::AbstractConceptChanged
                | Self::RefinedConceptChanged
        )
    }

    /// Changes delivered to the Universe concept.
    #[must_use]
    pub const fn is_universe_change(self) -> bool {
        matches!(
            self,
            Self::UofDConceptAdded | Self::UofDConceptChanged | Self::UofDConceptRemoved
        )
    }
}

impl fmt::Display for NatureOfChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// CHANGE NOTIFICATION
// =============================================================================

/// A change report travelling through the cascade.
#[derive(Debug, Clone)]
pub struct ChangeNotification {
    nature: NatureOfChange,
    reporting_concept: ConceptId,
    before: Option<Concept>,
    after: Option<Concept>,
    underlying: Option<Arc<ChangeNotification>>,
    depth: usize,
}

impl ChangeNotification {
    /// A notification originating at `reporting_concept`.
    #[must_use]
    pub fn new(
        nature: NatureOfChange,
        reporting_concept: ConceptId,
        before: Option<Concept>,
        after: Option<Concept>,
    ) -> Self {
        Self {
            nature,
            reporting_concept,
            before,
            after,
            underlying: None,
            depth: 1,
        }
    }

    /// A notification forwarded by `reporting_concept` because of `underlying`.
    #[must_use]
    pub fn forwarded(
        nature: NatureOfChange,
        reporting_concept: ConceptId,
        state: Option<Concept>,
        underlying: Arc<Self>,
    ) -> Self {
        let depth = underlying.depth.saturating_add(1);
        Self {
            nature,
            reporting_concept,
            before: None,
            after: state,
            underlying: Some(underlying),
            depth,
        }
    }

    #[must_use]
    pub const fn nature(&self) -> NatureOfChange {
        self.nature
    }

    /// The concept that reported (or forwarded) this change.
    #[must_use]
    pub const fn reporting_concept_id(&self) -> ConceptId {
        self.reporting_concept
    }

    #[must_use]
    pub const fn before_state(&self) -> Option<&Concept> {
        self.before.as_ref()
    }

    #[must_use]
    pub const fn after_state(&self) -> Option<&Concept> {
        self.after.as_ref()
    }

    /// The change that caused this one, if it was forwarded.
    #[must_use]
    pub fn underlying(&self) -> Option<&Self> {
        self.underlying.as_deref()
    }

    /// Length of the causal chain, counting this notification.
    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// The first notification of the chain.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        let mut current = self;
        while let Some(next) = current.underlying() {
            current = next;
        }
        current
    }

    /// Whether `id` reported any notification in this chain.
    #[must_use]
    pub fn is_referenced(&self, id: &ConceptId) -> bool {
        let mut current = Some(self);
        while let Some(n) = current {
            if n.reporting_concept == *id {
                return true;
            }
            current = n.underlying();
        }
        false
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_depth_and_reference_walk() {
        let (a, b, c, d) = (
            ConceptId::generate(),
            ConceptId::generate(),
            ConceptId::generate(),
            ConceptId::generate(),
        );
        let first = Arc::new(ChangeNotification::new(
            NatureOfChange::ConceptChanged,
            a,
            None,
            None,
        ));
        let second = Arc::new(ChangeNotification::forwarded(
            NatureOfChange::ChildChanged,
            b,
            None,
            first,
        ));
        let third =
            ChangeNotification::forwarded(NatureOfChange::IndicatedConceptChanged, c, None, second);

        assert_eq!(third.depth(), 3);
        assert!(third.is_referenced(&a));
        assert!(third.is_referenced(&b));
        assert!(third.is_referenced(&c));
        assert!(!third.is_referenced(&d));
        assert_eq!(third.root_cause().reporting_concept_id(), a);
        assert_eq!(
            third.root_cause().nature(),
            NatureOfChange::ConceptChanged
        );
    }

    #[test]
    fn nature_families() {
        assert!(NatureOfChange::OwningConceptChanged.is_own_change());
        assert!(!NatureOfChange::ChildChanged.is_own_change());
        assert!(NatureOfChange::UofDConceptRemoved.is_universe_change());
        assert!(!NatureOfChange::AbstractionChanged.is_universe_change());
    }
}
