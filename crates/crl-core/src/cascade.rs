//! # Housekeeping
//!
//! The built-in reaction every concept runs for every notification it
//! receives. It bumps versions and forwards the change to the owner, the
//! listeners and the Universe concept, which is how a single edit becomes
//! visible everywhere that depends on it.
//!
//! It runs in two steps around the concept's own reactive functions: the
//! version bump before them, the forwarding after them.
//!
//! Forwarded notifications name the forwarding concept as their reporter and
//! wrap the incoming notification as their underlying change.

use crate::concept::{Concept, ConceptKind};
use crate::notification::{ChangeNotification, NatureOfChange};
use crate::transaction::Transaction;
use crate::types::{ConceptId, CrlError};
use crate::universe::Universe;
use std::sync::Arc;

/// What housekeeping needs to know about the receiving concept.
struct Receiver {
    id: ConceptId,
    owner: Option<ConceptId>,
    abstract_concept: Option<ConceptId>,
    refined_concept: Option<ConceptId>,
    is_refinement: bool,
}

impl Receiver {
    fn read(id: ConceptId, trans: &Transaction<'_>) -> Result<Self, CrlError> {
        trans.view(&id, |c| Self {
            id,
            owner: c.owner,
            abstract_concept: c.abstract_concept(),
            refined_concept: c.refined_concept(),
            is_refinement: matches!(c.kind, ConceptKind::Refinement { .. }),
        })
    }

    /// Whether `sender` is this Refinement's abstract concept.
    fn is_abstraction_relay(&self, sender: ConceptId) -> bool {
        self.is_refinement && self.abstract_concept == Some(sender)
    }
}

// =============================================================================
// ENTRY POINT
// =============================================================================

/// Bump `target`'s version when the notification reports a change beneath it.
///
/// Runs before the concept's reactive functions, so they see the new version.
pub(crate) fn bump_version(
    uofd: &Universe,
    target: ConceptId,
    notification: &ChangeNotification,
    trans: &Transaction<'_>,
) -> Result<(), CrlError> {
    let bumps = match notification.nature() {
        NatureOfChange::ChildChanged | NatureOfChange::ChildAbstractionChanged => true,
        NatureOfChange::AbstractionChanged => {
            let receiver = Receiver::read(target, trans)?;
            !receiver.is_abstraction_relay(notification.reporting_concept_id())
        }
        _ => false,
    };
    if bumps {
        uofd.bump_version(&target, trans)?;
    }
    Ok(())
}

/// Forward a notification delivered to `target` per the cascade rules.
pub(crate) fn housekeeping(
    uofd: &Universe,
    target: ConceptId,
    notification: &Arc<ChangeNotification>,
    trans: &Transaction<'_>,
) -> Result<(), CrlError> {
    let receiver = Receiver::read(target, trans)?;
    let sender = notification.reporting_concept_id();

    match notification.nature() {
        NatureOfChange::ConceptChanged
        | NatureOfChange::OwningConceptChanged
        | NatureOfChange::ReferencedConceptChanged
        | NatureOfChange::AbstractConceptChanged
        | NatureOfChange::RefinedConceptChanged => {
            own_change(uofd, &receiver, notification, trans)
        }
        NatureOfChange::ChildChanged => {
            forward_to_owner(uofd, &receiver, NatureOfChange::ChildChanged, notification, trans)?;
            forward_to_listeners(uofd, &receiver, notification, trans, |_| {
                NatureOfChange::IndicatedConceptChanged
            })
        }
        NatureOfChange::IndicatedConceptChanged => {
            if receiver.is_abstraction_relay(sender) {
                relay_to_refined(uofd, &receiver, notification, trans)?;
            }
            if let Some(owner) = receiver.owner {
                if !notification.is_referenced(&owner) {
                    forward(
                        uofd,
                        NatureOfChange::IndicatedConceptChanged,
                        target,
                        notification,
                        owner,
                        trans,
                    )?;
                }
            }
            Ok(())
        }
        NatureOfChange::AbstractionChanged => {
            if receiver.is_abstraction_relay(sender) {
                return relay_to_refined(uofd, &receiver, notification, trans);
            }
            forward_to_owner(
                uofd,
                &receiver,
                NatureOfChange::ChildAbstractionChanged,
                notification,
                trans,
            )?;
            forward_to_listeners(uofd, &receiver, notification, trans, |listener| {
                if listener.is_refinement() && listener.abstract_concept() == Some(target) {
                    NatureOfChange::AbstractionChanged
                } else {
                    NatureOfChange::IndicatedConceptChanged
                }
            })
        }
        NatureOfChange::ChildAbstractionChanged => {
            forward_to_owner(
                uofd,
                &receiver,
                NatureOfChange::ChildAbstractionChanged,
                notification,
                trans,
            )?;
            forward_to_listeners(uofd, &receiver, notification, trans, |_| {
                NatureOfChange::AbstractionChanged
            })
        }
        NatureOfChange::UofDConceptAdded
        | NatureOfChange::UofDConceptChanged
        | NatureOfChange::UofDConceptRemoved => {
            forward_to_listeners(uofd, &receiver, notification, trans, |_| {
                NatureOfChange::IndicatedConceptChanged
            })
        }
    }
}

// =============================================================================
// RULES
// =============================================================================

fn own_change(
    uofd: &Universe,
    receiver: &Receiver,
    notification: &Arc<ChangeNotification>,
    trans: &Transaction<'_>,
) -> Result<(), CrlError> {
    if notification.nature() == NatureOfChange::OwningConceptChanged {
        let prior = notification.before_state().and_then(Concept::owner);
        if let Some(prior) = prior.filter(|p| receiver.owner != Some(*p)) {
            forward(
                uofd,
                NatureOfChange::ChildChanged,
                receiver.id,
                notification,
                prior,
                trans,
            )?;
        }
    }
    forward_to_owner(uofd, receiver, NatureOfChange::ChildChanged, notification, trans)?;
    forward_to_listeners(uofd, receiver, notification, trans, |_| {
        NatureOfChange::IndicatedConceptChanged
    })?;
    forward(
        uofd,
        NatureOfChange::UofDConceptChanged,
        receiver.id,
        notification,
        uofd.universe_concept_id(),
        trans,
    )
}

fn relay_to_refined(
    uofd: &Universe,
    receiver: &Receiver,
    notification: &Arc<ChangeNotification>,
    trans: &Transaction<'_>,
) -> Result<(), CrlError> {
    match receiver.refined_concept {
        Some(refined) => forward(
            uofd,
            NatureOfChange::AbstractionChanged,
            receiver.id,
            notification,
            refined,
            trans,
        ),
        None => Ok(()),
    }
}

fn forward_to_owner(
    uofd: &Universe,
    receiver: &Receiver,
    nature: NatureOfChange,
    notification: &Arc<ChangeNotification>,
    trans: &Transaction<'_>,
) -> Result<(), CrlError> {
    match receiver.owner {
        Some(owner) => forward(uofd, nature, receiver.id, notification, owner, trans),
        None => Ok(()),
    }
}

/// Forward to every listener, choosing the nature per listener.
fn forward_to_listeners(
    uofd: &Universe,
    receiver: &Receiver,
    notification: &Arc<ChangeNotification>,
    trans: &Transaction<'_>,
    nature_for: impl Fn(&ListenerInfo) -> NatureOfChange,
) -> Result<(), CrlError> {
    for listener in uofd.listener_ids(&receiver.id) {
        let Ok(info) = trans.view(&listener, ListenerInfo::of) else {
            continue;
        };
        forward(
            uofd,
            nature_for(&info),
            receiver.id,
            notification,
            listener,
            trans,
        )?;
    }
    Ok(())
}

struct ListenerInfo {
    refinement: bool,
    abstract_concept: Option<ConceptId>,
}

impl ListenerInfo {
    fn of(concept: &Concept) -> Self {
        Self {
            refinement: matches!(concept.kind, ConceptKind::Refinement { .. }),
            abstract_concept: concept.abstract_concept(),
        }
    }

    const fn is_refinement(&self) -> bool {
        self.refinement
    }

    const fn abstract_concept(&self) -> Option<ConceptId> {
        self.abstract_concept
    }
}

fn forward(
    uofd: &Universe,
    nature: NatureOfChange,
    sender: ConceptId,
    underlying: &Arc<ChangeNotification>,
    target: ConceptId,
    trans: &Transaction<'_>,
) -> Result<(), CrlError> {
    let state = trans.view(&sender, Concept::clone).ok();
    let forwarded = ChangeNotification::forwarded(nature, sender, state, Arc::clone(underlying));
    uofd.dispatch(target, Arc::new(forwarded), trans)
}

// =============================================================================
// TESTS
// =============================================================================
