//! # Reactive Dispatch
//!
//! Delivers a notification to a concept: bumps its version if housekeeping
//! calls for it, runs every reactive function registered under the concept's
//! URI or the URI of one of its abstractions, notifies the concept's
//! observers, and finally lets housekeeping forward the change onward. A
//! changed concept therefore reacts before its owner and listeners do.
//!
//! Each (function id, target) pair runs at most once at a time per
//! transaction. A re-entrant delivery of the same pair is skipped. Skipping
//! housekeeping's forwarding is what stops cascades around cycles of
//! references and refinements.

use crate::cascade;
use crate::notification::{ChangeNotification, NatureOfChange};
use crate::primitives::{HOUSEKEEPING_URI, MAX_NOTIFICATION_DEPTH};
use crate::transaction::Transaction;
use crate::types::{ConceptId, CrlError};
use crate::universe::Universe;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

// =============================================================================
// FUNCTIONS & OBSERVERS
// =============================================================================

/// A user function run when a notification reaches a concept it applies to.
pub type ReactiveFunction = Arc<
    dyn Fn(ConceptId, &ChangeNotification, &Transaction<'_>) -> Result<(), CrlError> + Send + Sync,
>;

/// Receives every notification delivered to the concept (or Universe) it is
/// registered with.
pub trait Observer: Send + Sync {
    /// Called after the reactive functions for `target` have run.
    fn update(
        &self,
        target: ConceptId,
        notification: &ChangeNotification,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError>;
}

impl<F> Observer for F
where
    F: Fn(ConceptId, &ChangeNotification, &Transaction<'_>) -> Result<(), CrlError> + Send + Sync,
{
    fn update(
        &self,
        target: ConceptId,
        notification: &ChangeNotification,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self(target, notification, trans)
    }
}

/// A reactive function call executed within a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionCallRecord {
    /// URI the function is registered under.
    pub function_id: String,
    /// Concept the function ran for.
    pub target: ConceptId,
    /// Nature of the notification that triggered it.
    pub nature: NatureOfChange,
}

/// One delivery seen by a [`NotificationRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedNotification {
    pub target: ConceptId,
    pub nature: NatureOfChange,
    pub reporting_concept: ConceptId,
    pub depth: usize,
}

/// Observer that keeps every notification it receives.
#[derive(Debug, Default)]
pub struct NotificationRecorder {
    records: Mutex<Vec<RecordedNotification>>,
}

impl NotificationRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything received so far, in delivery order.
    #[must_use]
    pub fn records(&self) -> Vec<RecordedNotification> {
        self.records.lock().clone()
    }

    /// Natures delivered to `target`, in delivery order.
    #[must_use]
    pub fn natures_for(&self, target: &ConceptId) -> Vec<NatureOfChange> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.target == *target)
            .map(|r| r.nature)
            .collect()
    }

    /// Whether `target` received a notification of `nature`.
    #[must_use]
    pub fn received(&self, target: &ConceptId, nature: NatureOfChange) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.target == *target && r.nature == nature)
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Observer for NotificationRecorder {
    fn update(
        &self,
        target: ConceptId,
        notification: &ChangeNotification,
        _trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        self.records.lock().push(RecordedNotification {
            target,
            nature: notification.nature(),
            reporting_concept: notification.reporting_concept_id(),
            depth: notification.depth(),
        });
        Ok(())
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

impl Universe {
    /// Register a reactive function under a URI.
    ///
    /// It runs for notifications reaching the concept with that URI and every
    /// concept refined (transitively) from it.
    pub fn add_function<F>(&self, uri: &str, function: F)
    where
        F: Fn(ConceptId, &ChangeNotification, &Transaction<'_>) -> Result<(), CrlError>
            + Send
            + Sync
            + 'static,
    {
        self.functions
            .write()
            .entry(uri.to_string())
            .or_default()
            .push(Arc::new(function));
    }

    /// Remove every function registered under a URI. Returns how many were removed.
    pub fn remove_functions(&self, uri: &str) -> usize {
        self.functions
            .write()
            .remove(uri)
            .map(|functions| functions.len())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn has_functions(&self, uri: &str) -> bool {
        self.functions.read().contains_key(uri)
    }

    /// Observe every notification delivered to the Universe concept.
    pub fn register_observer(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    /// Remove a Universe observer. Returns false if it was not registered.
    pub fn deregister_observer(&self, observer: &Arc<dyn Observer>) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        observers.len() != before
    }

    /// Observe every notification delivered to one concept.
    pub fn register_concept_observer(
        &self,
        id: &ConceptId,
        observer: Arc<dyn Observer>,
    ) -> Result<(), CrlError> {
        if !self.contains(id) {
            return Err(CrlError::NotFound(*id));
        }
        self.concept_observers
            .write()
            .entry(*id)
            .or_default()
            .push(observer);
        Ok(())
    }

    /// Remove a per-concept observer. Returns false if it was not registered.
    pub fn deregister_concept_observer(
        &self,
        id: &ConceptId,
        observer: &Arc<dyn Observer>,
    ) -> bool {
        let mut map = self.concept_observers.write();
        let Some(observers) = map.get_mut(id) else {
            return false;
        };
        let before = observers.len();
        observers.retain(|o| !Arc::ptr_eq(o, observer));
        let removed = observers.len() != before;
        if observers.is_empty() {
            map.remove(id);
        }
        removed
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Deliver a notification to `target`.
    ///
    /// Targets that are not members are ignored.
    pub(crate) fn dispatch(
        &self,
        target: ConceptId,
        notification: Arc<ChangeNotification>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if !self.contains(&target) {
            return Ok(());
        }
        if notification.depth() > MAX_NOTIFICATION_DEPTH {
            return Err(CrlError::CascadeTooDeep(MAX_NOTIFICATION_DEPTH));
        }

        let forwarding = trans.is_call_in_progress(HOUSEKEEPING_URI, &target);
        if !forwarding {
            cascade::bump_version(self, target, &notification, trans)?;
        }

        for function_id in self.function_ids_for(&target, trans) {
            if !trans.begin_call(&function_id, target) {
                tracing::trace!(function = %function_id, %target, "skipping re-entrant call");
                continue;
            }
            let result = self.invoke(&function_id, target, &notification, trans);
            trans.end_call(&function_id, target);
            result?;
        }
        self.notify_observers(target, &notification, trans)?;

        if forwarding || !trans.begin_call(HOUSEKEEPING_URI, target) {
            tracing::trace!(%target, "skipping re-entrant housekeeping");
            return Ok(());
        }
        let result = cascade::housekeeping(self, target, &notification, trans);
        trans.end_call(HOUSEKEEPING_URI, target);
        result
    }

    /// Registered function ids applicable to a concept: its own URI, then the
    /// URIs of its abstractions.
    pub(crate) fn function_ids_for(
        &self,
        target: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        let registered: BTreeSet<String> = self.functions.read().keys().cloned().collect();
        if registered.is_empty() {
            return ids;
        }

        let mut candidates = Vec::new();
        if let Ok(Some(uri)) = trans.view(target, |c| c.uri.clone()) {
            candidates.push(uri);
        }
        for abstraction in self.abstraction_ids(target, trans) {
            if let Ok(Some(uri)) = trans.view(&abstraction, |c| c.uri.clone()) {
                candidates.push(uri);
            }
        }
        for uri in candidates {
            if registered.contains(&uri) && !ids.contains(&uri) {
                ids.push(uri);
            }
        }
        ids
    }

    fn invoke(
        &self,
        function_id: &str,
        target: ConceptId,
        notification: &Arc<ChangeNotification>,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        let functions = self
            .functions
            .read()
            .get(function_id)
            .cloned()
            .unwrap_or_default();
        trans.record_call(FunctionCallRecord {
            function_id: function_id.to_string(),
            target,
            nature: notification.nature(),
        });
        tracing::debug!(
            function = %function_id,
            %target,
            nature = %notification.nature(),
            "invoking function"
        );
        for function in functions {
            function(target, notification, trans).map_err(|e| match e {
                CrlError::Function { .. } => e,
                other => CrlError::Function {
                    function: function_id.to_string(),
                    target,
                    message: other.to_string(),
                },
            })?;
        }
        Ok(())
    }

    fn notify_observers(
        &self,
        target: ConceptId,
        notification: &ChangeNotification,
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        let observers = self
            .concept_observers
            .read()
            .get(&target)
            .cloned()
            .unwrap_or_default();
        for observer in observers {
            observer.update(target, notification, trans)?;
        }

        if target == self.universe_concept_id() {
            let observers = self.observers.read().clone();
            for observer in observers {
                observer.update(target, notification, trans)?;
            }
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn no_functions_without_registration() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        assert!(uofd.function_ids_for(&id, &trans).is_empty());
    }

    #[test]
    fn function_runs_for_uri_and_refinements() {
        let uofd = Universe::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let uri = "http://example.com/Abstract";
        uofd.add_function(uri, move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let trans = uofd.new_transaction();
        let abstract_id = uofd.new_element(Some(uri), &trans).expect("abstract");
        let refined = uofd.new_element(None, &trans).expect("refined");
        let refinement = uofd.new_refinement(None, &trans).expect("refinement");
        uofd.set_abstract_concept(&refinement, Some(abstract_id), &trans).expect("abstract");
        uofd.set_refined_concept(&refinement, Some(refined), &trans).expect("refined");

        let ids = uofd.function_ids_for(&refined, &trans);
        assert_eq!(ids, vec![uri.to_string()]);

        calls.store(0, Ordering::SeqCst);
        uofd.set_label(&refined, "changed", &trans).expect("label");
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn function_error_propagates() {
        let uofd = Universe::new();
        let uri = "http://example.com/Failing";
        uofd.add_function(uri, |_, n, _| {
            if n.nature() == NatureOfChange::ConceptChanged {
                Err(CrlError::Io("boom".to_string()))
            } else {
                Ok(())
            }
        });

        let trans = uofd.new_transaction();
        let id = uofd.new_element(Some(uri), &trans).expect("create");
        let err = uofd.set_label(&id, "x", &trans).expect_err("must fail");
        assert!(matches!(err, CrlError::Function { function, .. } if function == uri));
        assert!(!trans.is_call_in_progress(uri, &id));
    }

    #[test]
    fn reentrant_call_skipped() {
        let uofd = Universe::new();
        let uri = "http://example.com/SelfEditing";
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        uofd.add_function(uri, move |target, _, trans| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            trans
                .universe()
                .set_definition(&target, &format!("edit {}", n), trans)
        });

        let trans = uofd.new_transaction();
        let id = uofd.new_element(Some(uri), &trans).expect("create");
        calls.store(0, Ordering::SeqCst);
        uofd.set_label(&id, "start", &trans).expect("label");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn observers_register_and_deregister() {
        let uofd = Universe::new();
        let recorder = Arc::new(NotificationRecorder::new());
        let observer: Arc<dyn Observer> = recorder.clone();

        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        uofd.register_concept_observer(&id, Arc::clone(&observer)).expect("register");
        uofd.set_label(&id, "one", &trans).expect("label");
        assert!(recorder.received(&id, NatureOfChange::ConceptChanged));

        assert!(uofd.deregister_concept_observer(&id, &observer));
        assert!(!uofd.deregister_concept_observer(&id, &observer));
        recorder.clear();
        uofd.set_label(&id, "two", &trans).expect("label");
        assert!(recorder.records().is_empty());
    }

    #[test]
    fn universe_observer_sees_additions() {
        let uofd = Universe::new();
        let recorder = Arc::new(NotificationRecorder::new());
        let observer: Arc<dyn Observer> = recorder.clone();
        uofd.register_observer(Arc::clone(&observer));

        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        let records = recorder.records();
        assert!(records.iter().any(|r| r.nature == NatureOfChange::UofDConceptAdded
            && r.reporting_concept == id));

        assert!(uofd.deregister_observer(&observer));
    }

    #[test]
    fn closure_observer() {
        let uofd = Universe::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let observer = move |_: ConceptId, _: &ChangeNotification, _: &Transaction<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        uofd.register_observer(Arc::new(observer));

        let trans = uofd.new_transaction();
        uofd.new_element(None, &trans).expect("create");
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn observer_on_missing_concept_rejected() {
        let uofd = Universe::new();
        let observer: Arc<dyn Observer> = Arc::new(NotificationRecorder::new());
        assert!(matches!(
            uofd.register_concept_observer(&ConceptId::generate(), observer),
            Err(CrlError::NotFound(_))
        ));
    }
}
