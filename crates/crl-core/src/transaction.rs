//! # Transaction
//!
//! The lock scope of one logical operation.
//!
//! A transaction collects per-concept locks as the operation touches concepts
//! and releases them all together. Locks are parking_lot arc guards, so the
//! transaction owns them outright and a concept cell stays alive for as long
//! as a transaction holds it, even after the concept has left the Universe.
//!
//! ## Locking Rules
//!
//! - Each concept is locked at most once per transaction.
//! - A held write lock satisfies a read request.
//! - Write-locking a concept the transaction has read-locked fails with
//!   `CrlError::LockUpgrade`; upgrading a shared lock is not supported.
//! - `release` is idempotent and also runs on drop.

use crate::concept::Concept;
use crate::dispatch::FunctionCallRecord;
use crate::types::{ConceptId, CrlError};
use crate::universe::Universe;
use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub(crate) type ReadGuard = ArcRwLockReadGuard<RawRwLock, Concept>;
pub(crate) type WriteGuard = ArcRwLockWriteGuard<RawRwLock, Concept>;

#[derive(Default)]
struct TransactionState {
    read_locks: BTreeMap<ConceptId, ReadGuard>,
    write_locks: BTreeMap<ConceptId, WriteGuard>,
    in_progress: BTreeSet<(String, ConceptId)>,
    executed: Vec<FunctionCallRecord>,
}

/// Lock scope and recursion guard for one logical operation.
pub struct Transaction<'u> {
    universe: &'u Universe,
    state: Mutex<TransactionState>,
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Transaction")
            .field("read_locks", &state.read_locks.keys().collect::<Vec<_>>())
            .field("write_locks", &state.write_locks.keys().collect::<Vec<_>>())
            .field("in_progress", &state.in_progress)
            .finish()
    }
}

impl<'u> Transaction<'u> {
    pub(crate) fn new(universe: &'u Universe) -> Self {
        Self {
            universe,
            state: Mutex::new(TransactionState::default()),
        }
    }

    /// The Universe this transaction operates on.
    #[must_use]
    pub const fn universe(&self) -> &'u Universe {
        self.universe
    }

    // =========================================================================
    // LOCKING
    // =========================================================================

    /// Acquire a shared lock on a concept, unless one is already held.
    pub fn read_lock(&self, id: &ConceptId) -> Result<(), CrlError> {
        if self.holds(id) {
            return Ok(());
        }
        let cell = self.universe.cell(id).ok_or(CrlError::NotFound(*id))?;
        let guard = cell.read_arc();
        self.state.lock().read_locks.entry(*id).or_insert(guard);
        Ok(())
    }

    /// Acquire an exclusive lock on a concept, unless one is already held.
    pub fn write_lock(&self, id: &ConceptId) -> Result<(), CrlError> {
        {
            let state = self.state.lock();
            if state.write_locks.contains_key(id) {
                return Ok(());
            }
            if state.read_locks.contains_key(id) {
                return Err(CrlError::LockUpgrade(*id));
            }
        }
        let cell = self.universe.cell(id).ok_or(CrlError::NotFound(*id))?;
        let guard = cell.write_arc();
        self.state.lock().write_locks.entry(*id).or_insert(guard);
        Ok(())
    }

    /// Whether the transaction holds a shared lock on the concept.
    #[must_use]
    pub fn is_read_locked(&self, id: &ConceptId) -> bool {
        self.state.lock().read_locks.contains_key(id)
    }

    /// Whether the transaction holds an exclusive lock on the concept.
    #[must_use]
    pub fn is_write_locked(&self, id: &ConceptId) -> bool {
        self.state.lock().write_locks.contains_key(id)
    }

    /// Number of (read, write) locks currently held.
    #[must_use]
    pub fn lock_counts(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.read_locks.len(), state.write_locks.len())
    }

    fn holds(&self, id: &ConceptId) -> bool {
        let state = self.state.lock();
        state.read_locks.contains_key(id) || state.write_locks.contains_key(id)
    }

    /// Hand an already-acquired write guard to the transaction.
    pub(crate) fn adopt_write_guard(&self, id: ConceptId, guard: WriteGuard) {
        let mut state = self.state.lock();
        state.read_locks.remove(&id);
        state.write_locks.insert(id, guard);
    }

    /// Drop whatever lock the transaction holds on a concept.
    pub(crate) fn forget(&self, id: &ConceptId) {
        let (read, write) = {
            let mut state = self.state.lock();
            (state.read_locks.remove(id), state.write_locks.remove(id))
        };
        drop(read);
        drop(write);
    }

    // =========================================================================
    // CONCEPT ACCESS
    // =========================================================================

    /// Run `f` against the concept.
    ///
    /// Uses the guard the transaction holds, if any. Otherwise a transient
    /// shared lock is taken for the duration of `f` and not recorded.
    /// `f` must not call back into the transaction.
    pub(crate) fn view<R>(
        &self,
        id: &ConceptId,
        f: impl FnOnce(&Concept) -> R,
    ) -> Result<R, CrlError> {
        {
            let state = self.state.lock();
            if let Some(guard) = state.write_locks.get(id) {
                return Ok(f(&**guard));
            }
            if let Some(guard) = state.read_locks.get(id) {
                return Ok(f(&**guard));
            }
        }
        let cell = self.universe.cell(id).ok_or(CrlError::NotFound(*id))?;
        let guard = cell.read();
        Ok(f(&*guard))
    }

    /// Run `f` against the concept under an exclusive lock owned by this transaction.
    pub(crate) fn view_mut<R>(
        &self,
        id: &ConceptId,
        f: impl FnOnce(&mut Concept) -> R,
    ) -> Result<R, CrlError> {
        self.write_lock(id)?;
        let mut state = self.state.lock();
        let guard = state
            .write_locks
            .get_mut(id)
            .ok_or(CrlError::NotFound(*id))?;
        Ok(f(&mut **guard))
    }

    // =========================================================================
    // RECURSION GUARD
    // =========================================================================

    /// Mark a function as running for a target.
    ///
    /// Returns false if it is already running for that target in this
    /// transaction, in which case the call must be skipped.
    pub(crate) fn begin_call(&self, function_id: &str, target: ConceptId) -> bool {
        self.state
            .lock()
            .in_progress
            .insert((function_id.to_string(), target))
    }

    pub(crate) fn end_call(&self, function_id: &str, target: ConceptId) {
        self.state
            .lock()
            .in_progress
            .remove(&(function_id.to_string(), target));
    }

    /// Whether a function is currently running for a target.
    #[must_use]
    pub fn is_call_in_progress(&self, function_id: &str, target: &ConceptId) -> bool {
        self.state
            .lock()
            .in_progress
            .contains(&(function_id.to_string(), *target))
    }

    pub(crate) fn record_call(&self, record: FunctionCallRecord) {
        self.state.lock().executed.push(record);
    }

    /// Calls executed so far and not yet flushed.
    #[must_use]
    pub fn executed_calls(&self) -> Vec<FunctionCallRecord> {
        self.state.lock().executed.clone()
    }

    // =========================================================================
    // RELEASE
    // =========================================================================

    /// Release every lock and flush the executed-call log.
    pub fn release(&self) {
        let (reads, writes, executed) = {
            let mut state = self.state.lock();
            state.in_progress.clear();
            (
                std::mem::take(&mut state.read_locks),
                std::mem::take(&mut state.write_locks),
                std::mem::take(&mut state.executed),
            )
        };
        if !reads.is_empty() || !writes.is_empty() {
            tracing::trace!(
                read_locks = reads.len(),
                write_locks = writes.len(),
                "releasing transaction locks"
            );
        }
        drop(reads);
        drop(writes);
        self.universe.flush_call_log(executed);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// TESTS
// =============================================================================
