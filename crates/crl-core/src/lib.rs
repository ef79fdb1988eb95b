//! # crl-core
//!
//! The Universe of Discourse engine for CRL: an in-memory concept graph that
//! is mutated under transactions and keeps every dependent concept informed
//! of every change.
//!
//! ## Model
//!
//! - A [`Universe`] owns every [`Concept`] plus the indexes derived from them
//!   (uri, owner -> children, target -> listeners).
//! - Concepts are Elements, Literals, References or Refinements and refer to
//!   each other by [`ConceptId`] only.
//! - Every edit runs inside a [`Transaction`], which holds the per-concept
//!   locks and guards reactive functions against re-entry.
//! - An edit produces a [`ChangeNotification`] that housekeeping forwards to
//!   owners, listeners and the Universe concept. Reactive functions and
//!   [`Observer`]s run wherever the notification arrives.
//! - Recorded edits can be undone and redone back to a marker.
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - A mutation's whole cascade runs synchronously on the caller's stack
//! - Deterministic iteration: every index is a BTreeMap/BTreeSet
//! - Library code returns errors; it never panics

// =============================================================================
// MODULES
// =============================================================================

mod cascade;
pub mod concept;
mod deletion;
pub mod dispatch;
pub mod formats;
pub mod index;
mod mutation;
pub mod notification;
pub mod primitives;
mod query;
pub mod transaction;
pub mod types;
mod undo;
pub mod universe;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{AttributeName, ConceptId, ConceptType, CrlError, validate_uri};

// =============================================================================
// RE-EXPORTS: Concept Graph
// =============================================================================

pub use concept::{Concept, ConceptKind, VersionCounter};
pub use dispatch::{
    FunctionCallRecord, NotificationRecorder, Observer, ReactiveFunction, RecordedNotification,
};
pub use index::OneToNMap;
pub use notification::{ChangeNotification, NatureOfChange};
pub use transaction::Transaction;
pub use universe::Universe;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{ConceptRecord, MAX_PERSISTENCE_PAYLOAD_SIZE, records_from_json, records_to_json};
