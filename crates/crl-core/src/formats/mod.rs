//! # Formats
//!
//! Serialized forms of concepts and concept spaces.
//!
//! Encoding and decoding are pure; file I/O lives in the app layer.

pub mod persistence;

pub use persistence::{
    ConceptRecord, MAX_PERSISTENCE_PAYLOAD_SIZE, records_from_json, records_to_json,
};
