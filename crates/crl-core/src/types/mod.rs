//! # Core Type Definitions
//!
//! This module contains the small value types shared by every other module:
//! - Concept identifiers (`ConceptId`)
//! - The closed set of concept types (`ConceptType`)
//! - Reference attribute names (`AttributeName`)
//! - Error types (`CrlError`)
//!
//! ## Ordering
//!
//! All identifier types implement `Ord` so that the indexes can use
//! `BTreeMap`/`BTreeSet` and iterate in a stable order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::primitives::MAX_URI_LENGTH;

// =============================================================================
// CONCEPT IDENTIFIER
// =============================================================================

/// Stable identifier of a concept.
///
/// Anonymous concepts receive a random (v4) UUID. Concepts created with a URI
/// receive a v5 UUID derived from that URI, so the same URI always maps to the
/// same identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConceptId(pub Uuid);

impl ConceptId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derive the identifier for a URI-named concept.
    ///
    /// The URI must parse as an absolute URL.
    pub fn from_uri(uri: &str) -> Result<Self, CrlError> {
        validate_uri(uri)?;
        Ok(Self::derive_from_uri(uri))
    }

    pub(crate) fn derive_from_uri(uri: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, uri.as_bytes()))
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConceptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for ConceptId {
    type Err = CrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CrlError::Serialization(format!("invalid concept id '{}': {}", s, e)))
    }
}

/// Check that a URI is acceptable as a concept URI.
pub fn validate_uri(uri: &str) -> Result<(), CrlError> {
    if uri.is_empty() || uri.len() > MAX_URI_LENGTH {
        return Err(CrlError::InvalidUri(uri.to_string()));
    }
    url::Url::parse(uri).map_err(|_| CrlError::InvalidUri(uri.to_string()))?;
    Ok(())
}

// =============================================================================
// CONCEPT TYPE
// =============================================================================

/// The closed set of concept variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConceptType {
    Element,
    Literal,
    Reference,
    Refinement,
}

impl ConceptType {
    /// Name used in the persisted form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Element => "Element",
            Self::Literal => "Literal",
            Self::Reference => "Reference",
            Self::Refinement => "Refinement",
        }
    }
}

impl fmt::Display for ConceptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConceptType {
    type Err = CrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Element" => Ok(Self::Element),
            "Literal" => Ok(Self::Literal),
            "Reference" => Ok(Self::Reference),
            "Refinement" => Ok(Self::Refinement),
            other => Err(CrlError::Serialization(format!(
                "unknown concept type '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// ATTRIBUTE NAME
// =============================================================================

/// Which field of its target a Reference semantically points at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum AttributeName {
    /// The reference points at the concept as a whole.
    #[default]
    NoAttribute,
    OwningConceptId,
    ReferencedConceptId,
    AbstractConceptId,
    RefinedConceptId,
    LiteralValue,
    Label,
    Definition,
}

impl AttributeName {
    /// Name used in the persisted form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoAttribute => "NoAttribute",
            Self::OwningConceptId => "OwningConceptID",
            Self::ReferencedConceptId => "ReferencedConceptID",
            Self::AbstractConceptId => "AbstractConceptID",
            Self::RefinedConceptId => "RefinedConceptID",
            Self::LiteralValue => "LiteralValue",
            Self::Label => "Label",
            Self::Definition => "Definition",
        }
    }

    /// The concept type a target must have for this attribute to exist on it.
    ///
    /// `None` means any concept type carries the attribute.
    #[must_use]
    pub const fn required_target_type(self) -> Option<ConceptType> {
        match self {
            Self::ReferencedConceptId => Some(ConceptType::Reference),
            Self::AbstractConceptId | Self::RefinedConceptId => Some(ConceptType::Refinement),
            Self::LiteralValue => Some(ConceptType::Literal),
            Self::NoAttribute | Self::OwningConceptId | Self::Label | Self::Definition => None,
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeName {
    type Err = CrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "NoAttribute" => Ok(Self::NoAttribute),
            "OwningConceptID" => Ok(Self::OwningConceptId),
            "ReferencedConceptID" => Ok(Self::ReferencedConceptId),
            "AbstractConceptID" => Ok(Self::AbstractConceptId),
            "RefinedConceptID" => Ok(Self::RefinedConceptId),
            "LiteralValue" => Ok(Self::LiteralValue),
            "Label" => Ok(Self::Label),
            "Definition" => Ok(Self::Definition),
            other => Err(CrlError::Serialization(format!(
                "unknown attribute name '{}'",
                other
            ))),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while reading or mutating a Universe.
///
/// - Policy violations are detected before any index is touched
/// - Reactive function failures propagate to the mutation that triggered them
/// - Nothing in the library panics; every failure is a value
#[derive(Debug, Error)]
pub enum CrlError {
    /// The concept is not a member of this Universe.
    #[error("Concept not found: {0}")]
    NotFound(ConceptId),

    /// A concept with this identifier is already a member.
    #[error("Concept already exists: {0}")]
    AlreadyExists(ConceptId),

    /// The concept is read-only or core.
    #[error("Concept is not editable: {0}")]
    NotEditable(ConceptId),

    /// The operation is never permitted on core concepts.
    #[error("Concept is core: {0}")]
    CoreConcept(ConceptId),

    /// The owner of the concept is read-only.
    #[error("Owner {owner} of concept {concept} is read-only")]
    ReadOnlyOwner {
        /// The concept being changed.
        concept: ConceptId,
        /// Its read-only owner.
        owner: ConceptId,
    },

    /// A concept cannot own itself.
    #[error("Concept cannot own itself: {0}")]
    SelfOwnership(ConceptId),

    /// The new owner is a descendant of the concept.
    #[error("Owning {0} would create an ownership cycle")]
    OwnershipCycle(ConceptId),

    /// Another concept already carries this URI.
    #[error("URI already in use: {uri} (by {holder})")]
    DuplicateUri {
        /// The contested URI.
        uri: String,
        /// The concept currently holding it.
        holder: ConceptId,
    },

    /// The URI does not parse as an absolute URL.
    #[error("Invalid URI: {0:?}")]
    InvalidUri(String),

    /// Write lock requested on a concept already read-locked by the same transaction.
    #[error("Write lock requested on read-locked concept: {0}")]
    LockUpgrade(ConceptId),

    /// The operation does not apply to this type of concept.
    #[error("Concept {concept} is a {actual}, expected {expected}")]
    TypeMismatch {
        /// The concept operated on.
        concept: ConceptId,
        /// The type the operation needs.
        expected: ConceptType,
        /// The type it has.
        actual: ConceptType,
    },

    /// A reference attribute was requested that the target does not carry.
    #[error("Attribute {attribute} does not exist on {target_type} {target}")]
    AttributeMismatch {
        /// The requested attribute.
        attribute: AttributeName,
        /// The target concept.
        target: ConceptId,
        /// The target's type.
        target_type: ConceptType,
    },

    /// The transaction belongs to a different Universe.
    #[error("Transaction belongs to a different universe")]
    UniverseMismatch,

    /// A notification chain grew beyond the configured depth.
    #[error("Notification cascade exceeded depth {0}")]
    CascadeTooDeep(usize),

    /// A reactive function failed.
    #[error("Function {function} failed on {target}: {message}")]
    Function {
        /// Function id (the URI it is registered under).
        function: String,
        /// Concept the function was invoked for.
        target: ConceptId,
        /// The failure reported by the function.
        message: String,
    },

    /// A recovered concept space is malformed.
    #[error("Invalid recovery data: {0}")]
    InvalidRecovery(String),

    /// An index no longer agrees with the concepts it is derived from.
    #[error("Index inconsistency: {0}")]
    IndexInconsistency(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for CrlError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_ids_are_deterministic() {
        let a = ConceptId::from_uri("http://example.com/a").expect("id");
        let b = ConceptId::from_uri("http://example.com/a").expect("id");
        let c = ConceptId::from_uri("http://example.com/c").expect("id");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ConceptId::generate(), ConceptId::generate());
    }

    #[test]
    fn relative_uri_rejected() {
        assert!(matches!(
            ConceptId::from_uri("not a uri"),
            Err(CrlError::InvalidUri(_))
        ));
        assert!(matches!(ConceptId::from_uri(""), Err(CrlError::InvalidUri(_))));
    }

    #[test]
    fn concept_id_parses_own_display() {
        let id = ConceptId::generate();
        let parsed: ConceptId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn attribute_names_use_persisted_spelling() {
        assert_eq!(AttributeName::OwningConceptId.as_str(), "OwningConceptID");
        assert_eq!(
            "RefinedConceptID".parse::<AttributeName>().expect("parse"),
            AttributeName::RefinedConceptId
        );
        assert_eq!(
            "".parse::<AttributeName>().expect("parse"),
            AttributeName::NoAttribute
        );
        assert!("Bogus".parse::<AttributeName>().is_err());
    }

    #[test]
    fn attribute_target_requirements() {
        assert_eq!(
            AttributeName::LiteralValue.required_target_type(),
            Some(ConceptType::Literal)
        );
        assert_eq!(AttributeName::Label.required_target_type(), None);
    }
}
