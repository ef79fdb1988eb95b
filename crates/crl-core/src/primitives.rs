//! # Core Primitives
//!
//! Fixed URIs and limits compiled into every Universe.
//!
//! Every Universe starts with the same core concept space. Its members are
//! identified by the URIs below, and because URI-named concepts derive their
//! IDs from the URI, the core concepts have the same IDs in every Universe.

/// Prefix shared by every core concept URI.
pub const CORE_PREFIX: &str = "http://activeCrl.com/core/";

/// URI of the concept that stands for the Universe itself.
///
/// UofDConceptAdded/Changed/Removed notifications are delivered here.
pub const UNIVERSE_URI: &str = "http://activeCrl.com/core/UniverseOfDiscourse";

/// URI of the core concept space, the owner of the four type concepts.
pub const CORE_CONCEPT_SPACE_URI: &str = "http://activeCrl.com/core/CoreConceptSpace";

/// URI of the core Element concept. Everything is a refinement of it.
pub const ELEMENT_URI: &str = "http://activeCrl.com/core/Element";

/// URI of the core Literal concept.
pub const LITERAL_URI: &str = "http://activeCrl.com/core/Literal";

/// URI of the core Reference concept.
pub const REFERENCE_URI: &str = "http://activeCrl.com/core/Reference";

/// URI of the core Refinement concept.
pub const REFINEMENT_URI: &str = "http://activeCrl.com/core/Refinement";

/// Function id of the housekeeping function.
///
/// Housekeeping runs first for every notification delivered to a concept,
/// whether or not the concept has a URI.
pub const HOUSEKEEPING_URI: &str = "http://activeCrl.com/core/coreHousekeeping";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a concept URI.
pub const MAX_URI_LENGTH: usize = 2048;

/// Maximum causal chain depth a notification may reach.
///
/// Forwarding past this depth fails with `CrlError::CascadeTooDeep`.
pub const MAX_NOTIFICATION_DEPTH: usize = 512;
