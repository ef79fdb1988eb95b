//! # Persistence Format
//!
//! JSON encoding of concepts and concept spaces.
//!
//! Each concept is a flat object whose values are all strings. Absent
//! pointers and unused type-specific fields are encoded as `""`. A concept
//! space is an array holding its root followed by the root's descendants in
//! pre-order.
//!
//! ## Recovery
//!
//! Recovery validates the whole payload before installing anything:
//! - the payload size is bounded (`MAX_PERSISTENCE_PAYLOAD_SIZE`)
//! - every record must parse and carry a unique identifier and URI
//! - a concept space must have exactly one root
//!
//! Recovered concepts keep their persisted versions. Recovery sends no
//! notifications.

use crate::concept::{Concept, ConceptKind};
use crate::transaction::Transaction;
use crate::types::{AttributeName, ConceptId, ConceptType, CrlError, validate_uri};
use crate::undo::UndoEntryKind;
use crate::universe::Universe;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// =============================================================================
// LIMITS
// =============================================================================

/// Maximum accepted size of a serialized concept or concept space.
///
/// Checked before parsing.
pub const MAX_PERSISTENCE_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// CONCEPT RECORD
// =============================================================================

/// The persisted form of one concept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptRecord {
    #[serde(rename = "ConceptID")]
    pub concept_id: String,
    #[serde(rename = "ConceptType")]
    pub concept_type: String,
    #[serde(rename = "OwningConceptID", default)]
    pub owning_concept_id: String,
    #[serde(rename = "Label", default)]
    pub label: String,
    #[serde(rename = "Definition", default)]
    pub definition: String,
    #[serde(rename = "URI", default)]
    pub uri: String,
    #[serde(rename = "IsCore", default)]
    pub is_core: String,
    #[serde(rename = "ReadOnly", default)]
    pub read_only: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "LiteralValue", default)]
    pub literal_value: String,
    #[serde(rename = "ReferencedConceptID", default)]
    pub referenced_concept_id: String,
    #[serde(rename = "ReferencedAttributeName", default)]
    pub referenced_attribute_name: String,
    #[serde(rename = "AbstractConceptID", default)]
    pub abstract_concept_id: String,
    #[serde(rename = "RefinedConceptID", default)]
    pub refined_concept_id: String,
}

fn id_text(id: Option<ConceptId>) -> String {
    id.map(|i| i.to_string()).unwrap_or_default()
}

fn parse_optional_id(field: &str, value: &str) -> Result<Option<ConceptId>, CrlError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| {
            CrlError::InvalidRecovery(format!("{} is not a concept id: {:?}", field, value))
        })
}

fn parse_flag(field: &str, value: &str) -> Result<bool, CrlError> {
    match value {
        "true" => Ok(true),
        "false" | "" => Ok(false),
        other => Err(CrlError::InvalidRecovery(format!(
            "{} must be \"true\" or \"false\", got {:?}",
            field, other
        ))),
    }
}

impl ConceptRecord {
    /// Encode a concept.
    #[must_use]
    pub fn from_concept(concept: &Concept) -> Self {
        let mut record = Self {
            concept_id: concept.id.to_string(),
            concept_type: concept.concept_type().as_str().to_string(),
            owning_concept_id: id_text(concept.owner),
            label: concept.label.clone(),
            definition: concept.definition.clone(),
            uri: concept.uri.clone().unwrap_or_default(),
            is_core: concept.is_core.to_string(),
            read_only: concept.read_only.to_string(),
            version: concept.version().to_string(),
            ..Self::default()
        };
        match &concept.kind {
            ConceptKind::Element => {}
            ConceptKind::Literal { value } => record.literal_value.clone_from(value),
            ConceptKind::Reference {
                referenced,
                attribute,
            } => {
                record.referenced_concept_id = id_text(*referenced);
                record.referenced_attribute_name = attribute.as_str().to_string();
            }
            ConceptKind::Refinement {
                abstract_concept,
                refined_concept,
            } => {
                record.abstract_concept_id = id_text(*abstract_concept);
                record.refined_concept_id = id_text(*refined_concept);
            }
        }
        record
    }

    /// Decode into a detached concept.
    ///
    /// Fields that do not belong to the record's concept type are ignored.
    pub fn to_concept(&self) -> Result<Concept, CrlError> {
        let id: ConceptId = self.concept_id.parse().map_err(|_| {
            CrlError::InvalidRecovery(format!(
                "ConceptID is not a concept id: {:?}",
                self.concept_id
            ))
        })?;
        let concept_type: ConceptType = self
            .concept_type
            .parse()
            .map_err(|e: CrlError| CrlError::InvalidRecovery(e.to_string()))?;
        let uri = if self.uri.is_empty() {
            None
        } else {
            validate_uri(&self.uri)?;
            Some(self.uri.clone())
        };
        let version = if self.version.is_empty() {
            0
        } else {
            self.version.parse::<u64>().map_err(|_| {
                CrlError::InvalidRecovery(format!("Version is not a number: {:?}", self.version))
            })?
        };

        let mut concept = Concept::new(id, concept_type, uri);
        concept.owner = parse_optional_id("OwningConceptID", &self.owning_concept_id)?;
        concept.label.clone_from(&self.label);
        concept.definition.clone_from(&self.definition);
        concept.is_core = parse_flag("IsCore", &self.is_core)?;
        concept.read_only = parse_flag("ReadOnly", &self.read_only)?;
        concept.version.set(version);
        concept.kind = match concept_type {
            ConceptType::Element => ConceptKind::Element,
            ConceptType::Literal => ConceptKind::Literal {
                value: self.literal_value.clone(),
            },
            ConceptType::Reference => ConceptKind::Reference {
                referenced: parse_optional_id("ReferencedConceptID", &self.referenced_concept_id)?,
                attribute: self
                    .referenced_attribute_name
                    .parse::<AttributeName>()
                    .map_err(|e| CrlError::InvalidRecovery(e.to_string()))?,
            },
            ConceptType::Refinement => ConceptKind::Refinement {
                abstract_concept: parse_optional_id(
                    "AbstractConceptID",
                    &self.abstract_concept_id,
                )?,
                refined_concept: parse_optional_id("RefinedConceptID", &self.refined_concept_id)?,
            },
        };
        Ok(concept)
    }
}

// =============================================================================
// ENCODING FUNCTIONS
// =============================================================================

fn check_size(json: &str) -> Result<(), CrlError> {
    if json.len() > MAX_PERSISTENCE_PAYLOAD_SIZE {
        return Err(CrlError::InvalidRecovery(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            json.len(),
            MAX_PERSISTENCE_PAYLOAD_SIZE
        )));
    }
    Ok(())
}

/// Encode records as a JSON array.
pub fn records_to_json(records: &[ConceptRecord]) -> Result<String, CrlError> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Decode a JSON array of records.
pub fn records_from_json(json: &str) -> Result<Vec<ConceptRecord>, CrlError> {
    check_size(json)?;
    serde_json::from_str(json)
        .map_err(|e| CrlError::InvalidRecovery(format!("Failed to parse concept space: {}", e)))
}

// =============================================================================
// UNIVERSE API
// =============================================================================

impl Universe {
    /// Serialize one concept.
    pub fn marshal_concept(
        &self,
        id: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<String, CrlError> {
        let concept = self.get_concept(id, trans).ok_or(CrlError::NotFound(*id))?;
        Ok(serde_json::to_string_pretty(&ConceptRecord::from_concept(&concept))?)
    }

    /// Serialize a concept and all its descendants, root first.
    pub fn marshal_concept_space(
        &self,
        root: &ConceptId,
        trans: &Transaction<'_>,
    ) -> Result<String, CrlError> {
        let mut records = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![*root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            let concept = self.get_concept(&id, trans).ok_or(CrlError::NotFound(id))?;
            records.push(ConceptRecord::from_concept(&concept));
            stack.extend(self.owned_concept_ids(&id).into_iter().rev());
        }
        records_to_json(&records)
    }

    /// Install a single serialized concept.
    pub fn recover_concept(
        &self,
        json: &str,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.check_transaction(trans)?;
        check_size(json)?;
        let record: ConceptRecord = serde_json::from_str(json)
            .map_err(|e| CrlError::InvalidRecovery(format!("Failed to parse concept: {}", e)))?;
        let concept = record.to_concept()?;
        self.check_recoverable(std::slice::from_ref(&concept), trans)?;
        let id = concept.id;
        self.install(concept, trans);
        Ok(id)
    }

    /// Install a serialized concept space, returning its root.
    pub fn recover_concept_space(
        &self,
        json: &str,
        trans: &Transaction<'_>,
    ) -> Result<ConceptId, CrlError> {
        self.check_transaction(trans)?;
        let records = records_from_json(json)?;
        let concepts = records
            .iter()
            .map(ConceptRecord::to_concept)
            .collect::<Result<Vec<_>, _>>()?;
        self.check_recoverable(&concepts, trans)?;

        let ids: BTreeSet<ConceptId> = concepts.iter().map(Concept::id).collect();
        let roots: Vec<ConceptId> = concepts
            .iter()
            .filter(|c| c.owner.is_none_or(|o| !ids.contains(&o)))
            .map(Concept::id)
            .collect();
        let [root] = roots.as_slice() else {
            return Err(CrlError::InvalidRecovery(format!(
                "a concept space needs exactly one root, found {}",
                roots.len()
            )));
        };
        let root = *root;

        for concept in concepts {
            self.install(concept, trans);
        }
        tracing::debug!(%root, count = ids.len(), "concept space recovered");
        Ok(root)
    }

    /// Reject identifiers and URIs that collide with members or each other,
    /// and owner chains that loop back through the batch.
    fn check_recoverable(
        &self,
        concepts: &[Concept],
        trans: &Transaction<'_>,
    ) -> Result<(), CrlError> {
        if concepts.is_empty() {
            return Err(CrlError::InvalidRecovery("no concepts to recover".to_string()));
        }
        let mut ids = BTreeSet::new();
        let mut uris = BTreeSet::new();
        for concept in concepts {
            if self.contains(&concept.id) || !ids.insert(concept.id) {
                return Err(CrlError::AlreadyExists(concept.id));
            }
            if let Some(uri) = &concept.uri {
                if let Some(holder) = self.concept_id_for_uri(uri) {
                    return Err(CrlError::DuplicateUri {
                        uri: uri.clone(),
                        holder,
                    });
                }
                if !uris.insert(uri.clone()) {
                    return Err(CrlError::DuplicateUri {
                        uri: uri.clone(),
                        holder: concept.id,
                    });
                }
            }
        }

        let owners: BTreeMap<ConceptId, Option<ConceptId>> =
            concepts.iter().map(|c| (c.id, c.owner)).collect();
        for concept in concepts {
            let mut visited = BTreeSet::new();
            let mut next = concept.owner;
            while let Some(owner) = next {
                if owner == concept.id {
                    return Err(CrlError::InvalidRecovery(format!(
                        "concept {} would own itself through its owner chain",
                        concept.id
                    )));
                }
                if !visited.insert(owner) {
                    break;
                }
                next = match owners.get(&owner) {
                    Some(batch_owner) => *batch_owner,
                    None => trans.view(&owner, Concept::owner).ok().flatten(),
                };
            }
        }
        Ok(())
    }

    fn install(&self, concept: Concept, trans: &Transaction<'_>) {
        let id = concept.id;
        let snapshot = concept.clone();
        let cell = Arc::new(RwLock::new(concept));
        let guard = cell.write_arc();
        self.insert_locked(Arc::clone(&cell), &guard);
        trans.adopt_write_guard(id, guard);
        self.record_undo(UndoEntryKind::Creation, &cell, &snapshot);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_space(uofd: &Universe, trans: &Transaction<'_>) -> ConceptId {
        let root = uofd.new_element(Some("http://example.com/space"), trans).expect("root");
        uofd.set_label(&root, "Space", trans).expect("label");
        let literal = uofd.new_literal(None, trans).expect("literal");
        uofd.set_literal_value(&literal, "value", trans).expect("value");
        uofd.set_owning_concept(&literal, Some(root), trans).expect("own");
        let reference = uofd.new_reference(None, trans).expect("reference");
        uofd.set_owning_concept(&reference, Some(root), trans).expect("own");
        uofd.set_referenced_concept(&reference, Some(literal), AttributeName::LiteralValue, trans)
            .expect("point");
        root
    }

    #[test]
    fn record_uses_persisted_field_names() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        let json = uofd.marshal_concept(&id, &trans).expect("marshal");
        let value: serde_json::Value = serde_json::from_str(&json).expect("json");

        assert_eq!(value["ConceptID"], id.to_string());
        assert_eq!(value["ConceptType"], "Element");
        assert_eq!(value["OwningConceptID"], "");
        assert_eq!(value["IsCore"], "false");
        assert_eq!(value["Version"], "0");
    }

    #[test]
    fn concept_space_recovers_into_fresh_universe() {
        let source = Universe::new();
        let trans = source.new_transaction();
        let root = sample_space(&source, &trans);
        let json = source.marshal_concept_space(&root, &trans).expect("marshal");

        let target = Universe::new();
        let target_trans = target.new_transaction();
        let recovered = target.recover_concept_space(&json, &target_trans).expect("recover");
        assert_eq!(recovered, root);

        for id in std::iter::once(root).chain(source.descendant_ids(&root)) {
            let a = source.get_concept(&id, &trans).expect("source");
            let b = target.get_concept(&id, &target_trans).expect("target");
            assert!(a.is_equivalent(&b));
        }
        assert_eq!(target.owned_concept_ids(&root), source.owned_concept_ids(&root));
        target.verify_indexes(&target_trans).expect("consistent");
    }

    #[test]
    fn root_is_first() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let root = sample_space(&uofd, &trans);
        let json = uofd.marshal_concept_space(&root, &trans).expect("marshal");
        let records = records_from_json(&json).expect("parse");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].concept_id, root.to_string());
    }

    #[test]
    fn two_roots_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let a = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        let b = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        let json = records_to_json(&[
            ConceptRecord::from_concept(&a),
            ConceptRecord::from_concept(&b),
        ])
        .expect("encode");
        let count = uofd.concept_count();
        assert!(matches!(
            uofd.recover_concept_space(&json, &trans),
            Err(CrlError::InvalidRecovery(_))
        ));
        assert_eq!(uofd.concept_count(), count);
    }

    #[test]
    fn existing_member_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let id = uofd.new_element(None, &trans).expect("create");
        let json = uofd.marshal_concept(&id, &trans).expect("marshal");
        assert!(matches!(
            uofd.recover_concept(&json, &trans),
            Err(CrlError::AlreadyExists(found)) if found == id
        ));
    }

    #[test]
    fn malformed_fields_rejected() {
        let record = ConceptRecord {
            concept_id: ConceptId::generate().to_string(),
            concept_type: "Element".to_string(),
            is_core: "maybe".to_string(),
            ..ConceptRecord::default()
        };
        assert!(matches!(record.to_concept(), Err(CrlError::InvalidRecovery(_))));

        let record = ConceptRecord {
            concept_id: "not-a-uuid".to_string(),
            concept_type: "Element".to_string(),
            ..ConceptRecord::default()
        };
        assert!(matches!(record.to_concept(), Err(CrlError::InvalidRecovery(_))));
    }

    #[test]
    fn recovery_sends_no_notifications() {
        let source = Universe::new();
        let trans = source.new_transaction();
        let root = sample_space(&source, &trans);
        let json = source.marshal_concept_space(&root, &trans).expect("marshal");

        let target = Universe::new();
        let recorder = Arc::new(crate::dispatch::NotificationRecorder::new());
        let observer: Arc<dyn crate::dispatch::Observer> = recorder.clone();
        target.register_observer(observer);
        let target_trans = target.new_transaction();
        target.recover_concept_space(&json, &target_trans).expect("recover");
        assert!(recorder.records().is_empty());
    }

    fn owned_by(owner: Option<ConceptId>) -> Concept {
        let mut concept = Concept::new(ConceptId::generate(), ConceptType::Element, None);
        concept.owner = owner;
        concept
    }

    fn record_json(concept: &Concept) -> String {
        serde_json::to_string(&ConceptRecord::from_concept(concept)).expect("encode")
    }

    /// The second half of a two-concept owner loop is refused.
    #[test]
    fn owner_cycle_across_recoveries_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let b_id = ConceptId::generate();
        let a = owned_by(Some(b_id));
        let mut b = owned_by(Some(a.id));
        b.id = b_id;

        uofd.recover_concept(&record_json(&a), &trans).expect("first half");
        let count = uofd.concept_count();
        assert!(matches!(
            uofd.recover_concept(&record_json(&b), &trans),
            Err(CrlError::InvalidRecovery(_))
        ));
        assert_eq!(uofd.concept_count(), count);
        assert!(!uofd.contains(&b_id));
    }

    #[test]
    fn owner_cycle_inside_space_rejected() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let root = owned_by(None);
        let b_id = ConceptId::generate();
        let a = owned_by(Some(b_id));
        let mut b = owned_by(Some(a.id));
        b.id = b_id;
        let json = records_to_json(&[
            ConceptRecord::from_concept(&root),
            ConceptRecord::from_concept(&a),
            ConceptRecord::from_concept(&b),
        ])
        .expect("encode");

        let count = uofd.concept_count();
        assert!(matches!(
            uofd.recover_concept_space(&json, &trans),
            Err(CrlError::InvalidRecovery(_))
        ));
        assert_eq!(uofd.concept_count(), count);
    }

    /// Marshalling visits each concept once even if the ownership index loops.
    #[test]
    fn marshal_stops_at_owner_loop() {
        let uofd = Universe::new();
        let trans = uofd.new_transaction();
        let b_id = ConceptId::generate();
        let a = owned_by(Some(b_id));
        let a_id = a.id;
        let mut b = owned_by(Some(a_id));
        b.id = b_id;
        uofd.install(a, &trans);
        uofd.install(b, &trans);
        assert!(uofd.owned_concept_ids(&a_id).contains(&b_id));
        assert!(uofd.owned_concept_ids(&b_id).contains(&a_id));

        let json = uofd.marshal_concept_space(&a_id, &trans).expect("marshal");
        let records = records_from_json(&json).expect("parse");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].concept_id, a_id.to_string());
    }
}
