use std::collections::BTreeMap;

use extract::{PropertyBag, PropertyValue, Provenance};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The resolved, graph-persisted form of an entity. Identified by a
/// stable content-derived id so concurrent writers converge on the
/// same node through keyed upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: String,
    /// Display name, chosen from the surface forms seen so far.
    pub name: String,
    pub entity_type: String,
    /// Normalized name used for candidate-match lookup during resolution.
    pub name_key: String,
    pub properties: PropertyBag,
    /// Never empty: every canonical entity cites at least one chunk.
    pub provenance: Vec<Provenance>,
    /// Ids of canonical entities absorbed into this one. Absorption is
    /// one-way; an absorbed entity is never split back out.
    pub merged_from: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

/// The resolved form of a relationship. Identity is the ordered triple
/// (source, target, type); repeated sightings accumulate provenance
/// instead of creating duplicate edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub rel_type: String,
    pub confidence: f32,
    /// Conflicting values across provenance are retained as a list per
    /// key, preserving traceability instead of overwriting.
    pub properties: BTreeMap<String, Vec<PropertyValue>>,
    pub provenance: Vec<Provenance>,
}

/// Stable entity id from the compatibility group and normalized name.
/// Two documents that independently resolve the same real-world entity
/// derive the same id, which is what makes concurrent upserts converge.
pub fn entity_id(type_group: &str, name_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"entity\x00");
    hasher.update(type_group.as_bytes());
    hasher.update(b"\x00");
    hasher.update(name_key.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Stable relationship id from the identity triple.
pub fn relationship_id(source_id: &str, target_id: &str, rel_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"rel\x00");
    hasher.update(source_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(target_id.as_bytes());
    hasher.update(b"\x00");
    hasher.update(rel_type.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}
