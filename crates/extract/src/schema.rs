use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scalar property kinds allowed in entity and relationship bags.
/// The set of kinds is closed; the property names are open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

pub type PropertyBag = BTreeMap<String, PropertyValue>;

/// Which document and chunk a candidate came from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub doc_id: String,
    pub chunk_id: String,
}

/// An unresolved entity extraction, scoped to one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntity {
    /// Surface form as it appeared in the text.
    pub name: String,
    /// Open type tag ("Person", "Organization", ...), not an enum.
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub properties: PropertyBag,
    pub provenance: Provenance,
    pub confidence: f32,
}

/// An unresolved relationship extraction, endpoints given by the
/// surface names of entities declared in the same chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: PropertyBag,
    pub provenance: Provenance,
    pub confidence: f32,
}

/// Wire schema of the external extractor response, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub entities: Vec<RawEntity>,
    #[serde(default)]
    pub relationships: Vec<RawRelationship>,
    /// Response-level confidence, used when an item carries none.
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub properties: PropertyBag,
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default)]
    pub properties: PropertyBag,
    pub confidence: Option<f32>,
}

impl RawExtraction {
    /// Validate the response against the contract: non-empty entity
    /// names, confidences within [0,1], and relationship endpoints that
    /// reference entities declared in the same response. Returns the
    /// first violation; one violation drops the whole chunk's candidates.
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |c: &Option<f32>| c.is_none_or(|c| (0.0..=1.0).contains(&c));

        if !in_range(&self.confidence) {
            return Err(format!("response confidence out of range: {:?}", self.confidence));
        }

        for entity in &self.entities {
            if entity.name.trim().is_empty() {
                return Err("entity with empty name".to_string());
            }
            if !in_range(&entity.confidence) {
                return Err(format!(
                    "entity '{}' confidence out of range: {:?}",
                    entity.name, entity.confidence
                ));
            }
        }

        for rel in &self.relationships {
            if rel.rel_type.trim().is_empty() {
                return Err(format!(
                    "relationship {} -> {} with empty type",
                    rel.source, rel.target
                ));
            }
            if !in_range(&rel.confidence) {
                return Err(format!(
                    "relationship '{}' confidence out of range: {:?}",
                    rel.rel_type, rel.confidence
                ));
            }
            for endpoint in [&rel.source, &rel.target] {
                if !self.entities.iter().any(|e| &e.name == endpoint) {
                    return Err(format!(
                        "relationship endpoint '{endpoint}' not among declared entities"
                    ));
                }
            }
        }

        Ok(())
    }
}
