use std::collections::{BTreeMap, HashSet};

use extract::{CandidateRelationship, NameNormalizer, Provenance};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::ResolutionPlan;
use crate::model::{relationship_id, CanonicalRelationship};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    /// Relationship types with no inherent direction: A→B and B→A
    /// claims fold into one canonical direction. Types are compared in
    /// their normalized (SCREAMING_SNAKE) form.
    pub symmetric_types: HashSet<String>,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            symmetric_types: ["MERGED_WITH", "PARTNERED_WITH", "RELATED_TO"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// A relationship claim that could not be reconciled: unresolved
/// endpoint, or endpoints that merged into one entity. Flagged for
/// review, never guessed at or silently dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConflict {
    pub source: String,
    pub target: String,
    pub rel_type: String,
    pub provenance: Provenance,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    pub relationships: Vec<CanonicalRelationship>,
    pub conflicts: Vec<RelationshipConflict>,
}

/// Deduplicates candidate relationships between resolved canonical
/// entities. Identity is the (source, target, type) triple; repeated
/// sightings accumulate provenance and a saturating confidence.
pub struct RelationshipMerger {
    config: RelationshipConfig,
    normalizer: NameNormalizer,
}

impl RelationshipMerger {
    pub fn new(config: RelationshipConfig) -> Self {
        Self {
            config,
            normalizer: NameNormalizer::new(),
        }
    }

    pub fn merge(
        &self,
        candidates: &[CandidateRelationship],
        plan: &ResolutionPlan,
        existing: &[CanonicalRelationship],
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        // Seed with committed state so repeated sightings extend the
        // canonical edge instead of duplicating it.
        let mut by_triple: BTreeMap<(String, String, String), CanonicalRelationship> = existing
            .iter()
            .map(|rel| {
                (
                    (
                        rel.source_id.clone(),
                        rel.target_id.clone(),
                        rel.rel_type.clone(),
                    ),
                    rel.clone(),
                )
            })
            .collect();
        let mut touched: HashSet<(String, String, String)> = HashSet::new();

        let mut ordered: Vec<&CandidateRelationship> = candidates.iter().collect();
        ordered.sort_by_key(|c| {
            (
                c.provenance.clone(),
                c.source.clone(),
                c.target.clone(),
                c.rel_type.clone(),
            )
        });

        for candidate in ordered {
            let rel_type = normalize_rel_type(&candidate.rel_type);

            let resolve_endpoint = |surface: &str| {
                plan.lookup(
                    &candidate.provenance.chunk_id,
                    surface,
                    &self.normalizer.normalize(surface),
                )
                .map(str::to_string)
            };

            let (Some(mut source_id), Some(mut target_id)) = (
                resolve_endpoint(&candidate.source),
                resolve_endpoint(&candidate.target),
            ) else {
                outcome.conflicts.push(self.conflict(
                    candidate,
                    &rel_type,
                    "endpoint did not resolve to a canonical entity",
                ));
                continue;
            };

            if source_id == target_id {
                outcome.conflicts.push(self.conflict(
                    candidate,
                    &rel_type,
                    "endpoints resolved to the same canonical entity",
                ));
                continue;
            }

            // Symmetric types collapse both directions onto one
            // canonical ordering; asymmetric types keep direction.
            if self.config.symmetric_types.contains(&rel_type) && source_id > target_id {
                std::mem::swap(&mut source_id, &mut target_id);
            }

            let triple = (source_id.clone(), target_id.clone(), rel_type.clone());
            let canonical = by_triple.entry(triple.clone()).or_insert_with(|| {
                CanonicalRelationship {
                    id: relationship_id(&source_id, &target_id, &rel_type),
                    source_id,
                    target_id,
                    rel_type,
                    confidence: 0.0,
                    properties: BTreeMap::new(),
                    provenance: Vec::new(),
                }
            });
            touched.insert(triple);

            // Re-applying an already-counted sighting is a no-op, so
            // replays never inflate confidence.
            if canonical.provenance.contains(&candidate.provenance) {
                continue;
            }
            canonical.provenance.push(candidate.provenance.clone());
            canonical.provenance.sort();
            canonical.confidence = saturating_combine(canonical.confidence, candidate.confidence);

            for (key, value) in &candidate.properties {
                let values = canonical.properties.entry(key.clone()).or_default();
                if !values.contains(value) {
                    values.push(value.clone());
                }
            }
        }

        outcome.relationships = by_triple
            .into_iter()
            .filter(|(triple, _)| touched.contains(triple))
            .map(|(_, rel)| rel)
            .collect();

        debug!(
            relationships = outcome.relationships.len(),
            conflicts = outcome.conflicts.len(),
            "merged relationship batch"
        );

        outcome
    }

    fn conflict(
        &self,
        candidate: &CandidateRelationship,
        rel_type: &str,
        reason: &str,
    ) -> RelationshipConflict {
        RelationshipConflict {
            source: candidate.source.clone(),
            target: candidate.target.clone(),
            rel_type: rel_type.to_string(),
            provenance: candidate.provenance.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Monotone, saturating confidence combination: adding independent
/// provenance never lowers confidence and never exceeds 1.0.
pub fn saturating_combine(current: f32, observed: f32) -> f32 {
    let combined = 1.0 - (1.0 - current) * (1.0 - observed.clamp(0.0, 1.0));
    combined.min(1.0)
}

/// Relationship types are verbs in free form on the wire; canonicalize
/// to SCREAMING_SNAKE so "merged with" and "MERGED_WITH" are one type.
pub fn normalize_rel_type(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_uppercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}
