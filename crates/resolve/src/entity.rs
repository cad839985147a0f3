use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use extract::{CandidateEntity, NameNormalizer, PropertyValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compat::TypeCompatibility;
use crate::model::{entity_id, CanonicalEntity};
use crate::similarity::{cosine, mean_embedding, name_similarity};
use crate::union_find::UnionFind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Combined score at or above which two candidates merge.
    pub merge_threshold: f64,
    pub name_weight: f64,
    pub embedding_weight: f64,
    #[serde(default)]
    pub type_compatibility: TypeCompatibility,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.82,
            name_weight: 0.6,
            embedding_weight: 0.4,
            type_compatibility: TypeCompatibility::default(),
        }
    }
}

/// The resolver's output: merge decisions only. Nothing here has
/// touched the graph yet; the writer commits each group atomically.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    pub entities: Vec<CanonicalEntity>,
    /// (chunk_id, surface name) -> canonical id.
    assignments: HashMap<(String, String), String>,
    /// Normalized name -> canonical id, document-level fallback.
    by_name_key: HashMap<String, String>,
}

impl ResolutionPlan {
    /// Canonical id for a surface name seen in a chunk. Falls back to
    /// the document-wide normalized-name map when the exact chunk did
    /// not declare the entity.
    pub fn lookup(&self, chunk_id: &str, surface: &str, name_key: &str) -> Option<&str> {
        self.assignments
            .get(&(chunk_id.to_string(), surface.to_string()))
            .or_else(|| self.by_name_key.get(name_key))
            .map(String::as_str)
    }
}

enum ItemSource {
    Candidate(usize),
    Existing(usize),
}

struct Item {
    name_key: String,
    type_tag: String,
    embedding: Option<Vec<f32>>,
}

/// Decides which candidate entities merge into which canonical
/// entities. Deterministic and order-independent: all pairwise merge
/// edges go through a union-find before any decision is emitted.
pub struct EntityResolver {
    config: ResolverConfig,
    normalizer: NameNormalizer,
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            normalizer: NameNormalizer::new(),
        }
    }

    pub fn normalizer(&self) -> &NameNormalizer {
        &self.normalizer
    }

    /// Resolve one batch of candidates against the canonical entities
    /// already committed to the graph.
    pub fn resolve(
        &self,
        candidates: &[CandidateEntity],
        chunk_embeddings: &HashMap<String, Vec<f32>>,
        existing: &[CanonicalEntity],
    ) -> ResolutionPlan {
        let mut items: Vec<(Item, ItemSource)> = Vec::new();

        for (i, candidate) in candidates.iter().enumerate() {
            items.push((
                Item {
                    name_key: self.normalizer.normalize(&candidate.name),
                    type_tag: candidate.entity_type.clone(),
                    embedding: chunk_embeddings.get(&candidate.provenance.chunk_id).cloned(),
                },
                ItemSource::Candidate(i),
            ));
        }
        for (i, canonical) in existing.iter().enumerate() {
            items.push((
                Item {
                    name_key: canonical.name_key.clone(),
                    type_tag: canonical.entity_type.clone(),
                    embedding: canonical.embedding.clone(),
                },
                ItemSource::Existing(i),
            ));
        }

        let mut uf = UnionFind::new(items.len());

        // Token blocking: an item joins one block per token of its
        // normalized name, so "Acme International" is compared against
        // both the "acme" and the "international" neighborhoods.
        let mut blocks: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, (item, _)) in items.iter().enumerate() {
            for token in item.name_key.split_whitespace() {
                blocks.entry(token).or_default().push(idx);
            }
        }

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for members in blocks.values() {
            for (a, &i) in members.iter().enumerate() {
                for &j in &members[a + 1..] {
                    if !seen.insert((i, j)) {
                        continue;
                    }
                    let (left, right) = (&items[i].0, &items[j].0);
                    if !self
                        .config
                        .type_compatibility
                        .compatible(&left.type_tag, &right.type_tag)
                    {
                        continue;
                    }
                    if self.pair_score(left, right) >= self.config.merge_threshold {
                        uf.union(i, j);
                    }
                }
            }
        }

        self.build_plan(candidates, existing, chunk_embeddings, &mut uf, &items)
    }

    /// Weighted combination of normalized-name similarity and embedding
    /// cosine. Name similarity alone decides when either side has no
    /// embedding.
    fn pair_score(&self, a: &Item, b: &Item) -> f64 {
        let name_score = name_similarity(&a.name_key, &b.name_key);
        match (&a.embedding, &b.embedding) {
            (Some(ea), Some(eb)) => {
                let total = self.config.name_weight + self.config.embedding_weight;
                if total <= 0.0 {
                    return name_score;
                }
                (self.config.name_weight * name_score
                    + self.config.embedding_weight * cosine(ea, eb))
                    / total
            }
            _ => name_score,
        }
    }

    fn build_plan(
        &self,
        candidates: &[CandidateEntity],
        existing: &[CanonicalEntity],
        chunk_embeddings: &HashMap<String, Vec<f32>>,
        uf: &mut UnionFind,
        items: &[(Item, ItemSource)],
    ) -> ResolutionPlan {
        let mut plan = ResolutionPlan::default();

        for members in uf.groups().values() {
            let mut cand_members: Vec<&CandidateEntity> = Vec::new();
            let mut exist_members: Vec<&CanonicalEntity> = Vec::new();
            for &idx in members {
                match items[idx].1 {
                    ItemSource::Candidate(i) => cand_members.push(&candidates[i]),
                    ItemSource::Existing(i) => exist_members.push(&existing[i]),
                }
            }
            // Groups of untouched existing entities need no upsert;
            // two or more unified heads are healed even without a
            // bridging candidate.
            if cand_members.is_empty() && exist_members.len() < 2 {
                continue;
            }

            let canonical = self.build_canonical(&cand_members, &exist_members, chunk_embeddings);

            if cand_members.len() + exist_members.len() > 1 {
                debug!(
                    id = %canonical.id,
                    name = %canonical.name,
                    members = cand_members.len() + exist_members.len(),
                    "merged entity group"
                );
            }

            for candidate in &cand_members {
                plan.assignments.insert(
                    (
                        candidate.provenance.chunk_id.clone(),
                        candidate.name.clone(),
                    ),
                    canonical.id.clone(),
                );
                plan.by_name_key.insert(
                    self.normalizer.normalize(&candidate.name),
                    canonical.id.clone(),
                );
            }
            plan.by_name_key
                .insert(canonical.name_key.clone(), canonical.id.clone());
            plan.entities.push(canonical);
        }

        plan.entities.sort_by(|a, b| a.id.cmp(&b.id));
        plan
    }

    fn build_canonical(
        &self,
        cand_members: &[&CandidateEntity],
        exist_members: &[&CanonicalEntity],
        chunk_embeddings: &HashMap<String, Vec<f32>>,
    ) -> CanonicalEntity {
        let compat = &self.config.type_compatibility;

        // Tie-break: the canonical with the most prior provenance
        // absorbs the rest of the group.
        let absorber = exist_members
            .iter()
            .copied()
            .max_by(|a, b| {
                a.provenance
                    .len()
                    .cmp(&b.provenance.len())
                    .then_with(|| b.id.cmp(&a.id))
            });

        let (id, name, entity_type, name_key) = match absorber {
            Some(existing) => (
                existing.id.clone(),
                existing.name.clone(),
                existing.entity_type.clone(),
                existing.name_key.clone(),
            ),
            None => {
                let name_key = most_frequent(
                    cand_members
                        .iter()
                        .map(|c| self.normalizer.normalize(&c.name)),
                )
                .unwrap_or_default();
                let entity_type = most_frequent(
                    cand_members
                        .iter()
                        .map(|c| c.entity_type.clone())
                        .filter(|t| !t.trim().is_empty()),
                )
                .unwrap_or_default();
                let name = cand_members
                    .iter()
                    .map(|c| c.name.clone())
                    .max_by(|a, b| a.len().cmp(&b.len()).then_with(|| b.cmp(a)))
                    .unwrap_or_default();
                let id = entity_id(&compat.group_of(&entity_type), &name_key);
                (id, name, entity_type, name_key)
            }
        };

        // Property merge: last-writer-wins in deterministic arrival
        // order, except numbers which keep the highest-confidence value.
        let mut properties = absorber.map(|a| a.properties.clone()).unwrap_or_default();
        let mut number_confidence: HashMap<String, f32> = HashMap::new();

        let mut ordered: Vec<&&CandidateEntity> = cand_members.iter().collect();
        ordered.sort_by_key(|c| (c.provenance.clone(), c.name.clone()));

        for candidate in ordered {
            for (key, value) in &candidate.properties {
                match value {
                    PropertyValue::Number(_) => {
                        let best = number_confidence.get(key).copied().unwrap_or(f32::MIN);
                        if candidate.confidence >= best {
                            properties.insert(key.clone(), value.clone());
                            number_confidence.insert(key.clone(), candidate.confidence);
                        }
                    }
                    _ => {
                        properties.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let mut provenance: BTreeSet<extract::Provenance> = BTreeSet::new();
        for existing in exist_members {
            provenance.extend(existing.provenance.iter().cloned());
        }
        for candidate in cand_members {
            provenance.insert(candidate.provenance.clone());
        }

        let mut merged_from: BTreeSet<String> = absorber
            .map(|a| a.merged_from.iter().cloned().collect())
            .unwrap_or_default();
        for existing in exist_members {
            if existing.id != id {
                merged_from.insert(existing.id.clone());
            }
        }

        // Entity-level embedding: mean over the distinct chunks that
        // mention the entity, keeping the absorber's when no mention
        // carried one.
        let mention_chunks: BTreeSet<&str> = cand_members
            .iter()
            .map(|c| c.provenance.chunk_id.as_str())
            .collect();
        let vectors: Vec<&[f32]> = mention_chunks
            .iter()
            .filter_map(|chunk_id| chunk_embeddings.get(*chunk_id))
            .map(|v| v.as_slice())
            .collect();
        let embedding =
            mean_embedding(&vectors).or_else(|| absorber.and_then(|a| a.embedding.clone()));

        CanonicalEntity {
            id,
            name,
            entity_type,
            name_key,
            properties,
            provenance: provenance.into_iter().collect(),
            merged_from: merged_from.into_iter().collect(),
            embedding,
        }
    }
}

fn most_frequent<I: Iterator<Item = String>>(values: I) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(value, _)| value)
}
