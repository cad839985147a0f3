pub mod compat;
pub mod entity;
pub mod model;
pub mod relationship;
pub mod similarity;
pub mod union_find;

pub use compat::TypeCompatibility;
pub use entity::{EntityResolver, ResolutionPlan, ResolverConfig};
pub use model::{entity_id, relationship_id, CanonicalEntity, CanonicalRelationship};
pub use relationship::{
    normalize_rel_type, saturating_combine, MergeOutcome, RelationshipConfig,
    RelationshipConflict, RelationshipMerger,
};
pub use union_find::UnionFind;

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{CandidateEntity, CandidateRelationship, PropertyBag, PropertyValue, Provenance};
    use std::collections::HashMap;

    fn provenance(chunk: &str) -> Provenance {
        Provenance {
            doc_id: "doc-1".into(),
            chunk_id: chunk.into(),
        }
    }

    fn candidate(name: &str, entity_type: &str, chunk: &str, confidence: f32) -> CandidateEntity {
        CandidateEntity {
            name: name.into(),
            entity_type: entity_type.into(),
            properties: PropertyBag::new(),
            provenance: provenance(chunk),
            confidence,
        }
    }

    fn rel_candidate(
        source: &str,
        target: &str,
        rel_type: &str,
        chunk: &str,
        confidence: f32,
    ) -> CandidateRelationship {
        CandidateRelationship {
            source: source.into(),
            target: target.into(),
            rel_type: rel_type.into(),
            properties: PropertyBag::new(),
            provenance: provenance(chunk),
            confidence,
        }
    }

    fn no_embeddings() -> HashMap<String, Vec<f32>> {
        HashMap::new()
    }

    #[test]
    fn name_variants_merge_into_one_canonical() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let candidates = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Acme Corporation", "Organization", "c2", 0.8),
        ];

        let plan = resolver.resolve(&candidates, &no_embeddings(), &[]);

        assert_eq!(plan.entities.len(), 1);
        let entity = &plan.entities[0];
        assert_eq!(entity.name_key, "acme");
        assert_eq!(entity.provenance.len(), 2);
    }

    #[test]
    fn incompatible_types_never_merge() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let candidates = vec![
            candidate("Jordan", "Person", "c1", 0.9),
            candidate("Jordan", "Organization", "c2", 0.9),
        ];

        let plan = resolver.resolve(&candidates, &no_embeddings(), &[]);
        assert_eq!(plan.entities.len(), 2);
    }

    #[test]
    fn incompatible_types_ignore_embedding_similarity() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let mut embeddings = HashMap::new();
        // Identical embeddings: cosine similarity is exactly 1.0.
        embeddings.insert("c1".to_string(), vec![0.5, 0.5, 0.5]);
        embeddings.insert("c2".to_string(), vec![0.5, 0.5, 0.5]);
        let candidates = vec![
            candidate("Jordan", "Person", "c1", 0.9),
            candidate("Jordan", "Organization", "c2", 0.9),
        ];

        let plan = resolver.resolve(&candidates, &embeddings, &[]);
        assert_eq!(plan.entities.len(), 2);
    }

    #[test]
    fn merging_is_transitive_without_direct_comparison() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        // A ~ B (shared "acme") and B ~ C (shared "international"),
        // while A and C share no block and are never scored directly.
        let candidates = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Acme International", "Organization", "c2", 0.9),
            candidate("International", "Organization", "c3", 0.9),
        ];

        let plan = resolver.resolve(&candidates, &no_embeddings(), &[]);
        assert_eq!(plan.entities.len(), 1);
        assert_eq!(plan.entities[0].provenance.len(), 3);
    }

    #[test]
    fn merge_threshold_is_configuration_not_mechanism() {
        let strict = EntityResolver::new(ResolverConfig {
            merge_threshold: 0.95,
            ..ResolverConfig::default()
        });
        let lenient = EntityResolver::new(ResolverConfig {
            merge_threshold: 0.3,
            ..ResolverConfig::default()
        });
        let candidates = vec![
            candidate("Acme Group", "Organization", "c1", 0.9),
            candidate("Acme Holdings", "Organization", "c2", 0.9),
        ];

        let plan = strict.resolve(&candidates, &no_embeddings(), &[]);
        assert_eq!(plan.entities.len(), 2);

        let plan = lenient.resolve(&candidates, &no_embeddings(), &[]);
        assert_eq!(plan.entities.len(), 1);
    }

    #[test]
    fn most_established_canonical_absorbs() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let small = CanonicalEntity {
            id: "existing-small".into(),
            name: "Acme".into(),
            entity_type: "Organization".into(),
            name_key: "acme".into(),
            properties: PropertyBag::new(),
            provenance: vec![provenance("old-1")],
            merged_from: vec![],
            embedding: None,
        };
        let large = CanonicalEntity {
            id: "existing-large".into(),
            name: "Acme Corporation".into(),
            entity_type: "Organization".into(),
            name_key: "acme".into(),
            properties: PropertyBag::new(),
            provenance: vec![
                provenance("old-2"),
                provenance("old-3"),
                provenance("old-4"),
            ],
            merged_from: vec![],
            embedding: None,
        };
        let candidates = vec![candidate("Acme Corp", "Organization", "c1", 0.9)];

        let plan = resolver.resolve(&candidates, &no_embeddings(), &[small, large]);

        assert_eq!(plan.entities.len(), 1);
        let entity = &plan.entities[0];
        assert_eq!(entity.id, "existing-large");
        assert!(entity.merged_from.contains(&"existing-small".to_string()));
        assert_eq!(entity.provenance.len(), 5);
    }

    #[test]
    fn new_canonical_ids_are_deterministic() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let candidates = vec![candidate("Beta Inc", "Organization", "c1", 0.9)];

        let a = resolver.resolve(&candidates, &no_embeddings(), &[]);
        let b = resolver.resolve(&candidates, &no_embeddings(), &[]);
        assert_eq!(a.entities[0].id, b.entities[0].id);
        assert_eq!(a.entities[0].id, entity_id("organization", "beta"));
    }

    #[test]
    fn numeric_properties_keep_highest_confidence_value() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let mut low = candidate("Acme Corp", "Organization", "c1", 0.4);
        low.properties
            .insert("value".into(), PropertyValue::Number(100.0));
        low.properties
            .insert("note".into(), PropertyValue::Text("first".into()));
        let mut high = candidate("Acme Corp", "Organization", "c0", 0.9);
        high.properties
            .insert("value".into(), PropertyValue::Number(250.0));
        high.properties
            .insert("note".into(), PropertyValue::Text("second".into()));

        let plan = resolver.resolve(&[low, high], &no_embeddings(), &[]);
        let entity = &plan.entities[0];

        // Number: highest confidence wins regardless of arrival order.
        assert_eq!(entity.properties["value"], PropertyValue::Number(250.0));
        // Text: last writer in arrival (chunk) order wins; c1 sorts
        // after c0.
        assert_eq!(entity.properties["note"], PropertyValue::Text("first".into()));
    }

    #[test]
    fn entity_embedding_is_mean_of_mentioning_chunks() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let mut embeddings = HashMap::new();
        embeddings.insert("c1".to_string(), vec![1.0, 3.0]);
        embeddings.insert("c2".to_string(), vec![3.0, 5.0]);
        let candidates = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Acme Corp", "Organization", "c2", 0.9),
        ];

        let plan = resolver.resolve(&candidates, &embeddings, &[]);
        assert_eq!(plan.entities[0].embedding, Some(vec![2.0, 4.0]));
    }

    #[test]
    fn repeated_triples_accumulate_instead_of_duplicating() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        let entities = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Beta Inc", "Organization", "c1", 0.9),
            candidate("Acme Corp", "Organization", "c2", 0.9),
            candidate("Beta Inc", "Organization", "c2", 0.9),
        ];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);

        let rels = vec![
            rel_candidate("Acme Corp", "Beta Inc", "OWNS", "c1", 0.6),
            rel_candidate("Acme Corp", "Beta Inc", "OWNS", "c2", 0.5),
        ];
        let outcome = merger.merge(&rels, &plan, &[]);

        assert_eq!(outcome.relationships.len(), 1);
        let rel = &outcome.relationships[0];
        assert_eq!(rel.provenance.len(), 2);
        let expected = saturating_combine(saturating_combine(0.0, 0.6), 0.5);
        assert!((rel.confidence - expected).abs() < 1e-6);
    }

    #[test]
    fn symmetric_types_fold_into_one_direction() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        let entities = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Beta Inc", "Organization", "c1", 0.9),
            candidate("Acme Corp", "Organization", "c2", 0.9),
            candidate("Beta Inc", "Organization", "c2", 0.9),
        ];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);

        let rels = vec![
            rel_candidate("Acme Corp", "Beta Inc", "MERGED_WITH", "c1", 0.7),
            rel_candidate("Beta Inc", "Acme Corp", "MERGED_WITH", "c2", 0.7),
        ];
        let outcome = merger.merge(&rels, &plan, &[]);
        assert_eq!(outcome.relationships.len(), 1);
        assert_eq!(outcome.relationships[0].provenance.len(), 2);
    }

    #[test]
    fn asymmetric_types_keep_both_directions() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        let entities = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Beta Inc", "Organization", "c1", 0.9),
        ];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);

        let rels = vec![
            rel_candidate("Acme Corp", "Beta Inc", "SUPPLIES", "c1", 0.7),
            rel_candidate("Beta Inc", "Acme Corp", "SUPPLIES", "c1", 0.7),
        ];
        let outcome = merger.merge(&rels, &plan, &[]);
        assert_eq!(outcome.relationships.len(), 2);
    }

    #[test]
    fn conflicting_property_values_are_retained_as_list() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        let entities = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Beta Inc", "Organization", "c1", 0.9),
            candidate("Acme Corp", "Organization", "c2", 0.9),
            candidate("Beta Inc", "Organization", "c2", 0.9),
        ];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);

        let mut first = rel_candidate("Acme Corp", "Beta Inc", "OWNS", "c1", 0.6);
        first
            .properties
            .insert("shares".into(), PropertyValue::Number(100.0));
        let mut second = rel_candidate("Acme Corp", "Beta Inc", "OWNS", "c2", 0.6);
        second
            .properties
            .insert("shares".into(), PropertyValue::Number(250.0));

        let outcome = merger.merge(&[first, second], &plan, &[]);
        let rel = &outcome.relationships[0];
        assert_eq!(
            rel.properties["shares"],
            vec![PropertyValue::Number(100.0), PropertyValue::Number(250.0)]
        );
    }

    #[test]
    fn unresolved_endpoint_is_flagged_not_guessed() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        let entities = vec![candidate("Acme Corp", "Organization", "c1", 0.9)];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);

        let rels = vec![rel_candidate("Acme Corp", "Unseen Co", "OWNS", "c1", 0.9)];
        let outcome = merger.merge(&rels, &plan, &[]);

        assert!(outcome.relationships.is_empty());
        assert_eq!(outcome.conflicts.len(), 1);
        assert!(outcome.conflicts[0].reason.contains("did not resolve"));
    }

    #[test]
    fn merged_endpoints_surface_as_self_loop_conflict() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        // Both surface forms resolve to the same canonical entity.
        let entities = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Acme Corporation", "Organization", "c1", 0.9),
        ];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);
        assert_eq!(plan.entities.len(), 1);

        let rels = vec![rel_candidate(
            "Acme Corp",
            "Acme Corporation",
            "ACQUIRED",
            "c1",
            0.9,
        )];
        let outcome = merger.merge(&rels, &plan, &[]);

        assert!(outcome.relationships.is_empty());
        assert_eq!(outcome.conflicts.len(), 1);
        assert!(outcome.conflicts[0].reason.contains("same canonical"));
    }

    #[test]
    fn replaying_the_same_sighting_is_a_no_op() {
        let resolver = EntityResolver::new(ResolverConfig::default());
        let merger = RelationshipMerger::new(RelationshipConfig::default());
        let entities = vec![
            candidate("Acme Corp", "Organization", "c1", 0.9),
            candidate("Beta Inc", "Organization", "c1", 0.9),
        ];
        let plan = resolver.resolve(&entities, &no_embeddings(), &[]);

        let rels = vec![rel_candidate("Acme Corp", "Beta Inc", "OWNS", "c1", 0.6)];
        let first = merger.merge(&rels, &plan, &[]);
        let replay = merger.merge(&rels, &plan, &first.relationships);

        assert_eq!(replay.relationships.len(), 1);
        assert_eq!(replay.relationships[0].provenance.len(), 1);
        assert_eq!(
            replay.relationships[0].confidence,
            first.relationships[0].confidence
        );
    }
}
