use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use resolve::{CanonicalEntity, CanonicalRelationship};

use crate::store::{ChunkRecord, GraphStats, GraphStore, StoreError, WriteBatch};

#[derive(Default)]
struct Inner {
    entities: HashMap<String, CanonicalEntity>,
    relationships: HashMap<String, CanonicalRelationship>,
    chunks: HashMap<String, ChunkRecord>,
    /// absorbed entity id -> absorber id, followed on reads.
    redirects: HashMap<String, String>,
}

/// In-memory graph store with real transaction semantics: a batch is
/// validated and applied under one lock, all-or-nothing. Backs the
/// test suites and doubles as a reference for what the Bolt-backed
/// store must guarantee.
#[derive(Default)]
pub struct InMemoryGraphStore {
    inner: Mutex<Inner>,
    /// Fault injection: number of upcoming `apply` calls to fail
    /// transiently / permanently, for retry-path tests.
    transient_failures: AtomicUsize,
    permanent_failures: AtomicUsize,
    applies: AtomicUsize,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_transient(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_permanent(&self, count: usize) {
        self.permanent_failures.store(count, Ordering::SeqCst);
    }

    /// Number of `apply` calls that reached the store, including the
    /// ones that were failed by injection.
    pub fn apply_calls(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    fn take_injected_failure(&self) -> Option<StoreError> {
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Some(StoreError::Transient("injected transient failure".into()));
        }
        if self
            .permanent_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Some(StoreError::Permanent("injected permanent failure".into()));
        }
        None
    }

    fn resolve_head<'a>(inner: &'a Inner, id: &str) -> Option<&'a CanonicalEntity> {
        let mut current = id;
        let mut hops = 0;
        while let Some(next) = inner.redirects.get(current) {
            current = next;
            hops += 1;
            if hops > inner.redirects.len() {
                break;
            }
        }
        inner.entities.get(current)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_injected_failure() {
            return Err(err);
        }

        let mut inner = self.inner.lock().expect("store lock poisoned");

        // Validate before mutating so a failed batch leaves no trace,
        // matching the all-or-nothing contract.
        for rel in &batch.relationships {
            for endpoint in [&rel.source_id, &rel.target_id] {
                let known = inner.entities.contains_key(endpoint)
                    || inner.redirects.contains_key(endpoint)
                    || batch.entities.iter().any(|e| &e.id == endpoint);
                if !known {
                    return Err(StoreError::Permanent(format!(
                        "relationship {} references unknown entity {}",
                        rel.id, endpoint
                    )));
                }
            }
        }

        for entity in &batch.entities {
            for absorbed in &entity.merged_from {
                if absorbed != &entity.id {
                    inner.redirects.insert(absorbed.clone(), entity.id.clone());
                }
            }
            inner.entities.insert(entity.id.clone(), entity.clone());
        }
        for record in &batch.chunks {
            inner
                .chunks
                .insert(record.chunk.chunk_id.clone(), record.clone());
        }
        for rel in &batch.relationships {
            inner.relationships.insert(rel.id.clone(), rel.clone());
        }

        Ok(())
    }

    async fn find_matching_entities(
        &self,
        name_keys: &[String],
    ) -> Result<Vec<CanonicalEntity>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let keys: HashSet<&str> = name_keys.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let mut matches = Vec::new();
        for entity in inner.entities.values() {
            if !keys.contains(entity.name_key.as_str()) {
                continue;
            }
            // Absorbed entities answer with their absorber.
            let head = Self::resolve_head(&inner, &entity.id).unwrap_or(entity);
            if seen.insert(head.id.clone()) {
                matches.push(head.clone());
            }
        }
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn find_relationships(
        &self,
        entity_ids: &[String],
    ) -> Result<Vec<CanonicalRelationship>, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        let ids: HashSet<&str> = entity_ids.iter().map(String::as_str).collect();

        let mut matches: Vec<CanonicalRelationship> = inner
            .relationships
            .values()
            .filter(|rel| {
                ids.contains(rel.source_id.as_str()) && ids.contains(rel.target_id.as_str())
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let inner = self.inner.lock().expect("store lock poisoned");
        // Absorbed entities still exist as nodes; count only heads so
        // the reported entity count matches the caller-visible graph.
        let heads = inner
            .entities
            .keys()
            .filter(|id| !inner.redirects.contains_key(*id))
            .count();
        Ok(GraphStats {
            entity_count: heads,
            relationship_count: inner.relationships.len(),
            chunk_count: inner.chunks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{PropertyBag, Provenance};

    fn entity(id: &str, name_key: &str) -> CanonicalEntity {
        CanonicalEntity {
            id: id.into(),
            name: name_key.into(),
            entity_type: "Organization".into(),
            name_key: name_key.into(),
            properties: PropertyBag::new(),
            provenance: vec![Provenance {
                doc_id: "d".into(),
                chunk_id: "c".into(),
            }],
            merged_from: vec![],
            embedding: None,
        }
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let batch = WriteBatch {
            entities: vec![entity("e1", "acme")],
            ..WriteBatch::default()
        };
        store.apply(&batch).await.unwrap();
        store.apply(&batch).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 1);
    }

    #[tokio::test]
    async fn dangling_relationship_is_rejected_without_side_effects() {
        let store = InMemoryGraphStore::new();
        let rel = CanonicalRelationship {
            id: "r1".into(),
            source_id: "e1".into(),
            target_id: "ghost".into(),
            rel_type: "OWNS".into(),
            confidence: 0.5,
            properties: Default::default(),
            provenance: vec![],
        };
        let batch = WriteBatch {
            entities: vec![entity("e1", "acme")],
            relationships: vec![rel],
            ..WriteBatch::default()
        };

        assert!(store.apply(&batch).await.is_err());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.entity_count, 0, "failed batch must leave no trace");
    }

    #[tokio::test]
    async fn absorbed_entities_redirect_to_their_head() {
        let store = InMemoryGraphStore::new();
        store
            .apply(&WriteBatch {
                entities: vec![entity("small", "acme")],
                ..WriteBatch::default()
            })
            .await
            .unwrap();

        let mut absorber = entity("big", "acme");
        absorber.merged_from = vec!["small".into()];
        store
            .apply(&WriteBatch {
                entities: vec![absorber],
                ..WriteBatch::default()
            })
            .await
            .unwrap();

        let matches = store
            .find_matching_entities(&["acme".to_string()])
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "big");
        assert_eq!(store.stats().await.unwrap().entity_count, 1);
    }
}
