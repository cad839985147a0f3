use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Content-keyed embedding cache. Overlapping chunk windows repeat text
/// across documents, so identical inputs skip the embedder round-trip.
#[derive(Clone)]
pub struct EmbeddingCache {
    embeddings: Arc<DashMap<String, Vec<f32>>>,
    max_entries: usize,
}

impl EmbeddingCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            embeddings: Arc::new(DashMap::new()),
            max_entries,
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = self.hash_text(text);
        self.embeddings.get(&key).map(|r| r.value().clone())
    }

    pub fn set(&self, text: &str, embedding: Vec<f32>) {
        if self.embeddings.len() >= self.max_entries {
            // Simple eviction: clear 25% when full
            let to_remove: Vec<_> = self
                .embeddings
                .iter()
                .take(self.max_entries / 4)
                .map(|r| r.key().clone())
                .collect();
            for key in to_remove {
                self.embeddings.remove(&key);
            }
        }
        let key = self.hash_text(text);
        self.embeddings.insert(key, embedding);
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    fn hash_text(&self, text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hex::encode(hasher.finalize())
    }
}
