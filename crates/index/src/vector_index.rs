use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::store::{StoreError, WriteBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Chunk,
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    Cosine,
    Dot,
}

/// One indexed vector with the metadata the filter can match on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub kind: PointKind,
    pub doc_id: Option<String>,
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorFilter {
    pub kind: Option<PointKind>,
    pub doc_id: Option<String>,
    pub entity_type: Option<String>,
}

impl VectorFilter {
    fn matches(&self, point: &VectorPoint) -> bool {
        self.kind.is_none_or(|k| k == point.kind)
            && self
                .doc_id
                .as_ref()
                .is_none_or(|d| point.doc_id.as_ref() == Some(d))
            && self
                .entity_type
                .as_ref()
                .is_none_or(|t| point.entity_type.as_ref() == Some(t))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    #[serde(default)]
    pub filter: Option<VectorFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
}

/// The similarity-index seam. Updates are eventually consistent with
/// committed graph writes: a query issued right after `upsert` may not
/// see the new points until a `refresh` (or the backend's own refresh
/// cycle) has run.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), StoreError>;
    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorHit>, StoreError>;
    /// Make previously upserted points visible to queries.
    async fn refresh(&self) -> Result<(), StoreError>;
}

/// In-memory index with the consistency lag modeled explicitly: new
/// points sit in a pending buffer until `refresh` publishes them.
pub struct InMemoryVectorIndex {
    distance: Distance,
    pending: Mutex<Vec<VectorPoint>>,
    visible: Mutex<HashMap<String, VectorPoint>>,
}

impl InMemoryVectorIndex {
    pub fn new(distance: Distance) -> Self {
        Self {
            distance,
            pending: Mutex::new(Vec::new()),
            visible: Mutex::new(HashMap::new()),
        }
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.distance {
            Distance::Cosine => resolve::similarity::cosine(a, b) as f32,
            Distance::Dot => a.iter().zip(b.iter()).map(|(x, y)| x * y).sum(),
        }
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), StoreError> {
        self.pending
            .lock()
            .expect("index lock poisoned")
            .extend(points.iter().cloned());
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorHit>, StoreError> {
        let visible = self.visible.lock().expect("index lock poisoned");
        let mut hits: Vec<VectorHit> = visible
            .values()
            .filter(|p| query.filter.as_ref().is_none_or(|f| f.matches(p)))
            .filter(|p| p.vector.len() == query.vector.len())
            .map(|p| VectorHit {
                id: p.id.clone(),
                score: self.score(&query.vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(query.k);
        Ok(hits)
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        let drained: Vec<VectorPoint> =
            std::mem::take(&mut *self.pending.lock().expect("index lock poisoned"));
        let mut visible = self.visible.lock().expect("index lock poisoned");
        for point in drained {
            visible.insert(point.id.clone(), point);
        }
        Ok(())
    }
}

/// Qdrant over its REST API: collection management, point upserts with
/// payload metadata, filtered nearest-neighbor search. Qdrant applies
/// its own refresh cycle, so `refresh` is a no-op and consistency is
/// reached within the manager's polling bound.
pub struct QdrantIndex {
    base_url: String,
    collection_name: String,
    distance: Distance,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct CreateCollection {
    vectors: VectorParams,
}

#[derive(Serialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertPoints {
    points: Vec<QdrantPoint>,
}

#[derive(Serialize)]
struct QdrantPoint {
    id: u64,
    vector: Vec<f32>,
    payload: HashMap<String, serde_json::Value>,
}

#[derive(Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: HashMap<String, serde_json::Value>,
}

impl QdrantIndex {
    pub fn new(base_url: String, collection_name: String, distance: Distance) -> Self {
        Self {
            base_url,
            collection_name,
            distance,
            client: reqwest::Client::new(),
        }
    }

    /// Create the collection if it does not exist yet. Idempotent.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<(), StoreError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection_name);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_http_error)?;
        if response.status().is_success() {
            debug!(collection = %self.collection_name, "collection already exists");
            return Ok(());
        }

        let create_req = CreateCollection {
            vectors: VectorParams {
                size: dimension,
                distance: match self.distance {
                    Distance::Cosine => "Cosine".to_string(),
                    Distance::Dot => "Dot".to_string(),
                },
            },
        };
        let response = self
            .client
            .put(&url)
            .json(&create_req)
            .send()
            .await
            .map_err(classify_http_error)?;
        if !response.status().is_success() {
            return Err(StoreError::Permanent(format!(
                "failed to create collection: {}",
                response.status()
            )));
        }
        info!(collection = %self.collection_name, dimension, "created vector collection");
        Ok(())
    }

    fn hash_to_u64(s: &str) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    fn build_filter(filter: &VectorFilter) -> Option<serde_json::Value> {
        let mut must = Vec::new();
        if let Some(kind) = filter.kind {
            let value = match kind {
                PointKind::Chunk => "chunk",
                PointKind::Entity => "entity",
            };
            must.push(serde_json::json!({"key": "kind", "match": {"value": value}}));
        }
        if let Some(doc_id) = &filter.doc_id {
            must.push(serde_json::json!({"key": "doc_id", "match": {"value": doc_id}}));
        }
        if let Some(entity_type) = &filter.entity_type {
            must.push(serde_json::json!({"key": "entity_type", "match": {"value": entity_type}}));
        }
        if must.is_empty() {
            None
        } else {
            Some(serde_json::json!({ "must": must }))
        }
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<(), StoreError> {
        if points.is_empty() {
            return Ok(());
        }
        let qdrant_points: Vec<QdrantPoint> = points
            .iter()
            .map(|p| {
                let mut payload = HashMap::new();
                payload.insert("id".to_string(), serde_json::json!(p.id));
                let kind = match p.kind {
                    PointKind::Chunk => "chunk",
                    PointKind::Entity => "entity",
                };
                payload.insert("kind".to_string(), serde_json::json!(kind));
                if let Some(doc_id) = &p.doc_id {
                    payload.insert("doc_id".to_string(), serde_json::json!(doc_id));
                }
                if let Some(entity_type) = &p.entity_type {
                    payload.insert("entity_type".to_string(), serde_json::json!(entity_type));
                }
                QdrantPoint {
                    id: Self::hash_to_u64(&p.id),
                    vector: p.vector.clone(),
                    payload,
                }
            })
            .collect();

        let url = format!(
            "{}/collections/{}/points",
            self.base_url, self.collection_name
        );
        let response = self
            .client
            .put(&url)
            .json(&UpsertPoints {
                points: qdrant_points,
            })
            .send()
            .await
            .map_err(classify_http_error)?;
        if !response.status().is_success() {
            return Err(StoreError::Permanent(format!(
                "failed to upsert points: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query(&self, query: &VectorQuery) -> Result<Vec<VectorHit>, StoreError> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection_name
        );
        let request = SearchRequest {
            vector: query.vector.clone(),
            limit: query.k,
            with_payload: true,
            filter: query.filter.as_ref().and_then(Self::build_filter),
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(classify_http_error)?;
        if !response.status().is_success() {
            return Err(StoreError::Permanent(format!(
                "search failed: {}",
                response.status()
            )));
        }
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Permanent(format!("parsing search response: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .map(|hit| VectorHit {
                id: hit
                    .payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                score: hit.score,
            })
            .collect())
    }

    async fn refresh(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn classify_http_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() || e.is_connect() {
        StoreError::Transient(e.to_string())
    } else {
        StoreError::Permanent(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSyncConfig {
    /// Bounded convergence window: a committed write must be visible
    /// within `poll_attempts * poll_interval_ms`.
    pub poll_attempts: usize,
    pub poll_interval_ms: u64,
}

impl Default for VectorSyncConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 10,
            poll_interval_ms: 200,
        }
    }
}

/// Maintains the similarity index as a derived view of the graph
/// writer's output. Kept behind the writer: `sync_batch` runs only on
/// batches the store has committed.
pub struct VectorIndexManager {
    index: Arc<dyn VectorIndex>,
    config: VectorSyncConfig,
}

impl VectorIndexManager {
    pub fn new(index: Arc<dyn VectorIndex>, config: VectorSyncConfig) -> Self {
        Self { index, config }
    }

    /// Push the embeddings of a committed batch into the index.
    pub async fn sync_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut points = Vec::new();
        for record in &batch.chunks {
            points.push(VectorPoint {
                id: record.chunk.chunk_id.clone(),
                vector: record.embedding.clone(),
                kind: PointKind::Chunk,
                doc_id: Some(record.chunk.doc_id.clone()),
                entity_type: None,
            });
        }
        for entity in &batch.entities {
            if let Some(embedding) = &entity.embedding {
                points.push(VectorPoint {
                    id: entity.id.clone(),
                    vector: embedding.clone(),
                    kind: PointKind::Entity,
                    doc_id: None,
                    entity_type: Some(entity.entity_type.clone()),
                });
            }
        }
        self.index.upsert(&points).await
    }

    pub async fn search(&self, query: &VectorQuery) -> Result<Vec<VectorHit>, StoreError> {
        self.index.query(query).await
    }

    /// Poll until a given point id shows up in the results, within the
    /// configured consistency bound. Returns the hits once converged.
    pub async fn search_converged(
        &self,
        query: &VectorQuery,
        expect_id: &str,
    ) -> Result<Vec<VectorHit>, StoreError> {
        let mut last = Vec::new();
        for attempt in 0..self.config.poll_attempts.max(1) {
            last = self.index.query(query).await?;
            if last.iter().any(|hit| hit.id == expect_id) {
                return Ok(last);
            }
            self.index.refresh().await?;
            if attempt + 1 < self.config.poll_attempts {
                sleep(Duration::from_millis(self.config.poll_interval_ms)).await;
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>, kind: PointKind, doc_id: Option<&str>) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            kind,
            doc_id: doc_id.map(String::from),
            entity_type: None,
        }
    }

    fn query(vector: Vec<f32>, k: usize) -> VectorQuery {
        VectorQuery {
            vector,
            k,
            filter: None,
        }
    }

    #[tokio::test]
    async fn new_points_are_invisible_until_refresh() {
        let index = InMemoryVectorIndex::new(Distance::Cosine);
        index
            .upsert(&[point("p1", vec![1.0, 0.0], PointKind::Chunk, None)])
            .await
            .unwrap();

        let before = index.query(&query(vec![1.0, 0.0], 5)).await.unwrap();
        assert!(before.is_empty(), "pre-refresh query must lag the write");

        index.refresh().await.unwrap();
        let after = index.query(&query(vec![1.0, 0.0], 5)).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, "p1");
    }

    #[tokio::test]
    async fn results_are_ranked_and_truncated() {
        let index = InMemoryVectorIndex::new(Distance::Cosine);
        index
            .upsert(&[
                point("near", vec![1.0, 0.1], PointKind::Chunk, None),
                point("exact", vec![1.0, 0.0], PointKind::Chunk, None),
                point("far", vec![0.0, 1.0], PointKind::Chunk, None),
            ])
            .await
            .unwrap();
        index.refresh().await.unwrap();

        let hits = index.query(&query(vec![1.0, 0.0], 2)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "exact");
        assert_eq!(hits[1].id, "near");
    }

    #[tokio::test]
    async fn metadata_filter_restricts_results() {
        let index = InMemoryVectorIndex::new(Distance::Cosine);
        index
            .upsert(&[
                point("c1", vec![1.0, 0.0], PointKind::Chunk, Some("doc-1")),
                point("c2", vec![1.0, 0.0], PointKind::Chunk, Some("doc-2")),
                point("e1", vec![1.0, 0.0], PointKind::Entity, None),
            ])
            .await
            .unwrap();
        index.refresh().await.unwrap();

        let mut q = query(vec![1.0, 0.0], 10);
        q.filter = Some(VectorFilter {
            kind: Some(PointKind::Chunk),
            doc_id: Some("doc-1".into()),
            entity_type: None,
        });
        let hits = index.query(&q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c1");
    }

    #[tokio::test]
    async fn dot_product_distance_scores_by_magnitude() {
        let index = InMemoryVectorIndex::new(Distance::Dot);
        index
            .upsert(&[
                point("small", vec![1.0, 0.0], PointKind::Chunk, None),
                point("large", vec![10.0, 0.0], PointKind::Chunk, None),
            ])
            .await
            .unwrap();
        index.refresh().await.unwrap();

        let hits = index.query(&query(vec![1.0, 0.0], 2)).await.unwrap();
        assert_eq!(hits[0].id, "large");
    }

    #[tokio::test]
    async fn search_converges_within_the_documented_bound() {
        let index = Arc::new(InMemoryVectorIndex::new(Distance::Cosine));
        let manager = VectorIndexManager::new(
            index.clone(),
            VectorSyncConfig {
                poll_attempts: 5,
                poll_interval_ms: 1,
            },
        );

        index
            .upsert(&[point("p1", vec![1.0, 0.0], PointKind::Chunk, None)])
            .await
            .unwrap();

        let hits = manager
            .search_converged(&query(vec![1.0, 0.0], 5), "p1")
            .await
            .unwrap();
        assert!(hits.iter().any(|h| h.id == "p1"));
    }
}
