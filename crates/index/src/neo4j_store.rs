use async_trait::async_trait;
use neo4rs::{Graph, Query};
use resolve::{CanonicalEntity, CanonicalRelationship};
use tracing::{info, warn};

use crate::store::{GraphStats, GraphStore, StoreError, WriteBatch};

/// Bolt-backed graph store. Upserts are Cypher MERGEs keyed by stable
/// ids; a `WriteBatch` is applied inside one explicit transaction and
/// the store's isolation serializes conflicting upserts on the same
/// canonical identifier.
pub struct Neo4jStore {
    graph: Graph,
}

impl Neo4jStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, StoreError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(classify_error)?;
        Ok(Self { graph })
    }

    /// Create the id and name-key indexes plus the chunk vector index.
    /// Everything is `IF NOT EXISTS`, so init is idempotent. A server
    /// edition without vector indexes degrades to a logged warning.
    pub async fn init_schema(&self, embedding_dimension: usize) -> Result<(), StoreError> {
        let indexes = [
            "CREATE INDEX entity_id_index IF NOT EXISTS FOR (e:Entity) ON (e.id)",
            "CREATE INDEX entity_name_key_index IF NOT EXISTS FOR (e:Entity) ON (e.name_key)",
            "CREATE INDEX chunk_id_index IF NOT EXISTS FOR (c:Chunk) ON (c.id)",
            "CREATE INDEX document_id_index IF NOT EXISTS FOR (d:Document) ON (d.id)",
        ];
        for statement in indexes {
            self.graph
                .run(Query::new(statement.to_string()))
                .await
                .map_err(classify_error)?;
        }

        let vector_index = format!(
            "CREATE VECTOR INDEX chunk_embedding_index IF NOT EXISTS \
             FOR (c:Chunk) ON (c.embedding) \
             OPTIONS {{indexConfig: {{`vector.dimensions`: {embedding_dimension}, \
             `vector.similarity_function`: 'cosine'}}}}"
        );
        if let Err(e) = self.graph.run(Query::new(vector_index)).await {
            warn!(error = %e, "could not create vector index; similarity search via the graph store is unavailable");
        }

        info!("Neo4j schema initialized");
        Ok(())
    }

    fn entity_query(entity: &CanonicalEntity) -> Result<Query, StoreError> {
        let properties = serde_json::to_string(&entity.properties)
            .map_err(|e| StoreError::Permanent(format!("serializing entity properties: {e}")))?;
        let provenance = serde_json::to_string(&entity.provenance)
            .map_err(|e| StoreError::Permanent(format!("serializing entity provenance: {e}")))?;

        let query = Query::new(
            r#"
            MERGE (e:Entity {id: $id})
            SET e.name = $name,
                e.type = $type,
                e.name_key = $name_key,
                e.properties = $properties,
                e.provenance = $provenance,
                e.embedding = $embedding
            "#
            .to_string(),
        )
        .param("id", entity.id.clone())
        .param("name", entity.name.clone())
        .param("type", entity.entity_type.clone())
        .param("name_key", entity.name_key.clone())
        .param("properties", properties)
        .param("provenance", provenance)
        .param("embedding", to_bolt_vector(entity.embedding.as_deref().unwrap_or_default()));

        Ok(query)
    }

    /// Absorbed nodes stay in the graph but point at their absorber;
    /// reads follow the pointer so merges are one-way and lossless.
    fn redirect_query(absorbed: &str, absorber: &str) -> Query {
        Query::new(
            r#"
            MERGE (a:Entity {id: $absorbed})
            SET a.merged_into = $absorber
            "#
            .to_string(),
        )
        .param("absorbed", absorbed.to_string())
        .param("absorber", absorber.to_string())
    }

    fn relationship_query(rel: &CanonicalRelationship) -> Result<Query, StoreError> {
        let properties = serde_json::to_string(&rel.properties).map_err(|e| {
            StoreError::Permanent(format!("serializing relationship properties: {e}"))
        })?;
        let provenance = serde_json::to_string(&rel.provenance).map_err(|e| {
            StoreError::Permanent(format!("serializing relationship provenance: {e}"))
        })?;

        let query = Query::new(
            r#"
            MATCH (source:Entity {id: $source_id})
            MATCH (target:Entity {id: $target_id})
            MERGE (source)-[r:RELATION {type: $rel_type}]->(target)
            SET r.id = $id,
                r.confidence = $confidence,
                r.properties = $properties,
                r.provenance = $provenance
            "#
            .to_string(),
        )
        .param("source_id", rel.source_id.clone())
        .param("target_id", rel.target_id.clone())
        .param("rel_type", rel.rel_type.clone())
        .param("id", rel.id.clone())
        .param("confidence", rel.confidence as f64)
        .param("properties", properties)
        .param("provenance", provenance);

        Ok(query)
    }

    fn chunk_query(record: &crate::store::ChunkRecord) -> Query {
        let chunk = &record.chunk;
        Query::new(
            r#"
            MERGE (d:Document {id: $doc_id})
            MERGE (c:Chunk {id: $chunk_id})
            SET c.ordinal = $ordinal,
                c.text = $text,
                c.span_start = $span_start,
                c.span_end = $span_end,
                c.parent_path = $parent_path,
                c.doc_id = $doc_id,
                c.embedding = $embedding
            MERGE (d)-[:HAS_CHUNK]->(c)
            "#
            .to_string(),
        )
        .param("doc_id", chunk.doc_id.clone())
        .param("chunk_id", chunk.chunk_id.clone())
        .param("ordinal", chunk.ordinal as i64)
        .param("text", chunk.text.clone())
        .param("span_start", chunk.span.0 as i64)
        .param("span_end", chunk.span.1 as i64)
        .param("parent_path", chunk.parent_path.clone())
        .param("embedding", to_bolt_vector(&record.embedding))
    }

    fn parse_entity_row(row: &neo4rs::Row) -> Option<CanonicalEntity> {
        let node: neo4rs::Node = row.get("e").ok()?;
        let properties: String = node.get("properties").unwrap_or_default();
        let provenance: String = node.get("provenance").unwrap_or_default();
        let embedding: Vec<f32> = node
            .get::<Vec<f64>>("embedding")
            .unwrap_or_default()
            .into_iter()
            .map(|x| x as f32)
            .collect();
        Some(CanonicalEntity {
            id: node.get("id").ok()?,
            name: node.get("name").unwrap_or_default(),
            entity_type: node.get("type").unwrap_or_default(),
            name_key: node.get("name_key").unwrap_or_default(),
            properties: serde_json::from_str(&properties).unwrap_or_default(),
            provenance: serde_json::from_str(&provenance).unwrap_or_default(),
            merged_from: Vec::new(),
            embedding: if embedding.is_empty() {
                None
            } else {
                Some(embedding)
            },
        })
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn apply(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut queries = Vec::new();
        // Referential ordering inside the transaction: entities and
        // chunks first, then the relationships that reference them.
        for entity in &batch.entities {
            queries.push(Self::entity_query(entity)?);
            for absorbed in &entity.merged_from {
                queries.push(Self::redirect_query(absorbed, &entity.id));
            }
        }
        for record in &batch.chunks {
            queries.push(Self::chunk_query(record));
        }
        for rel in &batch.relationships {
            queries.push(Self::relationship_query(rel)?);
        }

        let mut txn = self.graph.start_txn().await.map_err(classify_error)?;
        txn.run_queries(queries).await.map_err(classify_error)?;
        txn.commit().await.map_err(classify_error)
    }

    async fn find_matching_entities(
        &self,
        name_keys: &[String],
    ) -> Result<Vec<CanonicalEntity>, StoreError> {
        // Follow merge redirects so callers always get current heads.
        let query = Query::new(
            r#"
            MATCH (m:Entity)
            WHERE m.name_key IN $name_keys
            OPTIONAL MATCH (head:Entity {id: m.merged_into})
            WITH coalesce(head, m) AS e
            WHERE e.merged_into IS NULL
            RETURN DISTINCT e
            "#
            .to_string(),
        )
        .param("name_keys", name_keys.to_vec());

        let mut result = self.graph.execute(query).await.map_err(classify_error)?;
        let mut entities = Vec::new();
        while let Some(row) = result.next().await.map_err(classify_error)? {
            if let Some(entity) = Self::parse_entity_row(&row) {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    async fn find_relationships(
        &self,
        entity_ids: &[String],
    ) -> Result<Vec<CanonicalRelationship>, StoreError> {
        let query = Query::new(
            r#"
            MATCH (s:Entity)-[r:RELATION]->(t:Entity)
            WHERE s.id IN $ids AND t.id IN $ids
            RETURN s.id AS source_id, t.id AS target_id, r.type AS rel_type,
                   r.id AS id, r.confidence AS confidence,
                   r.properties AS properties, r.provenance AS provenance
            "#
            .to_string(),
        )
        .param("ids", entity_ids.to_vec());

        let mut result = self.graph.execute(query).await.map_err(classify_error)?;
        let mut relationships = Vec::new();
        while let Some(row) = result.next().await.map_err(classify_error)? {
            let properties: String = row.get("properties").unwrap_or_default();
            let provenance: String = row.get("provenance").unwrap_or_default();
            relationships.push(CanonicalRelationship {
                id: row.get("id").unwrap_or_default(),
                source_id: row.get("source_id").unwrap_or_default(),
                target_id: row.get("target_id").unwrap_or_default(),
                rel_type: row.get("rel_type").unwrap_or_default(),
                confidence: row.get::<f64>("confidence").unwrap_or_default() as f32,
                properties: serde_json::from_str(&properties).unwrap_or_default(),
                provenance: serde_json::from_str(&provenance).unwrap_or_default(),
            });
        }
        Ok(relationships)
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        Ok(GraphStats {
            entity_count: self
                .count("MATCH (e:Entity) WHERE e.merged_into IS NULL RETURN count(e) AS count")
                .await?,
            relationship_count: self
                .count("MATCH ()-[r:RELATION]->() RETURN count(r) AS count")
                .await?,
            chunk_count: self.count("MATCH (c:Chunk) RETURN count(c) AS count").await?,
        })
    }
}

impl Neo4jStore {
    async fn count(&self, statement: &str) -> Result<usize, StoreError> {
        let mut result = self
            .graph
            .execute(Query::new(statement.to_string()))
            .await
            .map_err(classify_error)?;
        let count = match result.next().await.map_err(classify_error)? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

/// Bolt has no f32 list type; embeddings travel as f64.
fn to_bolt_vector(embedding: &[f32]) -> Vec<f64> {
    embedding.iter().map(|&x| x as f64).collect()
}

/// Connection-level problems are worth retrying; everything else (bad
/// Cypher, constraint violations, type errors) is permanent. neo4rs
/// does not expose a stable error taxonomy, so classify on the message.
fn classify_error(e: neo4rs::Error) -> StoreError {
    let text = e.to_string();
    let lowered = text.to_lowercase();
    let transient = lowered.contains("io error")
        || lowered.contains("connection")
        || lowered.contains("timed out")
        || lowered.contains("timeout")
        || lowered.contains("unavailable")
        || lowered.contains("deadlock");
    if transient {
        StoreError::Transient(text)
    } else {
        StoreError::Permanent(text)
    }
}
