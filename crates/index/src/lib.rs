pub mod memory_store;
pub mod neo4j_store;
pub mod store;
pub mod vector_index;
pub mod writer;

pub use memory_store::InMemoryGraphStore;
pub use neo4j_store::Neo4jStore;
pub use store::{ChunkRecord, GraphStats, GraphStore, StoreError, WriteBatch};
pub use vector_index::{
    Distance, InMemoryVectorIndex, PointKind, QdrantIndex, VectorFilter, VectorHit, VectorIndex,
    VectorIndexManager, VectorPoint, VectorQuery, VectorSyncConfig,
};
pub use writer::{FailedBatch, GraphWriter, WriteOutcome, WriterConfig};
