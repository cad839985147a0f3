mod metrics;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use extract::{HttpEmbedder, HttpExtractor};
use index::{Distance, GraphStore, Neo4jStore, QdrantIndex};
use ingest::NormalizedDocument;
use pipeline::{DocumentProcessor, PipelineConfig, ProcessReport};

use metrics::{Metrics, TimedOperation};

#[derive(Clone)]
struct AppState {
    processor: Arc<DocumentProcessor>,
    store: Arc<dyn GraphStore>,
    metrics: Arc<Metrics>,
    qdrant_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().json().init();

    let neo4j_uri = env_or("NEO4J_URI", "bolt://localhost:7687");
    let neo4j_user = env_or("NEO4J_USER", "neo4j");
    let neo4j_password = env_or("NEO4J_PASSWORD", "neo4j");
    let qdrant_url = env_or("QDRANT_URL", "http://localhost:6333");
    let extractor_url = env_or("EXTRACTOR_URL", "http://localhost:8089");
    let embedder_url = env_or("EMBEDDER_URL", "http://localhost:8090");

    let mut config = PipelineConfig::default();
    if let Ok(dimension) = env_or("EMBEDDING_DIMENSION", "768").parse() {
        config.extraction.embedding_dimension = dimension;
    }
    let dimension = config.extraction.embedding_dimension;

    let store = Arc::new(
        Neo4jStore::connect(&neo4j_uri, &neo4j_user, &neo4j_password)
            .await
            .expect("Failed to connect to Neo4j"),
    );
    store
        .init_schema(dimension)
        .await
        .expect("Failed to initialize Neo4j schema");

    let vector_index = Arc::new(QdrantIndex::new(
        qdrant_url.clone(),
        "kg_embeddings".to_string(),
        Distance::Cosine,
    ));
    vector_index
        .ensure_collection(dimension)
        .await
        .expect("Failed to initialize Qdrant collection");

    let processor = DocumentProcessor::new(
        config,
        Arc::new(HttpExtractor::new(extractor_url)),
        Arc::new(HttpEmbedder::new(embedder_url)),
        store.clone(),
        vector_index,
    )
    .expect("Invalid pipeline configuration");

    let state = AppState {
        processor: Arc::new(processor),
        store,
        metrics: Metrics::new(),
        qdrant_url,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/process", post(process_document))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("Failed to bind port 3000");

    tracing::info!("Server listening on http://localhost:3000");

    axum::serve(listener, app).await.expect("Server failed");
}

#[derive(Serialize)]
struct HealthResponse {
    graph: String,
    vector_index: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let graph = match state.store.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {e}"),
    };

    let vector_index = match reqwest::get(&state.qdrant_url).await {
        Ok(resp) if resp.status().is_success() => "ok".to_string(),
        Ok(resp) => format!("error: status {}", resp.status()),
        Err(e) => format!("error: {e}"),
    };

    Json(HealthResponse {
        graph,
        vector_index,
    })
}

/// Run one document through the engine and return its structured
/// report. Failures come back as report fields, not bare 500s, so the
/// caller always gets document-level context.
async fn process_document(
    State(state): State<AppState>,
    Json(doc): Json<NormalizedDocument>,
) -> Json<ProcessReport> {
    let timer = TimedOperation::start();
    let report = state.processor.process(&doc).await;
    state.metrics.record_process(&report, timer.elapsed());
    Json(report)
}

#[derive(Serialize)]
struct StatsResponse {
    graph: index::GraphStats,
    runtime: metrics::MetricsSnapshot,
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, StatusCode> {
    let graph = state
        .store
        .stats()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(StatsResponse {
        graph,
        runtime: state.metrics.snapshot(),
    }))
}
