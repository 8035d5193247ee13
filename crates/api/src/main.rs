mod config;
mod metrics;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use index::{GraphPipeline, GraphStats, GraphStore, InMemoryGraphStore, Neo4jStore, RunReport};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use config::{AppConfig, StoreBackend};
use metrics::{Metrics, MetricsSnapshot};

struct AppState {
    pipeline: GraphPipeline,
    neo4j: Option<Neo4jStore>,
    metrics: Arc<Metrics>,
}

#[derive(Serialize)]
struct HealthResponse {
    store: String,
    neo4j: Option<String>,
}

#[derive(Deserialize)]
struct GraphRequest {
    documents: Vec<ingest::Document>,
}

#[derive(Deserialize)]
struct IngestRequest {
    path: String,
}

fn init_tracing() {
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().init();
    } else {
        tracing_subscriber::fmt::init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load()?;

    let (store, neo4j): (Arc<dyn GraphStore>, Option<Neo4jStore>) = match config.graph.store {
        StoreBackend::Neo4j => {
            let neo4j = Neo4jStore::connect(
                &config.neo4j.uri,
                &config.neo4j.user,
                &config.neo4j.password,
            )
            .await?;
            (Arc::new(neo4j.clone()), Some(neo4j))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory graph store; nothing is persisted across restarts");
            (Arc::new(InMemoryGraphStore::new()), None)
        }
    };

    let pipeline = GraphPipeline::new(
        store,
        config.assembler_config(),
        config.persistence_config(),
    );

    let state = Arc::new(AppState {
        pipeline,
        neo4j,
        metrics: Metrics::new(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/graph", post(build_graph))
        .route("/ingest", post(ingest_documents))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .context(format!("Failed to bind {}", config.server.bind_addr))?;

    tracing::info!(addr = %config.server.bind_addr, "Server listening");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = match state.pipeline.stats().await {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("error: {}", e),
    };

    let neo4j = match &state.neo4j {
        Some(neo4j) => Some(match neo4j.graph().run(neo4rs::query("RETURN 1")).await {
            Ok(_) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        }),
        None => None,
    };

    Json(HealthResponse { store, neo4j })
}

async fn build_graph(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GraphRequest>,
) -> Json<RunReport> {
    let report = state.pipeline.run(req.documents).await;

    state.metrics.record_request(true);
    state.metrics.record_run(&report);
    Json(report)
}

async fn ingest_documents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<RunReport>, StatusCode> {
    let path = PathBuf::from(&req.path);

    if !path.exists() {
        state.metrics.record_request(false);
        return Err(StatusCode::NOT_FOUND);
    }

    let documents = ingest::ingest_path(&path).await.map_err(|e| {
        tracing::error!(path = %req.path, error = %format!("{:#}", e), "Ingestion failed");
        state.metrics.record_request(false);
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let report = state.pipeline.run(documents).await;

    state.metrics.record_request(true);
    state.metrics.record_run(&report);
    Ok(Json(report))
}

async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GraphStats>, StatusCode> {
    let stats = state.pipeline.stats().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read graph stats");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(stats))
}

async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
