use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sparsev_core::{Error, IndexOptions, QueryVector, SearchEngine};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Deserialize)]
pub struct SearchRequest {
    /// Sparse query: token ids with aligned weights.
    #[serde(default)]
    pub indices: Vec<u32>,
    #[serde(default)]
    pub weights: Vec<f32>,
    /// Dense query over the full vocabulary; takes precedence when set.
    #[serde(default)]
    pub dense: Option<Vec<f32>>,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    10
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub took_s: f64,
    pub results: Vec<SearchHitOut>,
}

#[derive(Serialize)]
pub struct SearchHitOut {
    pub doc_id: u32,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
}

pub fn build_app(options: &IndexOptions) -> Result<Router> {
    // Load and place the index at startup; the engine is read-only
    // from here on, so sharing it through an Arc needs no locking.
    let engine = Arc::new(SearchEngine::open(options)?);
    tracing::info!(info = %engine.describe(), "index loaded");
    let state = AppState { engine };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", post(search_handler))
        .route("/doc/:doc_id", get(doc_handler))
        .route("/info", get(info_handler))
        .with_state(state)
        .layer(cors);
    Ok(app)
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let query = match request.dense {
        Some(dense) => QueryVector::Dense(dense),
        None => QueryVector::Sparse {
            indices: request.indices,
            weights: request.weights,
        },
    };
    let hits = state
        .engine
        .search(&query, request.k)
        .map_err(bad_request)?;

    let results = hits
        .into_iter()
        .map(|hit| SearchHitOut {
            doc_id: hit.doc_id,
            score: hit.score,
            record: state.engine.record_for(hit.doc_id as usize).ok().cloned(),
        })
        .collect();

    Ok(Json(SearchResponse {
        took_s: start.elapsed().as_secs_f64(),
        results,
    }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<usize>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    match state.engine.record_for(doc_id) {
        Ok(record) => Ok(Json(record.clone())),
        Err(err @ Error::IndexOutOfRange { .. }) => {
            Err((StatusCode::NOT_FOUND, err.to_string()))
        }
        Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

pub async fn info_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let info = state.engine.describe();
    Json(serde_json::json!({
        "value_type": info.value_type,
        "rows": info.rows,
        "cols": info.cols,
        "device": info.device,
        "records": state.engine.record_count(),
    }))
}

fn bad_request(err: Error) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, err.to_string())
}
