//! HTTP adapter over the read-only query surface
//!
//! Exposes health, peers, blocks, transactions and balances as JSON. The
//! handlers only read through [`NodeQuery`].

use axum::{
    extract::{Path, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::Result;
use crate::ledger::DEFAULT_BLOCK_LIMIT;
use crate::query::NodeQuery;

const MAX_PAGE_SIZE: usize = 500;

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
struct LimitQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

#[derive(Deserialize)]
struct TransactionQuery {
    address: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_BLOCK_LIMIT
}

// ============================================================================
// Middleware
// ============================================================================

async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::debug!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

pub fn build_api_router(query: Arc<NodeQuery>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![http::Method::GET, http::Method::OPTIONS])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/peers", get(list_peers))
        .route("/blocks", get(list_blocks))
        .route("/blocks/:hash", get(get_block))
        .route("/transactions", get(list_transactions))
        .route("/balance/:address", get(get_balance))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(query);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn run_api_server(query: Arc<NodeQuery>, addr: SocketAddr) -> Result<()> {
    let app = build_api_router(query);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Query API listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health(State(query): State<Arc<NodeQuery>>) -> impl IntoResponse {
    Json(query.health())
}

async fn list_peers(State(query): State<Arc<NodeQuery>>) -> impl IntoResponse {
    let peers = query.list_peers();
    Json(serde_json::json!({
        "count": peers.len(),
        "peers": peers
    }))
}

async fn list_blocks(
    State(query): State<Arc<NodeQuery>>,
    Query(params): Query<LimitQuery>,
) -> impl IntoResponse {
    let blocks = query.list_blocks(params.limit.min(MAX_PAGE_SIZE));
    Json(serde_json::json!({
        "count": blocks.len(),
        "blocks": blocks
    }))
}

async fn get_block(
    State(query): State<Arc<NodeQuery>>,
    Path(hash): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    query
        .get_block(&hash)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Block {} not found", hash)))
}

async fn list_transactions(
    State(query): State<Arc<NodeQuery>>,
    Query(params): Query<TransactionQuery>,
) -> impl IntoResponse {
    let transactions =
        query.list_transactions(params.address.as_deref(), params.limit.min(MAX_PAGE_SIZE));
    Json(serde_json::json!({
        "address": params.address,
        "count": transactions.len(),
        "transactions": transactions
    }))
}

async fn get_balance(
    State(query): State<Arc<NodeQuery>>,
    Path(address): Path<String>,
) -> impl IntoResponse {
    Json(query.get_balance(&address))
}
