//! HTTP shell - thin transport over the request orchestrator
//!
//! One RPC-style endpoint plus a health probe. Transport concerns end here;
//! everything after body parsing belongs to `NlqService`.

use crate::config::ServerConfig;
use crate::orchestrator::{NlqRequest, NlqResponse, NlqService};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state
pub type AppState = Arc<NlqService>;

pub fn router(service: AppState) -> Router {
    Router::new()
        .route("/nlquery", post(nlquery))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Start serving requests; runs until the process exits
pub async fn start_server(service: NlqService, config: &ServerConfig) -> anyhow::Result<()> {
    let app = router(Arc::new(service));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn nlquery(
    State(service): State<AppState>,
    payload: Result<Json<NlqRequest>, JsonRejection>,
) -> Json<NlqResponse> {
    match payload {
        Ok(Json(request)) => Json(service.handle(&request).await),
        Err(rejection) => Json(NlqResponse::invalid_payload(rejection.to_string())),
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
