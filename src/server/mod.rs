//! HTTP façade over the access gate.

mod handlers;
mod state;

use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::access::AccessGate;
pub use state::AppState;

pub fn build_router(gate: AccessGate) -> Router {
    let state = Arc::new(AppState { gate });

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/access", get(handlers::access))
        .route("/api/geolocate", get(handlers::geolocate))
        .route("/api/ip", get(handlers::client_ip))
        .route("/api/cities", get(handlers::cities))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(gate: AccessGate, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(gate);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("citygate listening on http://{}", addr);

    axum::serve(listener, app).await
}
