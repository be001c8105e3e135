use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::access::{AccessDecision, SessionContext};
use crate::location::GeoResult;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

/// Resolution makes blocking HTTP calls; keep them off the async workers.
async fn blocking<T, F>(state: Arc<AppState>, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppState) -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || f(state.as_ref()))
        .await
        .map_err(|e| {
            error!("resolution task failed: {}", e);
            ApiError(StatusCode::INTERNAL_SERVER_ERROR, "resolution task failed".into())
        })
}

// ─── GET /health ─────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

// ─── GET /api/access ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct AccessQuery {
    pub ip: Option<String>,
    pub city: Option<String>,
    pub session_id: Option<String>,
}

pub async fn access(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<AccessQuery>,
) -> Result<Json<AccessDecision>, ApiError> {
    let start = Instant::now();

    let ctx = SessionContext {
        session_id: params.session_id,
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        real_ip: params.ip,
        real_city: params.city,
    };

    let decision = blocking(state, move |s| s.gate.check(&ctx)).await?;

    info!(
        "GET /api/access session={} -> allowed={} ({:.1}ms)",
        decision.client.session_id,
        decision.allowed,
        start.elapsed().as_secs_f64() * 1000.0,
    );

    Ok(Json(decision))
}

// ─── GET /api/geolocate ──────────────────────────────────────────

#[derive(Deserialize, Default)]
pub struct GeoQuery {
    pub ip: Option<String>,
}

pub async fn geolocate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GeoQuery>,
) -> Result<Json<GeoResult>, ApiError> {
    let result = blocking(state, move |s| s.gate.resolver().geolocate(params.ip.as_deref())).await?;
    Ok(Json(result))
}

// ─── GET /api/ip ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct IpResponse {
    pub ip: String,
}

pub async fn client_ip(State(state): State<Arc<AppState>>) -> Result<Json<IpResponse>, ApiError> {
    let ip = blocking(state, |s| s.gate.resolver().resolve_client_ip()).await?;
    Ok(Json(IpResponse { ip }))
}

// ─── GET /api/cities ─────────────────────────────────────────────

#[derive(Serialize)]
pub struct CityEntry {
    pub name: String,
    pub normalized: String,
}

pub async fn cities(State(state): State<Arc<AppState>>) -> Json<Vec<CityEntry>> {
    let list = state.gate.allow_list();
    Json(
        list.entries()
            .iter()
            .zip(list.normalized())
            .map(|(name, normalized)| CityEntry {
                name: name.clone(),
                normalized: normalized.clone(),
            })
            .collect(),
    )
}
