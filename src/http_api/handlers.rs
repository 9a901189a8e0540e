use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AppState;
use crate::ice::{IceServer, IceSource};
use crate::signaling::{OfferAnswer, SignalingError};
use crate::stats::StatsSnapshot;

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP で返すエラー（500 + `{"error": "..."}`）
#[derive(Debug)]
pub struct ApiError {
    pub message: String,
}

impl From<SignalingError> for ApiError {
    fn from(err: SignalingError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
        };
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServersResponse {
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IceStatusResponse {
    pub age_seconds: Option<f64>,
    pub count: usize,
    pub source: Option<IceSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connections: usize,
    /// Unix エポック秒
    pub timestamp: f64,
}

pub async fn offer(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<OfferAnswer>> {
    let answer = state.coordinator.handle_offer(&body).await?;
    Ok(Json(answer))
}

pub async fn ice_servers(State(state): State<AppState>) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.resolver.resolve().await,
        status: None,
    })
}

pub async fn refresh_ice(State(state): State<AppState>) -> Json<IceServersResponse> {
    let ice_servers = state.resolver.force_refresh().await;
    debug!(count = ice_servers.len(), "ICE servers refreshed on request");
    Json(IceServersResponse {
        ice_servers,
        status: Some("refreshed".to_string()),
    })
}

pub async fn ice_status(State(state): State<AppState>) -> Json<IceStatusResponse> {
    let status = state.resolver.inspect();
    Json(IceStatusResponse {
        age_seconds: status.age.map(|age| age.as_secs_f64()),
        count: status.count,
        source: status.source,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.stats.snapshot(state.registry.size()))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let timestamp = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
    Json(HealthResponse {
        status: "healthy".to_string(),
        connections: state.registry.size(),
        timestamp,
    })
}
