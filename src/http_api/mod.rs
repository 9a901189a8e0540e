//! HTTP API（シグナリング、ICE 設定、ヘルスチェック、統計）
mod handlers;

use std::path::Path;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::ice::IceServerResolver;
use crate::session::SessionRegistry;
use crate::signaling::SignalingCoordinator;
use crate::stats::StatsAggregator;

pub use handlers::{ApiError, ApiResult, HealthResponse, IceServersResponse, IceStatusResponse};

/// ハンドラ共有状態
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SignalingCoordinator>,
    pub resolver: Arc<IceServerResolver>,
    pub registry: Arc<SessionRegistry>,
    pub stats: Arc<StatsAggregator>,
}

impl AppState {
    pub fn new(coordinator: Arc<SignalingCoordinator>) -> Self {
        Self {
            resolver: coordinator.resolver().clone(),
            registry: coordinator.registry().clone(),
            stats: coordinator.stats().clone(),
            coordinator,
        }
    }
}

pub fn create_app(app_state: AppState, static_dir: impl AsRef<Path>) -> Router {
    let static_dir = static_dir.as_ref();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .route("/offer", post(handlers::offer))
        .route("/ice-servers", get(handlers::ice_servers))
        .route("/ice-servers/status", get(handlers::ice_status))
        .route("/refresh-ice", post(handlers::refresh_ice))
        .route("/stats", get(handlers::stats))
        .route("/health", get(handlers::health))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state)
}
