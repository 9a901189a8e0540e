use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use webrtc_echo_server::http_api::{create_app, AppState};
use webrtc_echo_server::ice::IceServerResolver;
use webrtc_echo_server::media::WebRtcEngine;
use webrtc_echo_server::session::SessionRegistry;
use webrtc_echo_server::signaling::SignalingCoordinator;
use webrtc_echo_server::stats::StatsAggregator;
use webrtc_echo_server::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load_from_env().context("failed to load configuration")?;
    info!(
        bind = %config.server.bind_addr(),
        static_dir = %config.server.static_dir,
        udp_restricted = config.ice.udp_restricted,
        "starting echo server"
    );

    let resolver = Arc::new(IceServerResolver::from_config(&config.ice));
    let registry = Arc::new(SessionRegistry::new());
    let stats = Arc::new(StatsAggregator::new());
    let engine = Arc::new(WebRtcEngine::new().context("failed to initialise WebRTC engine")?);

    let coordinator = Arc::new(
        SignalingCoordinator::new(resolver.clone(), registry.clone(), stats, engine)
            .with_timeouts(config.server.offer_timeout(), config.server.connect_timeout()),
    );

    // 初回クライアントの待ち時間を避けるため事前にキャッシュを温める
    let initial = resolver.resolve().await;
    info!(count = initial.len(), source = ?resolver.inspect().source, "ICE servers ready");

    let app = create_app(AppState::new(coordinator), &config.server.static_dir);

    let listener = tokio::net::TcpListener::bind(config.server.bind_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr()))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let report = registry.close_all().await;
    for (session_id, err) in &report.failures {
        warn!(session_id = %session_id, error = %err, "session did not close cleanly");
    }
    info!(closed = report.closed, "shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
