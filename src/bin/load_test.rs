//! 負荷テストクライアント
//!
//! 起動中のエコーサーバーへ多数の WebRTC 接続を張り、`connected` に到達した数と所要時間を集計する。
//!
//! 設定は環境変数から読む:
//! `LOAD_TEST_URL`（既定 `http://127.0.0.1:8080`）、`LOAD_TEST_CLIENTS`
//! （既定 20）、`LOAD_TEST_CONCURRENCY`（既定 5）、
//! `LOAD_TEST_CONNECT_TIMEOUT_SECS`（既定 15）。
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use futures_util::future::join_all;
use interceptor::registry::Registry;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

use webrtc_echo_server::http_api::IceServersResponse;

const GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

struct LoadTestConfig {
    base_url: String,
    clients: usize,
    concurrency: usize,
    connect_timeout: Duration,
}

impl LoadTestConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            base_url: std::env::var("LOAD_TEST_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            clients: env_number("LOAD_TEST_CLIENTS", 20)?,
            concurrency: env_number("LOAD_TEST_CONCURRENCY", 5)?.max(1),
            connect_timeout: Duration::from_secs(env_number(
                "LOAD_TEST_CONNECT_TIMEOUT_SECS",
                15,
            )? as u64),
        })
    }
}

fn env_number(key: &str, default: usize) -> anyhow::Result<usize> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {value:?}")),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Deserialize)]
struct AnswerBody {
    sdp: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = LoadTestConfig::from_env()?;
    let http = reqwest::Client::new();

    let ice: IceServersResponse = http
        .get(format!("{}/ice-servers", config.base_url))
        .send()
        .await
        .context("fetching ICE servers")?
        .json()
        .await
        .context("decoding ICE servers")?;
    let ice_servers: Vec<RTCIceServer> = ice
        .ice_servers
        .into_iter()
        .map(|server| RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        })
        .collect();
    info!(
        url = %config.base_url,
        clients = config.clients,
        concurrency = config.concurrency,
        ice_servers = ice_servers.len(),
        "starting load test"
    );

    let api = Arc::new(build_api()?);
    let started = Instant::now();
    let mut latencies = Vec::new();
    let mut failures = 0usize;

    let ids: Vec<usize> = (0..config.clients).collect();
    for batch in ids.chunks(config.concurrency) {
        let runs = batch.iter().map(|&client| {
            let api = api.clone();
            let http = http.clone();
            let ice_servers = ice_servers.clone();
            let base_url = config.base_url.clone();
            let connect_timeout = config.connect_timeout;
            async move {
                let result =
                    run_client(&api, &http, &base_url, ice_servers, connect_timeout).await;
                (client, result)
            }
        });

        for (client, result) in join_all(runs).await {
            match result {
                Ok(latency) => {
                    info!(client, latency_ms = latency.as_millis() as u64, "connected");
                    latencies.push(latency);
                }
                Err(err) => {
                    warn!(client, error = %err, "connection failed");
                    failures += 1;
                }
            }
        }
    }

    report(&latencies, failures, started.elapsed());
    Ok(())
}

fn build_api() -> anyhow::Result<API> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

/// offer/answer を1回交換し、offer 生成から `connected` までの時間を返す
async fn run_client(
    api: &API,
    http: &reqwest::Client,
    base_url: &str,
    ice_servers: Vec<RTCIceServer>,
    connect_timeout: Duration,
) -> anyhow::Result<Duration> {
    let peer_connection = Arc::new(
        api.new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await?,
    );
    peer_connection
        .add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await?;

    let (state_tx, mut state_rx) = mpsc::channel(16);
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            let state_tx = state_tx.clone();
            Box::pin(async move {
                let _ = state_tx.try_send(state);
            })
        },
    ));

    let outcome = negotiate(
        &peer_connection,
        http,
        base_url,
        &mut state_rx,
        connect_timeout,
    )
    .await;

    if let Err(err) = peer_connection.close().await {
        warn!(error = %err, "closing client peer failed");
    }
    outcome
}

async fn negotiate(
    peer_connection: &RTCPeerConnection,
    http: &reqwest::Client,
    base_url: &str,
    state_rx: &mut mpsc::Receiver<RTCPeerConnectionState>,
    connect_timeout: Duration,
) -> anyhow::Result<Duration> {
    let started = Instant::now();
    let offer = peer_connection.create_offer(None).await?;
    let mut gathering_complete = peer_connection.gathering_complete_promise().await;
    peer_connection.set_local_description(offer).await?;
    let _ = tokio::time::timeout(GATHERING_TIMEOUT, gathering_complete.recv()).await;

    let local = peer_connection
        .local_description()
        .await
        .context("local description missing")?;

    let response = http
        .post(format!("{base_url}/offer"))
        .json(&serde_json::json!({ "sdp": local.sdp, "type": "offer" }))
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        bail!("offer rejected with {status}: {body}");
    }
    let answer: AnswerBody = response.json().await?;
    peer_connection
        .set_remote_description(RTCSessionDescription::answer(answer.sdp)?)
        .await?;

    let connected = tokio::time::timeout(connect_timeout, async {
        while let Some(state) = state_rx.recv().await {
            match state {
                RTCPeerConnectionState::Connected => return Ok(()),
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed => {
                    bail!("peer connection {state}")
                }
                _ => {}
            }
        }
        bail!("state updates stopped")
    })
    .await;

    match connected {
        Ok(result) => result.map(|()| started.elapsed()),
        Err(_) => bail!("not connected within {connect_timeout:?}"),
    }
}

fn report(latencies: &[Duration], failures: usize, elapsed: Duration) {
    let total = latencies.len() + failures;
    let success_rate = if total == 0 {
        0.0
    } else {
        latencies.len() as f64 / total as f64 * 100.0
    };

    let mut sorted: Vec<f64> = latencies
        .iter()
        .map(|latency| latency.as_secs_f64() * 1000.0)
        .collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let average = if sorted.is_empty() {
        0.0
    } else {
        sorted.iter().sum::<f64>() / sorted.len() as f64
    };
    let percentile = |p: f64| -> f64 {
        if sorted.is_empty() {
            return 0.0;
        }
        let index = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[index.min(sorted.len() - 1)]
    };

    println!("clients:        {total}");
    println!("connected:      {}", latencies.len());
    println!("failed:         {failures}");
    println!("success rate:   {success_rate:.1}%");
    println!("avg latency:    {average:.1} ms");
    println!("p50 latency:    {:.1} ms", percentile(0.5));
    println!("p95 latency:    {:.1} ms", percentile(0.95));
    println!("wall time:      {:.1} s", elapsed.as_secs_f64());
}
