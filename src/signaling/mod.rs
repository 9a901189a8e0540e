//! シグナリング（offer/answer ネゴシエーション）
//!
//! [`SignalingCoordinator::handle_offer`] はクライアントの offer から answer を作る。
//! ICE サーバー解決、セッション登録、ピア生成、offer 適用、Non-trickle answer 生成の順。
//! その後はセッションごとの監視タスクが終端状態まで接続を追う。
mod error;
mod observer;
mod offer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ice::IceServerResolver;
use crate::media::{MediaEngine, PeerHandle};
use crate::session::{SessionId, SessionRegistry, SessionState};
use crate::stats::StatsAggregator;

pub use error::SignalingError;
pub use offer::{parse_offer, ServerTimings};

use observer::SessionObserver;
use offer::StepTimer;

pub const DEFAULT_OFFER_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// クライアントへ返す answer（`/offer` のレスポンス）
#[derive(Debug, Clone, Serialize)]
pub struct OfferAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub server_timings: ServerTimings,
    #[serde(skip)]
    pub session_id: SessionId,
}

/// 接続試行の記録（監視タスクと共有）
///
/// どちらが検知しても失敗は1回だけ数える。
pub(crate) struct Attempt {
    started: Instant,
    stats: Arc<StatsAggregator>,
    failed: AtomicBool,
    session_id: Mutex<Option<SessionId>>,
}

impl Attempt {
    fn begin(stats: Arc<StatsAggregator>) -> Self {
        stats.record_attempt();
        Self {
            started: Instant::now(),
            stats,
            failed: AtomicBool::new(false),
            session_id: Mutex::new(None),
        }
    }

    pub(crate) fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub(crate) fn fail(&self) {
        if !self.failed.swap(true, Ordering::SeqCst) {
            self.stats.record_failure();
        }
    }

    fn set_session(&self, session_id: SessionId) {
        *self.session_id.lock() = Some(session_id);
    }

    fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }
}

pub struct SignalingCoordinator {
    resolver: Arc<IceServerResolver>,
    registry: Arc<SessionRegistry>,
    stats: Arc<StatsAggregator>,
    engine: Arc<dyn MediaEngine>,
    offer_timeout: Duration,
    connect_timeout: Duration,
}

impl SignalingCoordinator {
    pub fn new(
        resolver: Arc<IceServerResolver>,
        registry: Arc<SessionRegistry>,
        stats: Arc<StatsAggregator>,
        engine: Arc<dyn MediaEngine>,
    ) -> Self {
        Self {
            resolver,
            registry,
            stats,
            engine,
            offer_timeout: DEFAULT_OFFER_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// `offer` はネゴシエーション全体、`connect` は offer から接続確立までの上限
    pub fn with_timeouts(mut self, offer: Duration, connect: Duration) -> Self {
        self.offer_timeout = offer;
        self.connect_timeout = connect;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn resolver(&self) -> &Arc<IceServerResolver> {
        &self.resolver
    }

    /// offer を1件処理する。
    ///
    /// 解析できないボディも含め、呼び出しごとに接続試行として数える。
    /// エラー時は失敗として数え、作成済みセッションは failed にして削除する。
    pub async fn handle_offer(&self, body: &[u8]) -> Result<OfferAnswer, SignalingError> {
        let attempt = Arc::new(Attempt::begin(self.stats.clone()));

        let result = match tokio::time::timeout(self.offer_timeout, self.negotiate(body, &attempt))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SignalingError::Timeout {
                after: self.offer_timeout,
            }),
        };

        match result {
            Ok(answer) => {
                info!(
                    session_id = %answer.session_id,
                    total_ms = answer.server_timings.total_ms,
                    "offer answered"
                );
                Ok(answer)
            }
            Err(err) => {
                attempt.fail();
                match attempt.session_id() {
                    Some(session_id) => {
                        error!(session_id = %session_id, error = %err, "offer failed");
                        if let Err(cleanup) = self
                            .registry
                            .transition(&session_id, SessionState::Failed)
                            .await
                        {
                            warn!(session_id = %session_id, error = %cleanup, "failing session after offer error");
                            self.registry.remove(&session_id).await;
                        }
                    }
                    None => error!(error = %err, "offer rejected"),
                }
                Err(err)
            }
        }
    }

    async fn negotiate(
        &self,
        body: &[u8],
        attempt: &Arc<Attempt>,
    ) -> Result<OfferAnswer, SignalingError> {
        let mut timer = StepTimer::start();
        let mut timings = ServerTimings::default();

        let offer = parse_offer(body)?;
        timings.parse_ms = timer.lap();

        let ice_servers = self.resolver.resolve().await;
        timings.ice_ms = timer.lap();

        let session = self.registry.create(ice_servers);
        attempt.set_session(session.id.clone());

        let PeerHandle { peer, events } = self.engine.create_peer(&session.ice_servers).await?;
        self.registry.attach_peer(&session.id, peer.clone()).await?;

        let observer = SessionObserver {
            session_id: session.id.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            attempt: attempt.clone(),
            peer: peer.clone(),
            events,
            connect_deadline: attempt.started + self.connect_timeout,
        };
        tokio::spawn(observer.run());
        timings.session_ms = timer.lap();

        peer.apply_offer(&offer).await?;
        self.registry
            .transition(&session.id, SessionState::HaveRemoteOffer)
            .await?;
        timings.remote_description_ms = timer.lap();

        let answer = peer.create_answer().await?;
        self.registry
            .transition(&session.id, SessionState::HaveLocalAnswer)
            .await?;
        timings.answer_ms = timer.lap();
        timings.total_ms = attempt.elapsed_ms();

        Ok(OfferAnswer {
            sdp: answer.sdp,
            sdp_type: answer.sdp_type,
            server_timings: timings,
            session_id: session.id,
        })
    }
}
