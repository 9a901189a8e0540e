use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::Attempt;
use crate::media::{FrameSource, PeerEvent, PeerSession, PeerState};
use crate::relay::{EchoRelay, RelayOutcome};
use crate::session::{RegistryError, SessionId, SessionRegistry, SessionState, Transition};
use crate::stats::StatsAggregator;

/// ピア生成後のセッション監視タスク
///
/// エコーリレーのバインド、接続状態のレジストリ反映、接続期限の監視を行う。
/// セッションがレジストリから消えたら終了する。
pub(crate) struct SessionObserver {
    pub(crate) session_id: SessionId,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) stats: Arc<StatsAggregator>,
    pub(crate) attempt: Arc<Attempt>,
    pub(crate) peer: Arc<dyn PeerSession>,
    pub(crate) events: mpsc::Receiver<PeerEvent>,
    pub(crate) connect_deadline: Instant,
}

impl SessionObserver {
    pub(crate) async fn run(mut self) {
        let (reports_tx, mut reports_rx) = mpsc::channel::<RelayOutcome>(1);
        let deadline = tokio::time::sleep_until(self.connect_deadline.into());
        tokio::pin!(deadline);
        let mut connected = false;

        loop {
            let keep_going = tokio::select! {
                event = self.events.recv() => match event {
                    Some(PeerEvent::StateChanged(state)) => self.on_state(state, &mut connected).await,
                    Some(PeerEvent::Track(source)) => self.on_track(source, &reports_tx),
                    None => {
                        debug!(session_id = %self.session_id, "peer event stream closed");
                        false
                    }
                },
                Some(outcome) = reports_rx.recv() => self.on_relay_finished(outcome, connected).await,
                _ = &mut deadline, if !connected => self.on_connect_timeout().await,
            };
            if !keep_going {
                break;
            }
        }

        // 終端状態なしでピアが消えた場合のみ効く
        if self.registry.remove(&self.session_id).await {
            warn!(session_id = %self.session_id, "session dropped after its peer went away");
        }
    }

    async fn on_state(&self, state: PeerState, connected: &mut bool) -> bool {
        let target = match state {
            PeerState::Connected => SessionState::Connected,
            PeerState::Failed => SessionState::Failed,
            PeerState::Closed => SessionState::Closed,
            PeerState::Disconnected => {
                warn!(session_id = %self.session_id, "peer disconnected, waiting for recovery");
                return true;
            }
            PeerState::New | PeerState::Connecting => {
                debug!(session_id = %self.session_id, state = ?state, "peer state");
                return true;
            }
        };

        match self.registry.transition(&self.session_id, target).await {
            Ok(Transition::Applied {
                to: SessionState::Connected,
                ..
            }) => {
                *connected = true;
                let latency_ms = self.attempt.elapsed_ms();
                self.stats.record_latency(latency_ms);
                info!(session_id = %self.session_id, latency_ms, "session connected");
                true
            }
            Ok(Transition::Applied { to, .. }) => {
                if to == SessionState::Failed && !*connected {
                    self.attempt.fail();
                }
                !to.is_terminal()
            }
            Ok(Transition::Unchanged(_)) => true,
            Err(RegistryError::NotFound { .. }) => false,
            Err(err) => {
                debug!(session_id = %self.session_id, error = %err, "peer state ignored");
                true
            }
        }
    }

    fn on_track(
        &self,
        source: Box<dyn FrameSource>,
        reports: &mpsc::Sender<RelayOutcome>,
    ) -> bool {
        let sink = self.peer.outbound_sink();
        let relay = EchoRelay::bind(source, sink, reports.clone()).start();
        match self.registry.bind_relay(&self.session_id, relay) {
            Ok(()) => {
                info!(session_id = %self.session_id, "inbound audio bound to echo relay");
                true
            }
            Err(RegistryError::NotFound { .. }) => false,
            Err(_) => true,
        }
    }

    async fn on_relay_finished(&self, outcome: RelayOutcome, connected: bool) -> bool {
        if !outcome.is_failure() {
            return true;
        }

        warn!(
            session_id = %self.session_id,
            forwarded = outcome.forwarded(),
            outcome = ?outcome,
            "echo relay ended, failing session"
        );
        if let Ok(Transition::Applied { .. }) = self
            .registry
            .transition(&self.session_id, SessionState::Failed)
            .await
        {
            if !connected {
                self.attempt.fail();
            }
        }
        false
    }

    async fn on_connect_timeout(&self) -> bool {
        warn!(session_id = %self.session_id, "peer did not connect before the deadline");
        if let Ok(Transition::Applied { .. }) = self
            .registry
            .transition(&self.session_id, SessionState::Failed)
            .await
        {
            self.attempt.fail();
        }
        false
    }
}
