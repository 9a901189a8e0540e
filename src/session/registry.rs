use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{RegistryError, Session, SessionId, SessionState, StateChange};
use crate::ice::IceServer;
use crate::media::{MediaError, PeerSession};
use crate::relay::RelayHandle;

/// 状態遷移要求の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: SessionState,
        to: SessionState,
    },
    Unchanged(SessionState),
}

/// 一括クローズの結果
#[derive(Debug, Default)]
pub struct CloseReport {
    pub closed: usize,
    pub failures: Vec<(SessionId, MediaError)>,
}

/// セッションが所有するピア接続とリレータスク
#[derive(Default)]
struct MediaBinding {
    peer: Option<Arc<dyn PeerSession>>,
    relay: Option<RelayHandle>,
}

impl MediaBinding {
    async fn release(self) -> Result<(), MediaError> {
        if let Some(relay) = self.relay {
            relay.release();
        }
        match self.peer {
            Some(peer) => peer.close().await,
            None => Ok(()),
        }
    }
}

struct SessionEntry {
    session: Session,
    binding: MediaBinding,
}

/// セッション管理（ID をキーに生存セッションを保持）
///
/// `failed` / `closed` に入った時点で削除するため、登録有無が生存と一致する。
/// ロックは await をまたいで保持しない。
/// バインディングはマップから外した後に解放するので、解放は1回だけ。
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, ice_servers: Vec<IceServer>) -> Session {
        let session = Session::new(ice_servers);
        let mut sessions = self.sessions.lock();
        sessions.insert(
            session.id.clone(),
            SessionEntry {
                session: session.clone(),
                binding: MediaBinding::default(),
            },
        );
        info!(session_id = %session.id, total = sessions.len(), "session created");
        session
    }

    pub fn get(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|entry| entry.session.clone())
    }

    /// 生存セッション数
    pub fn size(&self) -> usize {
        self.sessions.lock().len()
    }

    /// ピア接続をセッションへ渡す（セッションが無ければ閉じる）
    pub async fn attach_peer(
        &self,
        session_id: &SessionId,
        peer: Arc<dyn PeerSession>,
    ) -> Result<(), RegistryError> {
        let rejected = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(session_id) {
                Some(entry) => {
                    entry.binding.peer = Some(peer);
                    None
                }
                None => Some(peer),
            }
        };

        match rejected {
            None => Ok(()),
            Some(peer) => {
                if let Err(err) = peer.close().await {
                    warn!(session_id = %session_id, error = %err, "closing orphaned peer failed");
                }
                Err(RegistryError::not_found(session_id))
            }
        }
    }

    /// エコーリレーを1つだけバインドする（不要なリレーは即解放）
    pub fn bind_relay(
        &self,
        session_id: &SessionId,
        relay: RelayHandle,
    ) -> Result<(), RegistryError> {
        let rejection = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(session_id) {
                None => RegistryError::not_found(session_id),
                Some(entry) if entry.binding.relay.is_some() => RegistryError::RelayAlreadyBound {
                    session_id: session_id.clone(),
                },
                Some(entry) => {
                    entry.binding.relay = Some(relay);
                    debug!(session_id = %session_id, "echo relay bound");
                    return Ok(());
                }
            }
        };

        warn!(session_id = %session_id, error = %rejection, "relay binding rejected");
        relay.release();
        Err(rejection)
    }

    /// 状態遷移
    ///
    /// 不正な遷移はログに出してエラーを返し、セッションは変更しない。
    /// `failed` / `closed` へ入るとセッションを削除してバインディングを解放する。
    pub async fn transition(
        &self,
        session_id: &SessionId,
        to: SessionState,
    ) -> Result<Transition, RegistryError> {
        let (transition, released) = {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(session_id) else {
                debug!(session_id = %session_id, to = %to, "transition for unknown session");
                return Err(RegistryError::not_found(session_id));
            };

            let from = entry.session.state;
            match from.check(to) {
                StateChange::Reject => {
                    warn!(session_id = %session_id, from = %from, to = %to, "invalid state transition rejected");
                    return Err(RegistryError::InvalidTransition {
                        session_id: session_id.clone(),
                        from,
                        to,
                    });
                }
                StateChange::Unchanged => return Ok(Transition::Unchanged(from)),
                StateChange::Apply => {}
            }

            entry.session.state = to;
            if to == SessionState::Connected && entry.session.connected_at.is_none() {
                entry.session.connected_at = Some(Instant::now());
            }

            let released = if to.is_terminal() {
                sessions.remove(session_id).map(|entry| entry.binding)
            } else {
                None
            };
            info!(session_id = %session_id, from = %from, to = %to, live = sessions.len(), "session state changed");

            (Transition::Applied { from, to }, released)
        };

        if let Some(binding) = released {
            if let Err(err) = binding.release().await {
                warn!(session_id = %session_id, error = %err, "releasing session media failed");
            }
        }

        Ok(transition)
    }

    /// セッションを閉じて削除（登録されていたかを返す）
    pub async fn remove(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.lock().remove(session_id);
        match removed {
            Some(entry) => {
                if let Err(err) = entry.binding.release().await {
                    warn!(session_id = %session_id, error = %err, "releasing session media failed");
                }
                info!(session_id = %session_id, "session removed");
                true
            }
            None => false,
        }
    }

    /// 全セッションをクローズ（個別の解放エラーは集約）
    pub async fn close_all(&self) -> CloseReport {
        let drained: Vec<(SessionId, SessionEntry)> = self.sessions.lock().drain().collect();
        let closed = drained.len();

        let releases = drained.into_iter().map(|(session_id, entry)| {
            debug!(session_id = %session_id, from = %entry.session.state, "closing session");
            async move { (session_id, entry.binding.release().await) }
        });

        let failures = join_all(releases)
            .await
            .into_iter()
            .filter_map(|(session_id, result)| result.err().map(|err| (session_id, err)))
            .collect::<Vec<_>>();

        for (session_id, err) in &failures {
            warn!(session_id = %session_id, error = %err, "release failed during shutdown");
        }
        info!(closed, failed = failures.len(), "all sessions closed");

        CloseReport { closed, failures }
    }
}
