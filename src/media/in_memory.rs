//! テスト用インメモリメディアエンジン
//!
//! `v=0` で始まる offer を受け付け、固定の answer を返し、
//! エコー出力へ書かれたフレームを記録する。
//! 接続状態と受信トラックは [`InMemoryPeer`] 経由でテストから操作する。
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    AudioFrame, FrameSink, FrameSource, MediaEngine, MediaError, PeerEvent, PeerHandle,
    PeerSession, PeerState, SessionDescription,
};
use crate::ice::IceServer;

const ANSWER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=echo\r\nt=0 0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=sendrecv\r\n";

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    peers: Mutex<Vec<Arc<InMemoryPeer>>>,
    fail_create: AtomicBool,
    fail_close: AtomicBool,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以降の `create_peer` を失敗させる
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// 以降に作るピアの `close` をエラーにする
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn peers(&self) -> Vec<Arc<InMemoryPeer>> {
        self.peers.lock().clone()
    }

    pub fn last_peer(&self) -> Option<Arc<InMemoryPeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl MediaEngine for InMemoryEngine {
    async fn create_peer(&self, ice_servers: &[IceServer]) -> Result<PeerHandle, MediaError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(MediaError::engine("peer creation disabled"));
        }

        let (events_tx, events_rx) = mpsc::channel(32);
        let peer = Arc::new(InMemoryPeer {
            ice_servers: ice_servers.to_vec(),
            events: Mutex::new(Some(events_tx)),
            remote: Mutex::new(None),
            sent: Arc::new(Mutex::new(Vec::new())),
            close_calls: AtomicUsize::new(0),
            fail_close: self.fail_close.load(Ordering::SeqCst),
        });
        self.peers.lock().push(peer.clone());

        Ok(PeerHandle {
            peer,
            events: events_rx,
        })
    }
}

#[derive(Debug)]
pub struct InMemoryPeer {
    ice_servers: Vec<IceServer>,
    events: Mutex<Option<mpsc::Sender<PeerEvent>>>,
    remote: Mutex<Option<SessionDescription>>,
    sent: Arc<Mutex<Vec<AudioFrame>>>,
    close_calls: AtomicUsize,
    fail_close: bool,
}

impl InMemoryPeer {
    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    /// 接続状態変化を通知（クローズ後は false）
    pub async fn emit_state(&self, state: PeerState) -> bool {
        self.emit(PeerEvent::StateChanged(state)).await
    }

    /// 受信音声トラックを渡す（クローズ後は false）
    pub async fn push_track(&self, source: Box<dyn FrameSource>) -> bool {
        self.emit(PeerEvent::Track(source)).await
    }

    pub fn sent_frames(&self) -> Vec<AudioFrame> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    async fn emit(&self, event: PeerEvent) -> bool {
        let sender = self.events.lock().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PeerSession for InMemoryPeer {
    async fn apply_offer(&self, offer: &SessionDescription) -> Result<(), MediaError> {
        if !offer.sdp.trim_start().starts_with("v=0") {
            return Err(MediaError::invalid_description("offer is not SDP"));
        }
        *self.remote.lock() = Some(offer.clone());
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        if self.remote.lock().is_none() {
            return Err(MediaError::engine("no remote description"));
        }
        Ok(SessionDescription::answer(ANSWER_SDP))
    }

    fn outbound_sink(&self) -> Box<dyn FrameSink> {
        Box::new(RecordingSink {
            frames: self.sent.clone(),
        })
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(sender) = self.events.lock().take() {
            let _ = sender.try_send(PeerEvent::StateChanged(PeerState::Closed));
        }
        if self.fail_close {
            return Err(MediaError::engine("close failed"));
        }
        Ok(())
    }
}

/// 固定フレーム列を返した後に終端するソース
pub struct ScriptedSource {
    items: VecDeque<Result<AudioFrame, MediaError>>,
}

impl ScriptedSource {
    pub fn new(items: impl IntoIterator<Item = Result<AudioFrame, MediaError>>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    pub fn frames(frames: impl IntoIterator<Item = AudioFrame>) -> Self {
        Self::new(frames.into_iter().map(Ok))
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, MediaError> {
        self.items.pop_front().transpose()
    }
}

/// チャネル経由のソース（送信側クローズで終端）
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<AudioFrame, MediaError>>,
}

pub fn frame_channel(
    capacity: usize,
) -> (mpsc::Sender<Result<AudioFrame, MediaError>>, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (tx, ChannelSource { rx })
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, MediaError> {
        self.rx.recv().await.transpose()
    }
}

/// 受け取ったフレームを保持するシンク
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<AudioFrame>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<AudioFrame> {
        self.frames.lock().clone()
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send_frame(&mut self, frame: AudioFrame) -> Result<(), MediaError> {
        self.frames.lock().push(frame);
        Ok(())
    }
}
