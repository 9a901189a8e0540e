//! メディアトランスポート抽象
//!
//! WebRTC スタック（ICE/DTLS/SRTP/SDP）は [`MediaEngine`] と [`PeerSession`] の背後にある。
//! サーバー側はピア生成、SDP 交換、接続状態の監視、
//! 音声フレームの転送だけを行う。
mod error;
pub mod in_memory;
pub mod peer_connection;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ice::IceServer;

pub use error::MediaError;
pub use in_memory::InMemoryEngine;
pub use peer_connection::WebRtcEngine;

/// 音声 RTP パケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    pub marker: bool,
    pub payload: Bytes,
}

impl AudioFrame {
    pub fn new(sequence_number: u16, timestamp: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_number,
            timestamp,
            ssrc: 0,
            payload_type: 111,
            marker: false,
            payload: payload.into(),
        }
    }
}

/// SDP とその種別（`offer` / `answer`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            sdp_type: "answer".to_string(),
        }
    }
}

/// ピア接続状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// 受信メディア（`Ok(None)` で終端）
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, MediaError>;
}

/// 送信メディア
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: AudioFrame) -> Result<(), MediaError>;
}

/// ピア接続からの非同期イベント
pub enum PeerEvent {
    StateChanged(PeerState),
    /// 相手側の音声トラック受信
    Track(Box<dyn FrameSource>),
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
            Self::Track(_) => f.write_str("Track(..)"),
        }
    }
}

#[async_trait]
pub trait PeerSession: Send + Sync {
    async fn apply_offer(&self, offer: &SessionDescription) -> Result<(), MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    /// エコー送信トラックへのシンク
    fn outbound_sink(&self) -> Box<dyn FrameSink>;

    async fn close(&self) -> Result<(), MediaError>;
}

/// 生成したピアとイベントストリーム
pub struct PeerHandle {
    pub peer: Arc<dyn PeerSession>,
    pub events: mpsc::Receiver<PeerEvent>,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_peer(&self, ice_servers: &[IceServer]) -> Result<PeerHandle, MediaError>;
}
