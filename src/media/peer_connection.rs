//! WebRTC メディアエンジン（webrtc-rs）
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use interceptor::registry::Registry;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::{
    AudioFrame, FrameSink, FrameSource, MediaEngine, MediaError, PeerEvent, PeerHandle,
    PeerSession, PeerState, SessionDescription,
};
use crate::ice::IceServer;

const EVENT_CHANNEL_CAPACITY: usize = 32;
const ICE_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// 共有 API からセッションごとに PeerConnection を生成する
pub struct WebRtcEngine {
    api: API,
}

impl WebRtcEngine {
    pub fn new() -> Result<Self, MediaError> {
        let mut media_engine = RtcMediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| MediaError::engine(format!("codec registration failed: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| MediaError::engine(format!("interceptor registration failed: {e}")))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api })
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    async fn create_peer(&self, ice_servers: &[IceServer]) -> Result<PeerHandle, MediaError> {
        let config = RTCConfiguration {
            ice_servers: ice_servers.iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| MediaError::engine(format!("peer connection creation failed: {e}")))?,
        );

        let echo_track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            "echo".to_owned(),
        ));

        let rtp_sender = peer_connection
            .add_track(Arc::clone(&echo_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| MediaError::engine(format!("adding echo track failed: {e}")))?;

        // インターセプタ（NACK、レポート）を動かすため RTCP を読み捨てる
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let state_tx = events_tx.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let state_tx = state_tx.clone();
                Box::pin(async move {
                    debug!(state = %state, "peer connection state changed");
                    forward_state(&state_tx, state.into());
                })
            },
        ));

        let track_tx = events_tx;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let track_tx = track_tx.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    debug!(kind = %track.kind(), "ignoring non-audio track");
                    return;
                }
                info!(track_id = %track.id(), "remote audio track received");
                let source = RemoteTrackSource { track };
                let _ = track_tx.send(PeerEvent::Track(Box::new(source))).await;
            })
        }));

        let peer = WebRtcPeer {
            peer_connection,
            echo_track,
        };

        Ok(PeerHandle {
            peer: Arc::new(peer),
            events: events_rx,
        })
    }
}

struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    echo_track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl PeerSession for WebRtcPeer {
    async fn apply_offer(&self, offer: &SessionDescription) -> Result<(), MediaError> {
        let offer = RTCSessionDescription::offer(offer.sdp.clone())
            .map_err(|e| MediaError::invalid_description(format!("offer parse failed: {e}")))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| MediaError::invalid_description(format!("set remote description failed: {e}")))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| MediaError::engine(format!("answer creation failed: {e}")))?;

        // Non-trickle: 収集済み候補を answer に含める
        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| MediaError::engine(format!("set local description failed: {e}")))?;

        if tokio::time::timeout(ICE_GATHERING_TIMEOUT, gathering_complete.recv())
            .await
            .is_err()
        {
            warn!("ICE gathering did not complete in time, answering with partial candidates");
        }

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| MediaError::engine("local description missing after answer"))?;

        Ok(SessionDescription::answer(local.sdp))
    }

    fn outbound_sink(&self) -> Box<dyn FrameSink> {
        Box::new(LocalTrackSink {
            track: self.echo_track.clone(),
        })
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| MediaError::engine(format!("peer connection close failed: {e}")))
    }
}

struct RemoteTrackSource {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl FrameSource for RemoteTrackSource {
    async fn next_frame(&mut self) -> Result<Option<AudioFrame>, MediaError> {
        let (packet, _attributes) = self
            .track
            .read_rtp()
            .await
            .map_err(|e| MediaError::track(format!("RTP read failed: {e}")))?;
        Ok(Some(frame_from_packet(packet)))
    }
}

struct LocalTrackSink {
    track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl FrameSink for LocalTrackSink {
    async fn send_frame(&mut self, frame: AudioFrame) -> Result<(), MediaError> {
        self.track
            .write_rtp(&packet_from_frame(frame))
            .await
            .map(|_| ())
            .map_err(|e| MediaError::track(format!("RTP write failed: {e}")))
    }
}

fn frame_from_packet(packet: Packet) -> AudioFrame {
    AudioFrame {
        sequence_number: packet.header.sequence_number,
        timestamp: packet.header.timestamp,
        ssrc: packet.header.ssrc,
        payload_type: packet.header.payload_type,
        marker: packet.header.marker,
        payload: packet.payload,
    }
}

fn packet_from_frame(frame: AudioFrame) -> Packet {
    Packet {
        header: Header {
            version: 2,
            marker: frame.marker,
            payload_type: frame.payload_type,
            sequence_number: frame.sequence_number,
            timestamp: frame.timestamp,
            ssrc: frame.ssrc,
            ..Default::default()
        },
        payload: frame.payload,
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

/// コールバックをブロックせずに状態変化を転送する。
/// キュー満杯時、終端状態は別タスクで届け、それ以外は破棄する。
fn forward_state(events: &mpsc::Sender<PeerEvent>, state: PeerState) {
    match events.try_send(PeerEvent::StateChanged(state)) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            if matches!(state, PeerState::Failed | PeerState::Closed) {
                warn!(state = ?state, "event queue full, delivering terminal state asynchronously");
                let events = events.clone();
                tokio::spawn(async move {
                    let _ = events.send(event).await;
                });
            } else {
                warn!(state = ?state, "event queue full, state update dropped");
            }
        }
        Err(TrySendError::Closed(_)) => {
            debug!(state = ?state, "event receiver gone");
        }
    }
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_packet_conversion_preserves_fields() {
        let mut frame = AudioFrame::new(42, 960, vec![1u8, 2, 3]);
        frame.ssrc = 7;
        frame.marker = true;

        let back = frame_from_packet(packet_from_frame(frame.clone()));
        assert_eq!(back, frame);
    }

    #[test]
    fn ice_server_credentials_map_to_empty_strings() {
        let server = to_rtc_ice_server(&IceServer::stun("stun:stun.l.google.com:19302"));
        assert_eq!(server.urls, vec!["stun:stun.l.google.com:19302"]);
        assert!(server.username.is_empty());
        assert!(server.credential.is_empty());
    }

    #[tokio::test]
    async fn terminal_state_survives_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        forward_state(&tx, PeerState::Connected);
        // キュー満杯: 非終端は破棄、終端は後から届く
        forward_state(&tx, PeerState::Disconnected);
        forward_state(&tx, PeerState::Failed);

        let first = rx.recv().await.expect("connected");
        assert!(matches!(first, PeerEvent::StateChanged(PeerState::Connected)));
        let second = rx.recv().await.expect("failed");
        assert!(matches!(second, PeerEvent::StateChanged(PeerState::Failed)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn engine_creates_peer_and_closes_it() {
        let engine = WebRtcEngine::new().expect("engine");
        let handle = engine.create_peer(&[]).await.expect("peer");
        handle.peer.close().await.expect("close");
    }
}
