//! ICE サーバー定義と解決処理
mod error;
mod provider;
mod resolver;

use serde::{Deserialize, Serialize};

pub use error::IceError;
pub use provider::{CredentialService, TwilioCredentialService};
pub use resolver::{CacheStatus, IceServerResolver, IceSource, RelayServer};

pub const DEFAULT_STUN_URLS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// STUN/TURN エンドポイント（ブラウザの `RTCConfiguration` 形式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls,
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    /// 他に設定が無いときの公開 STUN サーバー
    pub fn default_stun() -> Vec<Self> {
        DEFAULT_STUN_URLS.iter().map(|url| Self::stun(*url)).collect()
    }

    pub fn is_turn(&self) -> bool {
        self.urls.iter().any(|url| is_turn_url(url))
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() || self.credential.is_some()
    }

    /// 全 URL が TCP/TLS 系トランスポートなら true
    pub fn transport_hint(&self) -> bool {
        !self.urls.is_empty() && self.urls.iter().all(|url| is_stream_url(url))
    }

    /// トランスポートポリシーを適用する。
    ///
    /// `udp_restricted` の場合、TURN は TCP/TLS の URL のみ残す。
    /// URL が残らない認証付きエントリは破棄（`None`）。
    pub fn filter_transport(mut self, udp_restricted: bool) -> Option<Self> {
        if udp_restricted && self.is_turn() {
            self.urls.retain(|url| is_stream_url(url));
        }
        if self.urls.is_empty() {
            return None;
        }
        Some(self)
    }
}

fn is_turn_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    url.starts_with("turn:") || url.starts_with("turns:")
}

fn is_stream_url(url: &str) -> bool {
    let url = url.trim().to_ascii_lowercase();
    if url.starts_with("turns:") || url.starts_with("stuns:") {
        return true;
    }
    match url.split_once('?') {
        Some((_, query)) => query
            .split('&')
            .any(|param| param == "transport=tcp"),
        None => false,
    }
}

/// リスト全体にポリシーを適用し、空になったエントリを除く
pub fn filter_servers(servers: Vec<IceServer>, udp_restricted: bool) -> Vec<IceServer> {
    servers
        .into_iter()
        .filter_map(|server| server.filter_transport(udp_restricted))
        .collect()
}
