//! ICE プロバイダー設定（認証情報サービス、運用 TURN リレー、キャッシュ）
use std::time::Duration;

use serde::Deserialize;

pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IceConfig {
    pub credential_service: CredentialServiceConfig,
    pub relay: RelayConfig,
    /// TCP/TLS のリレー URL のみ残す（UDP 送信が遮断された環境向け）
    pub udp_restricted: bool,
    pub cache_ttl_s: u64,
}

impl IceConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_s)
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            credential_service: CredentialServiceConfig::default(),
            relay: RelayConfig::default(),
            udp_restricted: false,
            cache_ttl_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialServiceConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub api_base: String,
    pub request_timeout_s: u64,
}

impl CredentialServiceConfig {
    /// アカウント認証情報（両方揃っている場合のみ）
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let sid = self.account_sid.as_deref().filter(|s| !s.trim().is_empty())?;
        let token = self.auth_token.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((sid, token))
    }

    pub fn is_partial(&self) -> bool {
        self.credentials().is_none()
            && (non_empty(&self.account_sid) || non_empty(&self.auth_token))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

impl Default for CredentialServiceConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            api_base: DEFAULT_TWILIO_API_BASE.to_string(),
            request_timeout_s: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RelayConfig {
    /// リレー設定が揃っていれば `(host, username, password)`
    pub fn complete(&self) -> Option<(&str, &str, &str)> {
        let host = self.host.as_deref().filter(|s| !s.trim().is_empty())?;
        let username = self.username.as_deref().filter(|s| !s.is_empty())?;
        let password = self.password.as_deref().filter(|s| !s.is_empty())?;
        Some((host.trim(), username, password))
    }

    pub fn is_partial(&self) -> bool {
        self.complete().is_none()
            && (non_empty(&self.host) || non_empty(&self.username) || non_empty(&self.password))
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
}
