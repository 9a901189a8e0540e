use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{IceError, IceServer};
use crate::config::CredentialServiceConfig;

/// 短命な TURN 認証情報の発行元
#[async_trait]
pub trait CredentialService: Send + Sync {
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError>;
}

/// Twilio Network Traversal Service のトークン API
#[derive(Debug, Clone)]
pub struct TwilioCredentialService {
    client: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
    timeout: Duration,
}

impl TwilioCredentialService {
    pub fn new(
        api_base: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            timeout,
        }
    }

    /// Account SID と Auth Token が揃っていなければ `None`
    pub fn from_config(config: &CredentialServiceConfig) -> Option<Self> {
        let (sid, token) = config.credentials()?;
        Some(Self::new(
            config.api_base.clone(),
            sid,
            token,
            config.request_timeout(),
        ))
    }

    fn token_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Tokens.json",
            self.api_base.trim_end_matches('/'),
            self.account_sid
        )
    }
}

#[async_trait]
impl CredentialService for TwilioCredentialService {
    async fn fetch(&self) -> Result<Vec<IceServer>, IceError> {
        let url = self.token_url();
        debug!(%url, "requesting TURN credentials");

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IceError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        parse_token_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    ice_servers: Option<Vec<TokenIceServer>>,
}

#[derive(Debug, Deserialize)]
struct TokenIceServer {
    #[serde(default)]
    urls: Option<UrlList>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    credential: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UrlList {
    One(String),
    Many(Vec<String>),
}

/// トークン応答を ICE サーバー定義へ変換（ポリシー未適用）
pub(crate) fn parse_token_response(body: &str) -> Result<Vec<IceServer>, IceError> {
    let response: TokenResponse =
        serde_json::from_str(body).map_err(|e| IceError::malformed(e.to_string()))?;
    let entries = response
        .ice_servers
        .ok_or_else(|| IceError::malformed("missing ice_servers"))?;

    let servers = entries
        .into_iter()
        .filter_map(|entry| {
            let urls = match (entry.urls, entry.url) {
                (Some(UrlList::Many(urls)), _) => urls,
                (Some(UrlList::One(url)), _) => vec![url],
                (None, Some(url)) => vec![url],
                (None, None) => Vec::new(),
            };
            let urls: Vec<String> = urls
                .into_iter()
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty())
                .collect();
            if urls.is_empty() {
                return None;
            }
            Some(IceServer {
                urls,
                username: entry.username.filter(|s| !s.is_empty()),
                credential: entry.credential.filter(|s| !s.is_empty()),
            })
        })
        .collect();

    Ok(servers)
}
