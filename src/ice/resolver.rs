use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use super::{filter_servers, CredentialService, IceError, IceServer, TwilioCredentialService};
use crate::config::IceConfig;

const DEFAULT_TURN_PORT: u16 = 3478;

/// 解決結果の取得元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IceSource {
    CredentialService,
    CustomRelay,
    Default,
}

/// 運用者管理の TURN リレー
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServer {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl RelayServer {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// UDP/TCP 両方を持つ TURN 定義
    pub fn descriptor(&self) -> IceServer {
        let authority = relay_authority(&self.host);
        IceServer::turn(
            vec![
                format!("turn:{authority}?transport=udp"),
                format!("turn:{authority}?transport=tcp"),
            ],
            self.username.clone(),
            self.password.clone(),
        )
    }
}

/// `turn:` 接頭辞を除いた `host` または `host:port`
fn relay_authority(host: &str) -> String {
    let host = host
        .trim()
        .trim_start_matches("turns:")
        .trim_start_matches("turn:");
    match host.rsplit_once(':') {
        Some((_, port)) if port.parse::<u16>().is_ok() => host.to_string(),
        _ => format!("{host}:{DEFAULT_TURN_PORT}"),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    servers: Arc<Vec<IceServer>>,
    fetched_at: Instant,
    source: IceSource,
}

/// キャッシュ状態（参照用）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    pub age: Option<Duration>,
    pub count: usize,
    pub source: Option<IceSource>,
}

/// ICE サーバー解決（TTL キャッシュ付き）
///
/// フォールバック順: 認証情報サービス → 独自リレー → 公開 STUN
pub struct IceServerResolver {
    credential_service: Option<Arc<dyn CredentialService>>,
    relay: Option<RelayServer>,
    udp_restricted: bool,
    ttl: Duration,
    cache: RwLock<Option<CacheEntry>>,
}

impl IceServerResolver {
    pub fn new(ttl: Duration) -> Self {
        Self {
            credential_service: None,
            relay: None,
            udp_restricted: false,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(config: &IceConfig) -> Self {
        let mut resolver = Self::new(config.cache_ttl()).udp_restricted(config.udp_restricted);

        match TwilioCredentialService::from_config(&config.credential_service) {
            Some(service) => {
                info!("credential service configured for ICE resolution");
                resolver = resolver.with_credential_service(Arc::new(service));
            }
            None if config.credential_service.is_partial() => {
                warn!("credential service configuration incomplete, skipping provider");
            }
            None => {}
        }

        match config.relay.complete() {
            Some((host, username, password)) => {
                info!(host = %host, "custom TURN relay configured");
                resolver = resolver.with_relay(RelayServer::new(host, username, password));
            }
            None if config.relay.is_partial() => {
                warn!("custom TURN relay requires host, username and password, skipping provider");
            }
            None => {}
        }

        resolver
    }

    pub fn with_credential_service(mut self, service: Arc<dyn CredentialService>) -> Self {
        self.credential_service = Some(service);
        self
    }

    pub fn with_relay(mut self, relay: RelayServer) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn udp_restricted(mut self, restricted: bool) -> Self {
        self.udp_restricted = restricted;
        self
    }

    /// 現在のサーバー一覧（失敗しない）
    pub async fn resolve(&self) -> Vec<IceServer> {
        if let Some(servers) = self.fresh_cached() {
            return servers.as_ref().clone();
        }

        let (servers, source) = self.resolve_uncached().await;
        let servers = Arc::new(servers);
        *self.cache.write() = Some(CacheEntry {
            servers: servers.clone(),
            fetched_at: Instant::now(),
            source,
        });
        info!(count = servers.len(), source = ?source, "ICE servers resolved");
        servers.as_ref().clone()
    }

    /// キャッシュを破棄して再解決
    pub async fn force_refresh(&self) -> Vec<IceServer> {
        self.invalidate();
        self.resolve().await
    }

    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    pub fn inspect(&self) -> CacheStatus {
        match self.cache.read().as_ref() {
            Some(entry) => CacheStatus {
                age: Some(entry.fetched_at.elapsed()),
                count: entry.servers.len(),
                source: Some(entry.source),
            },
            None => CacheStatus {
                age: None,
                count: 0,
                source: None,
            },
        }
    }

    fn fresh_cached(&self) -> Option<Arc<Vec<IceServer>>> {
        let guard = self.cache.read();
        let entry = guard.as_ref()?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.servers.clone())
    }

    async fn resolve_uncached(&self) -> (Vec<IceServer>, IceSource) {
        if let Some(service) = &self.credential_service {
            match self.fetch_from_service(service.as_ref()).await {
                Ok(servers) => return (servers, IceSource::CredentialService),
                Err(err) => warn!(error = %err, "credential service failed, falling back"),
            }
        }

        if let Some(relay) = &self.relay {
            let mut servers = IceServer::default_stun();
            servers.push(relay.descriptor());
            let servers = filter_servers(servers, self.udp_restricted);
            return (servers, IceSource::CustomRelay);
        }

        (IceServer::default_stun(), IceSource::Default)
    }

    async fn fetch_from_service(
        &self,
        service: &dyn CredentialService,
    ) -> Result<Vec<IceServer>, IceError> {
        let servers = filter_servers(service.fetch().await?, self.udp_restricted);
        if servers.is_empty() {
            return Err(IceError::Empty);
        }
        Ok(servers)
    }
}
