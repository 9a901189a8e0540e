//! 設定モジュール（YAML 読み込み + 環境変数上書き）
//!
//! `AppConfig` は既定値から始まり、[`CONFIG_FILE_ENV`] で指定された YAML を重ね、
//! 最後に環境変数で上書きする。
//! ICE プロバイダーの環境変数が無くてもエラーにはならず、
//! 解決時に次のプロバイダーへフォールバックする。
mod error;
mod ice;
mod server;

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

pub use error::ConfigError;
pub use ice::*;
pub use server::*;

/// YAML 設定ファイルのパスを指定する環境変数
pub const CONFIG_FILE_ENV: &str = "ECHO_SERVER_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub ice: IceConfig,
}

impl AppConfig {
    /// YAML ファイルを読み込む（省略されたセクションは既定値）
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&data).map_err(|source| ConfigError::Parse { path, source })
    }

    /// 既定値（または `ECHO_SERVER_CONFIG` のファイル）に環境変数を適用
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::load_from_file(PathBuf::from(path))?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// キー参照関数から上書きを適用する（本番ではプロセス環境変数）
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_value("PORT", &port)?;
        }
        if let Some(dir) = get("STATIC_DIR") {
            self.server.static_dir = dir;
        }
        if let Some(value) = get("OFFER_TIMEOUT_SECS") {
            self.server.offer_timeout_s = parse_value("OFFER_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("CONNECT_TIMEOUT_SECS") {
            self.server.connect_timeout_s = parse_value("CONNECT_TIMEOUT_SECS", &value)?;
        }

        let credential_service = &mut self.ice.credential_service;
        if let Some(sid) = get("TWILIO_ACCOUNT_SID") {
            credential_service.account_sid = Some(sid);
        }
        if let Some(token) = get("TWILIO_AUTH_TOKEN") {
            credential_service.auth_token = Some(token);
        }
        if let Some(base) = get("TWILIO_API_BASE") {
            credential_service.api_base = base;
        }
        if let Some(value) = get("CREDENTIAL_REQUEST_TIMEOUT_SECS") {
            credential_service.request_timeout_s =
                parse_value("CREDENTIAL_REQUEST_TIMEOUT_SECS", &value)?;
        }

        let relay = &mut self.ice.relay;
        if let Some(host) = get("TURN_SERVER") {
            relay.host = Some(host);
        }
        if let Some(username) = get("TURN_USERNAME") {
            relay.username = Some(username);
        }
        if let Some(password) = get("TURN_PASSWORD") {
            relay.password = Some(password);
        }

        if let Some(value) = get("UDP_RESTRICTED") {
            self.ice.udp_restricted = parse_flag("UDP_RESTRICTED", &value)?;
        }
        if let Some(value) = get("ICE_CACHE_TTL_SECS") {
            self.ice.cache_ttl_s = parse_value("ICE_CACHE_TTL_SECS", &value)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server port must be non-zero".into()));
        }
        if self.server.offer_timeout_s == 0 {
            return Err(ConfigError::Invalid("offer timeout must be non-zero".into()));
        }
        if self.server.connect_timeout_s == 0 {
            return Err(ConfigError::Invalid("connect timeout must be non-zero".into()));
        }
        if self.ice.cache_ttl_s == 0 {
            return Err(ConfigError::Invalid("ICE cache TTL must be non-zero".into()));
        }
        if self.ice.credential_service.request_timeout_s == 0 {
            return Err(ConfigError::Invalid(
                "credential request timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
