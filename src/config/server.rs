use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 待ち受けホスト（例: `0.0.0.0`）
    pub host: String,
    pub port: u16,
    /// `index.html` などクライアント資産のディレクトリ
    pub static_dir: String,
    /// offer/answer ネゴシエーション全体の上限時間
    pub offer_timeout_s: u64,
    /// この時間内に `connected` へ到達しないセッションは失敗扱い
    pub connect_timeout_s: u64,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn offer_timeout(&self) -> Duration {
        Duration::from_secs(self.offer_timeout_s)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_s)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: "static".to_string(),
            offer_timeout_s: 15,
            connect_timeout_s: 30,
        }
    }
}
