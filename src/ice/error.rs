use thiserror::Error;

/// 単一 ICE プロバイダーの失敗（常にフォールバックで回復）
#[derive(Debug, Error)]
pub enum IceError {
    #[error("credential service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("credential service returned status {status}")]
    Status { status: u16 },
    #[error("malformed credential service response: {message}")]
    Malformed { message: String },
    #[error("credential service returned no usable servers")]
    Empty,
}

impl IceError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
