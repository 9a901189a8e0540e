use std::fmt;

use serde::Serialize;

/// セッション状態
///
/// ```text
/// new -> have-remote-offer -> have-local-answer -> connected
/// any non-terminal state -> failed | closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    New,
    HaveRemoteOffer,
    HaveLocalAnswer,
    Connected,
    Failed,
    Closed,
}

/// 遷移要求の判定結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Apply,
    /// 既に同じ状態（`connected` の重複通知など）
    Unchanged,
    Reject,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::HaveRemoteOffer => "have-remote-offer",
            Self::HaveLocalAnswer => "have-local-answer",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    pub fn check(self, to: SessionState) -> StateChange {
        use SessionState::*;

        match (self, to) {
            (Failed | Closed, _) => StateChange::Reject,
            (Connected, Connected) => StateChange::Unchanged,
            (_, Failed | Closed) => StateChange::Apply,
            (New, HaveRemoteOffer)
            | (HaveRemoteOffer, HaveLocalAnswer)
            | (HaveLocalAnswer, Connected) => StateChange::Apply,
            _ => StateChange::Reject,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
