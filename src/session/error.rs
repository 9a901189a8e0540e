use thiserror::Error;

use super::{SessionId, SessionState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session not found: {session_id}")]
    NotFound { session_id: SessionId },
    #[error("invalid transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },
    #[error("session {session_id} already has a relay bound")]
    RelayAlreadyBound { session_id: SessionId },
}

impl RegistryError {
    pub fn not_found(session_id: &SessionId) -> Self {
        Self::NotFound {
            session_id: session_id.clone(),
        }
    }
}
