mod error;
mod registry;
mod state;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::ice::IceServer;

pub use error::RegistryError;
pub use registry::{CloseReport, SessionRegistry, Transition};
pub use state::{SessionState, StateChange};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// セッション情報（スナップショット）
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: Instant,
    pub connected_at: Option<Instant>,
    pub ice_servers: Arc<Vec<IceServer>>,
}

impl Session {
    fn new(ice_servers: Vec<IceServer>) -> Self {
        Self {
            id: SessionId::generate(),
            state: SessionState::New,
            created_at: Instant::now(),
            connected_at: None,
            ice_servers: Arc::new(ice_servers),
        }
    }
}
