use std::time::Duration;

use thiserror::Error;

use crate::media::MediaError;
use crate::session::RegistryError;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed offer: {reason}")]
    MalformedOffer { reason: String },
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Session(#[from] RegistryError),
    #[error("negotiation timed out after {after:?}")]
    Timeout { after: Duration },
}

impl SignalingError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedOffer {
            reason: reason.into(),
        }
    }
}
