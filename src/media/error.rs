use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media engine error: {message}")]
    Engine { message: String },
    #[error("invalid session description: {message}")]
    InvalidDescription { message: String },
    #[error("track error: {message}")]
    Track { message: String },
    #[error("peer connection closed")]
    Closed,
}

impl MediaError {
    pub fn engine(message: impl ToString) -> Self {
        Self::Engine {
            message: message.to_string(),
        }
    }

    pub fn invalid_description(message: impl ToString) -> Self {
        Self::InvalidDescription {
            message: message.to_string(),
        }
    }

    pub fn track(message: impl ToString) -> Self {
        Self::Track {
            message: message.to_string(),
        }
    }
}
