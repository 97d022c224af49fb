use shared::error::ApiError;
use thiserror::Error;

/// History load or pagination failure. Reported once per attempt; the store is left as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("history request failed: {0}")]
    Transport(String),
    #[error("history request returned HTTP {status}")]
    Status { status: u16 },
    #[error("server rejected history request: {0}")]
    Api(ApiError),
    #[error("invalid history response: {0}")]
    Decode(String),
    #[error("history fetch is unavailable")]
    Unavailable,
}

/// A locally sent message never reached the server. The optimistic row stays in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("send request failed: {0}")]
    Transport(String),
    #[error("send request returned HTTP {status}")]
    Status { status: u16 },
    #[error("server rejected message: {0}")]
    Api(ApiError),
    #[error("invalid send response: {0}")]
    Decode(String),
    #[error("message sending is unavailable")]
    Unavailable,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<reqwest::Error> for SendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl SendError {
    /// Whether resending the same row could succeed without user changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::Api(err) => err.is_retryable(),
            Self::Decode(_) | Self::Unavailable => false,
        }
    }
}
