use thiserror::Error;

/// Failures surfaced by the session controller and its collaborators.
///
/// `Configuration` and `Validation` block the operation and leave all state
/// untouched. `Remote` and `Network` happen mid-exchange and end up as an
/// assistant turn in the transcript.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    /// Non-2xx status or an unreadable body from the completion endpoint.
    #[error("{0}")]
    Remote(String),

    /// Connection refused, DNS failure, timeout.
    #[error("{0}")]
    Network(String),

    #[error("settings storage: {0}")]
    Storage(String),
}

impl ChatError {
    pub fn missing_api_key() -> Self {
        Self::Configuration("Please set your API key in settings first.".to_string())
    }

    pub fn empty_api_key() -> Self {
        Self::Validation("Please enter a valid API key.".to_string())
    }

    /// Errors that are converted into a synthetic assistant turn.
    pub fn is_exchange_failure(&self) -> bool {
        matches!(self, Self::Remote(_) | Self::Network(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Remote(format!("Malformed response: {}", err))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;
