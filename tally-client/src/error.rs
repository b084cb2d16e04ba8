use uuid::Uuid;

/// Substrings that mark a failure as transient. Callers use
/// [`is_networking_error`] to decide between "retry later" and
/// "tell the user".
const NETWORK_ERROR_MARKERS: &[&str] = &[
    "Host not found",
    "Cannot upgrade to WebSocket connection",
    "No message received",
    "Connection refused",
    "Connection timed out",
    "connect timed out",
    "SSL connection unexpectedly closed",
    "Network is down",
];

pub fn is_networking_error(message: &str) -> bool {
    NETWORK_ERROR_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    /// Bad input from the caller: empty credentials, missing GUID,
    /// mutating while logged out. Reported synchronously.
    #[error("{0}")]
    UserInput(String),

    /// The server rejected our credentials. The api token must be
    /// cleared and sync workers stopped.
    #[error("Invalid credentials")]
    Unauthorized,

    /// A 4xx push outcome for one entity; it stays dirty until the
    /// user corrects it.
    #[error("{message}")]
    Validation { guid: Uuid, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn user_input(message: impl Into<String>) -> Self {
        Self::UserInput(message.into())
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(message) => is_networking_error(message),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else if err.is_timeout() {
            Self::Network("Connection timed out".into())
        } else if err.is_connect() {
            Self::Network("Connection refused".into())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<time::error::Parse> for EngineError {
    fn from(err: time::error::Parse) -> Self {
        Self::Parse(err.to_string())
    }
}
