//! Error types shared by the relay: fatal configuration errors and per-request collaborator errors.
//! Collaborator errors are reported back to the requesting thread as text; configuration errors stop startup.

use thiserror::Error;

/// Configuration problems found at startup. Every problem is collected so the operator sees all of them at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{name} must be a positive integer (got {value:?})")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ConfigError>),
}

/// Errors from talking to Slack, the assistant CLI, GitHub, or the filesystem while serving one request.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Slack API error: {0}")]
    Slack(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limited: retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BridgeError::Network(format!("request timed out: {}", err))
        } else if err.is_connect() {
            BridgeError::Network(format!("connection failed: {}", err))
        } else {
            BridgeError::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        BridgeError::WebSocket(err.to_string())
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Map a Slack `error` code from a `{"ok": false}` response to a typed error.
pub fn slack_api_error(code: &str) -> BridgeError {
    match code {
        "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" => {
            BridgeError::Auth(code.to_string())
        }
        "ratelimited" | "rate_limited" => BridgeError::RateLimited { retry_after_secs: 30 },
        other => BridgeError::Slack(other.to_string()),
    }
}
