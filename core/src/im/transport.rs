//! IM transport abstraction: "post one message" and "upload one file" for the outbound send daemon.
//! Each channel declares its capabilities; the worker plans deliveries from them and the daemon paces sends.

use async_trait::async_trait;

use super::formatter::FileAttachment;

/// Error from posting a message or uploading a file. Rate-limited responses carry the server's delay.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SendError {
    /// API returned 429 or `ratelimited`; the next send waits this many seconds.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },
    /// Other error (network, auth, unknown channel, etc.).
    #[error("{0}")]
    Other(String),
}

impl From<crate::error::BridgeError> for SendError {
    fn from(e: crate::error::BridgeError) -> Self {
        match e {
            crate::error::BridgeError::RateLimited { retry_after_secs } => SendError::RateLimited {
                retry_after_secs: retry_after_secs as f64,
            },
            other => SendError::Other(other.to_string()),
        }
    }
}

/// Where a reply goes: a channel, optionally inside a thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyTarget {
    pub channel: String,
    pub thread_ts: Option<String>,
}

impl ReplyTarget {
    pub fn new(channel: impl Into<String>, thread_ts: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts,
        }
    }
}

/// Channel capabilities, declared once per transport.
#[derive(Clone, Debug)]
pub struct ImChannelCapabilities {
    /// Whether long replies can go out as an uploaded file.
    pub supports_file_upload: bool,
    /// Inline budget for a single message, in chars.
    pub max_message_len: usize,
    /// Prefix for log lines (e.g. "slack").
    pub channel_id_prefix: &'static str,
}

#[async_trait]
pub trait ImTransport: Send + Sync {
    fn capabilities(&self) -> ImChannelCapabilities;

    /// Post `text` to `target`. Returns the message timestamp/id when the channel reports one.
    /// Caller keeps `text` within max_message_len.
    async fn send(&self, target: &ReplyTarget, text: &str) -> Result<Option<String>, SendError>;

    /// Upload `file` into `target`. Only called when capabilities().supports_file_upload.
    async fn upload_file(&self, target: &ReplyTarget, file: &FileAttachment) -> Result<(), SendError>;
}
