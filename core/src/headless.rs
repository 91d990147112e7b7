//! Headless assistant runner: run one prompt through a coding-assistant CLI and return its final reply.
//! No IM or HTTP here; the IM worker calls a runner once per request.
//! Each supported tool lives in headless::runners (e.g. runners::claude).

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod runners;

pub use runners::claude::ClaudeRunner;

/// Wall-clock limit for one assistant run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(300);

/// One assistant invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub prompt: String,
    /// Working directory chosen by the repository router.
    pub cwd: PathBuf,
    pub max_turns: u32,
    /// Assistant session to continue.
    pub resume: Option<String>,
    pub model: Option<String>,
    pub mcp_config: Option<PathBuf>,
}

/// Final reply of a run, already shaped for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub text: String,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    /// The run stopped at the turn limit; `text` carries a continuation note.
    pub incomplete: bool,
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("assistant executable `{0}` not found")]
    NotFound(String),

    #[error("failed to start assistant: {0}")]
    Spawn(String),

    #[error("working directory {} does not exist", .0.display())]
    WorkingDir(PathBuf),

    #[error("assistant timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("assistant exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("assistant reported an error: {0}")]
    Assistant(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Message shown to the user in the requesting thread.
    pub fn user_message(&self) -> String {
        match self {
            RunnerError::Timeout(_) => {
                "⏱️ Task timed out. Try breaking it into smaller parts or being more specific.".to_string()
            }
            RunnerError::WorkingDir(path) => {
                format!("Working directory issue. Please check {} exists.", path.display())
            }
            RunnerError::NotFound(bin) => format!(
                "The assistant CLI `{}` is not installed or not on PATH on the bot host.",
                bin
            ),
            RunnerError::Failed { stderr, .. } if looks_like_parse_error(stderr) => {
                "⚠️ Claude encountered a parsing error with complex output. This often happens with very \
                 large responses. Try:\n\n• Breaking your request into smaller parts\n• Being more specific \
                 about what you want\n• Using a simpler query format"
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

fn looks_like_parse_error(stderr: &str) -> bool {
    let lowered = stderr.to_lowercase();
    lowered.contains("json") && (lowered.contains("parse") || lowered.contains("decode"))
}

/// A coding-assistant CLI that can serve one request at a time per call.
#[async_trait]
pub trait AssistantRunner: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunnerError>;
}
