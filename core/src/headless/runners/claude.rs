//! Claude CLI headless runner: run a prompt via `claude -p "..." --output-format stream-json --verbose`
//! and fold the NDJSON stream into one reply.
//! Reads `assistant` messages (text blocks) and the closing `result` message (session id, cost, error flag).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

use crate::headless::{AssistantRunner, RunOutcome, RunRequest, RunnerError, RUN_TIMEOUT};
use crate::im::log::truncate_content;

/// Results shorter than this (chars) after a turn-limit stop are replaced by the collected assistant text.
const MIN_RESULT_LEN: usize = 50;
const STDERR_TAIL: usize = 400;

pub const INCOMPLETE_NOTE: &str = "⚠️ *Analysis incomplete* - Hit maximum turn limit. The task was complex and may need \
continuation. Use the same command again to continue the analysis, or try breaking it into smaller parts.";
pub const INTERRUPTED_NOTE: &str = "⚠️ *Task interrupted* - The analysis hit the maximum turn limit before completion. \
Try breaking the request into smaller, more specific parts or use a more focused query.";

/// One line of `--output-format stream-json`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamMessage {
    System {
        #[serde(default)]
        session_id: Option<String>,
    },
    Assistant {
        message: AssistantMessage,
    },
    Result(ResultMessage),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ResultMessage {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    total_cost_usd: Option<f64>,
}

impl ResultMessage {
    fn hit_turn_limit(&self) -> bool {
        self.subtype.as_deref() == Some("error_max_turns")
    }
}

/// Accumulates a stream-json run line by line.
#[derive(Debug, Default)]
pub struct StreamCollector {
    assistant_texts: Vec<String>,
    /// Lines that are not stream-json (older CLIs, plain-text output).
    raw: Vec<String>,
    session_id: Option<String>,
    result: Option<ResultMessage>,
}

impl StreamCollector {
    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<StreamMessage>(line) {
            Ok(StreamMessage::System { session_id }) => {
                if session_id.is_some() {
                    self.session_id = session_id;
                }
            }
            Ok(StreamMessage::Assistant { message }) => {
                for block in message.content {
                    if let ContentBlock::Text { text } = block {
                        if !text.trim().is_empty() {
                            self.assistant_texts.push(text);
                        }
                    }
                }
            }
            Ok(StreamMessage::Result(result)) => {
                if result.session_id.is_some() {
                    self.session_id = result.session_id.clone();
                }
                self.result = Some(result);
            }
            Ok(StreamMessage::Other) => {}
            Err(e) => {
                if serde_json::from_str::<serde_json::Value>(line).is_err() {
                    self.raw.push(line.to_string());
                } else {
                    debug!(error = %e, line = %truncate_content(line, 200), "[claude] unrecognized stream line");
                }
            }
        }
    }

    /// Fold the stream into the reply. `exited_ok` is the process exit status; `stderr` its error output.
    pub fn finish(self, exited_ok: bool, status: &str, stderr: &str) -> Result<RunOutcome, RunnerError> {
        let joined = self.assistant_texts.join("\n\n");
        let Some(result) = self.result else {
            if !exited_ok {
                return Err(RunnerError::Failed {
                    status: status.to_string(),
                    stderr: stderr_tail(stderr),
                });
            }
            let text = if !joined.is_empty() {
                joined
            } else {
                self.raw.join("\n")
            };
            return Ok(RunOutcome {
                text: text.trim().to_string(),
                session_id: self.session_id,
                cost_usd: None,
                incomplete: false,
            });
        };

        if result.is_error && !result.hit_turn_limit() {
            let message = result
                .result
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| result.subtype.unwrap_or_else(|| "unknown error".into()));
            return Err(RunnerError::Assistant(message));
        }

        let final_text = result.result.clone().unwrap_or_default();
        let (text, incomplete) = if result.hit_turn_limit() && final_text.trim().chars().count() < MIN_RESULT_LEN {
            if joined.is_empty() {
                (INTERRUPTED_NOTE.to_string(), true)
            } else {
                (format!("{}\n\n{}", joined, INCOMPLETE_NOTE), true)
            }
        } else if final_text.trim().is_empty() {
            (joined, false)
        } else {
            (final_text, false)
        };

        Ok(RunOutcome {
            text: text.trim().to_string(),
            session_id: self.session_id,
            cost_usd: result.total_cost_usd,
            incomplete,
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_TAIL).collect()
}

/// Runs the `claude` executable (or whatever `CLAUDE_BIN` names).
#[derive(Debug, Clone)]
pub struct ClaudeRunner {
    bin: String,
    timeout: Duration,
}

impl Default for ClaudeRunner {
    fn default() -> Self {
        Self::new("claude")
    }
}

impl ClaudeRunner {
    pub fn new(bin: impl Into<String>) -> Self {
        Self {
            bin: bin.into(),
            timeout: RUN_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn args(request: &RunRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            request.max_turns.to_string(),
        ];
        if let Some(model) = &request.model {
            args.extend(["--model".to_string(), model.clone()]);
        }
        if let Some(session) = &request.resume {
            args.extend(["--resume".to_string(), session.clone()]);
        }
        if let Some(mcp) = &request.mcp_config {
            args.extend(["--mcp-config".to_string(), mcp.display().to_string()]);
        }
        args
    }

    /// `claude --version`, used by the self-test.
    pub async fn version(&self) -> Result<String, RunnerError> {
        let output = TokioCommand::new(&self.bin)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error(&self.bin, e))?;
        if !output.status.success() {
            return Err(RunnerError::Failed {
                status: output.status.to_string(),
                stderr: stderr_tail(&String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

fn spawn_error(bin: &str, e: std::io::Error) -> RunnerError {
    if e.kind() == std::io::ErrorKind::NotFound {
        RunnerError::NotFound(bin.to_string())
    } else {
        RunnerError::Spawn(e.to_string())
    }
}

#[async_trait::async_trait]
impl AssistantRunner for ClaudeRunner {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunnerError> {
        if !request.cwd.is_dir() {
            return Err(RunnerError::WorkingDir(PathBuf::from(&request.cwd)));
        }
        info!(
            cwd = %request.cwd.display(),
            max_turns = request.max_turns,
            resume = request.resume.as_deref().unwrap_or("-"),
            prompt = %truncate_content(&request.prompt, 100),
            "[claude] run"
        );

        let mut child = TokioCommand::new(&self.bin)
            .args(Self::args(request))
            .current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.bin, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Spawn("claude stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::Spawn("claude stderr not captured".into()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut collector = StreamCollector::default();
        let run = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                collector.feed_line(&line);
            }
            child.wait().await
        };
        let status = match tokio::time::timeout(self.timeout, run).await {
            Ok(status) => status?,
            Err(_) => {
                let _ = child.kill().await;
                warn!(cwd = %request.cwd.display(), timeout_secs = self.timeout.as_secs(), "[claude] run timed out");
                return Err(RunnerError::Timeout(self.timeout));
            }
        };
        let stderr = stderr_task.await.unwrap_or_default();

        let outcome = collector.finish(status.success(), &status.to_string(), &stderr)?;
        info!(
            cwd = %request.cwd.display(),
            session_id = outcome.session_id.as_deref().unwrap_or("-"),
            cost_usd = outcome.cost_usd.unwrap_or(0.0),
            incomplete = outcome.incomplete,
            reply_len = outcome.text.chars().count(),
            "[claude] done"
        );
        Ok(outcome)
    }
}
