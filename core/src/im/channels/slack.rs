//! Slack IM: Web API client, the outbound transport, and the Socket Mode receiver.
//! All Slack HTTP and WebSocket traffic is confined here. Inbound frames are acknowledged first, then
//! converted to worker requests; replies go out through the per-channel daemon (OutboundHub).

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::slack_events::{inbound_from_envelope, SocketModeAck, SocketModeEnvelope};
use crate::config::Config;
use crate::error::{slack_api_error, BridgeError, BridgeResult};
use crate::github::GitHubClient;
use crate::headless::AssistantRunner;
use crate::im::daemon::OutboundHub;
use crate::im::formatter::FileAttachment;
use crate::im::log::{thread_field, truncate_content_default};
use crate::im::transport::{ImChannelCapabilities, ImTransport, ReplyTarget, SendError};
use crate::im::worker::{InboundRequest, Worker};

pub const SLACK_API_BASE: &str = "https://slack.com/api";
/// Slack truncates `text` beyond this many characters.
pub const SLACK_MAX_MESSAGE_LEN: usize = 40_000;
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(300);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const INBOUND_QUEUE_DEPTH: usize = 64;

/// Identity returned by `auth.test`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthInfo {
    pub user_id: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

enum ApiBody<'a> {
    Json(&'a serde_json::Value),
    Form(&'a [(&'a str, String)]),
}

pub struct SlackClient {
    http: reqwest::Client,
    bot_token: SecretString,
    app_token: SecretString,
    base_url: String,
}

impl SlackClient {
    pub fn new(bot_token: &str, app_token: &str) -> BridgeResult<Self> {
        Self::with_base_url(bot_token, app_token, SLACK_API_BASE)
    }

    /// Client against another API root (a mock server in tests).
    pub fn with_base_url(bot_token: &str, app_token: &str, base_url: &str) -> BridgeResult<Self> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            bot_token: SecretString::from(bot_token.to_string()),
            app_token: SecretString::from(app_token.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> BridgeResult<Self> {
        Self::new(config.slack_bot_token(), config.slack_app_token())
    }

    async fn call(&self, method: &str, token: &SecretString, body: ApiBody<'_>) -> BridgeResult<serde_json::Value> {
        let url = format!("{}/{}", self.base_url, method);
        let request = self.http.post(&url).bearer_auth(token.expose_secret());
        let request = match body {
            ApiBody::Json(v) => request.json(v),
            ApiBody::Form(fields) => request.form(fields),
        };
        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(30);
            return Err(BridgeError::RateLimited { retry_after_secs });
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Slack(format!("{} {}: {}", method, status, body)));
        }

        let json: serde_json::Value = response.json().await?;
        if json.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            let code = json.get("error").and_then(|e| e.as_str()).unwrap_or("unknown");
            return Err(slack_api_error(code));
        }
        Ok(json)
    }

    pub async fn auth_test(&self) -> BridgeResult<AuthInfo> {
        let json = self
            .call("auth.test", &self.bot_token, ApiBody::Json(&serde_json::json!({})))
            .await?;
        Ok(serde_json::from_value(json)?)
    }

    /// `chat.postMessage`; returns the message ts.
    pub async fn post_message(&self, channel: &str, thread_ts: Option<&str>, text: &str) -> BridgeResult<String> {
        let mut payload = serde_json::json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            payload["thread_ts"] = serde_json::json!(ts);
        }
        let json = self
            .call("chat.postMessage", &self.bot_token, ApiBody::Json(&payload))
            .await?;
        json.get("ts")
            .and_then(|ts| ts.as_str())
            .map(str::to_string)
            .ok_or_else(|| BridgeError::InvalidPayload("chat.postMessage: missing ts".into()))
    }

    /// External upload flow: reserve an upload URL, send the bytes, then share the file into the channel.
    pub async fn upload_file(&self, channel: &str, thread_ts: Option<&str>, file: &FileAttachment) -> BridgeResult<String> {
        let bytes = file.content.as_bytes().to_vec();
        let reserve = [
            ("filename", file.filename.clone()),
            ("length", bytes.len().to_string()),
        ];
        let json = self
            .call("files.getUploadURLExternal", &self.bot_token, ApiBody::Form(&reserve))
            .await?;
        let upload_url = json
            .get("upload_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BridgeError::InvalidPayload("files.getUploadURLExternal: missing upload_url".into()))?;
        let file_id = json
            .get("file_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| BridgeError::InvalidPayload("files.getUploadURLExternal: missing file_id".into()))?
            .to_string();

        let response = self.http.post(upload_url).body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(BridgeError::Slack(format!("file upload returned {}", response.status())));
        }

        let files = serde_json::json!([{ "id": file_id, "title": file.title }]);
        let mut complete = vec![("files", files.to_string()), ("channel_id", channel.to_string())];
        if let Some(ts) = thread_ts {
            complete.push(("thread_ts", ts.to_string()));
        }
        self.call("files.completeUploadExternal", &self.bot_token, ApiBody::Form(&complete))
            .await?;
        Ok(file_id)
    }

    /// `users.setPresence` ("auto" or "away").
    pub async fn set_presence(&self, presence: &str) -> BridgeResult<()> {
        let fields = [("presence", presence.to_string())];
        self.call("users.setPresence", &self.bot_token, ApiBody::Form(&fields))
            .await?;
        Ok(())
    }

    /// `apps.connections.open` (app-level token); returns the Socket Mode WebSocket URL.
    pub async fn open_socket_url(&self) -> BridgeResult<String> {
        let json = self
            .call("apps.connections.open", &self.app_token, ApiBody::Form(&[]))
            .await?;
        json.get("url")
            .and_then(|u| u.as_str())
            .map(str::to_string)
            .ok_or_else(|| BridgeError::InvalidPayload("apps.connections.open: missing url".into()))
    }
}

/// Slack send implementation: posts into `target.channel`, threaded when `target.thread_ts` is set.
pub struct SlackTransport {
    client: Arc<SlackClient>,
    max_message_len: usize,
}

impl SlackTransport {
    pub fn new(client: Arc<SlackClient>, max_message_len: usize) -> Self {
        Self {
            client,
            max_message_len: max_message_len.min(SLACK_MAX_MESSAGE_LEN),
        }
    }
}

#[async_trait::async_trait]
impl ImTransport for SlackTransport {
    fn capabilities(&self) -> ImChannelCapabilities {
        ImChannelCapabilities {
            supports_file_upload: true,
            max_message_len: self.max_message_len,
            channel_id_prefix: "slack",
        }
    }

    async fn send(&self, target: &ReplyTarget, text: &str) -> Result<Option<String>, SendError> {
        let ts = self
            .client
            .post_message(&target.channel, target.thread_ts.as_deref(), text)
            .await?;
        Ok(Some(ts))
    }

    async fn upload_file(&self, target: &ReplyTarget, file: &FileAttachment) -> Result<(), SendError> {
        self.client
            .upload_file(&target.channel, target.thread_ts.as_deref(), file)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SocketModeOptions {
    pub reconnect_delay: Duration,
    pub ping_interval: Duration,
}

impl Default for SocketModeOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            ping_interval: Duration::from_secs(30),
        }
    }
}

/// Socket Mode receiver: (re)connects until `shutdown` is cancelled and pushes requests to `inbound_tx`.
/// Returns early only on authentication failures.
pub async fn run_socket_mode(
    client: Arc<SlackClient>,
    bot_user_id: Option<String>,
    inbound_tx: mpsc::Sender<InboundRequest>,
    options: SocketModeOptions,
    shutdown: CancellationToken,
) -> BridgeResult<()> {
    while !shutdown.is_cancelled() {
        let result = match client.open_socket_url().await {
            Ok(url) => connect_and_run(&url, bot_user_id.as_deref(), &inbound_tx, &options, &shutdown).await,
            Err(e @ BridgeError::Auth(_)) => return Err(e),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => {
                if !shutdown.is_cancelled() {
                    info!("[slack] socket closed, reconnecting");
                }
            }
            Err(e) => {
                error!(error = %e, delay_secs = options.reconnect_delay.as_secs(), "[slack] socket error, reconnecting");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(options.reconnect_delay) => {}
                }
            }
        }
    }
    info!("[slack] socket mode stopped");
    Ok(())
}

async fn connect_and_run(
    url: &str,
    bot_user_id: Option<&str>,
    inbound_tx: &mpsc::Sender<InboundRequest>,
    options: &SocketModeOptions,
    shutdown: &CancellationToken,
) -> BridgeResult<()> {
    let (ws, _) = connect_async(url).await?;
    let (mut write, mut read) = ws.split();
    info!("[slack] socket connected");

    let (out_tx, mut out_rx) = mpsc::channel::<WsMessage>(100);
    let write_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = write.send(msg).await {
                error!(error = %e, "[slack] websocket write failed");
                break;
            }
        }
    });
    let ping_tx = out_tx.clone();
    let ping_interval = options.ping_interval;
    let ping_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ping_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if ping_tx.send(WsMessage::Ping(Vec::new())).await.is_err() {
                break;
            }
        }
    });

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = out_tx.send(WsMessage::Close(None)).await;
                break Ok(());
            }
            frame = read.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    if !handle_frame(&text, bot_user_id, &out_tx, inbound_tx).await {
                        break Ok(());
                    }
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = out_tx.send(WsMessage::Pong(data)).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(BridgeError::from(e)),
            }
        }
    };

    ping_task.abort();
    drop(out_tx);
    let _ = write_task.await;
    result
}

/// Acknowledge and dispatch one frame. Returns false when Slack asked us to reconnect.
async fn handle_frame(
    text: &str,
    bot_user_id: Option<&str>,
    out_tx: &mpsc::Sender<WsMessage>,
    inbound_tx: &mpsc::Sender<InboundRequest>,
) -> bool {
    let envelope: SocketModeEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, content = %truncate_content_default(text), "[slack] unparsed frame");
            return true;
        }
    };

    if let Some(id) = &envelope.envelope_id {
        match serde_json::to_string(&SocketModeAck::new(id)) {
            Ok(ack) => {
                let _ = out_tx.send(WsMessage::Text(ack)).await;
            }
            Err(e) => warn!(error = %e, envelope_id = %id, "[slack] ack serialization failed"),
        }
    }

    match envelope.envelope_type.as_str() {
        "hello" => {
            info!("[slack] socket mode ready");
            return true;
        }
        "disconnect" => {
            info!(reason = envelope.reason.as_deref().unwrap_or("-"), "[slack] disconnect requested");
            return false;
        }
        _ => {}
    }

    match inbound_from_envelope(&envelope, bot_user_id) {
        Some(request) => {
            info!(
                channel = %request.channel,
                thread = thread_field(request.thread_ts.as_deref()),
                user = %request.user,
                source = ?request.source,
                direction = "incoming",
                content = %truncate_content_default(&request.text),
                "[slack] request"
            );
            if inbound_tx.send(request).await.is_err() {
                warn!("[slack] worker queue closed");
            }
        }
        None => debug!(envelope_type = %envelope.envelope_type, "[slack] frame ignored"),
    }
    true
}

/// Set presence to "auto" now and every `every` until shutdown.
pub async fn keep_presence(client: Arc<SlackClient>, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => match client.set_presence("auto").await {
                Ok(()) => debug!("[slack] presence set to auto"),
                Err(e) => warn!(error = %e, "[slack] presence update failed"),
            }
        }
    }
}

/// Run the Slack bot: check auth, spawn the outbound daemon, worker and presence keeper, then run the
/// Socket Mode receiver until `shutdown` is cancelled.
pub async fn run_slack_bot(
    config: Arc<Config>,
    runner: Arc<dyn AssistantRunner>,
    shutdown: CancellationToken,
) -> BridgeResult<()> {
    let client = Arc::new(SlackClient::from_config(&config)?);
    let auth = client.auth_test().await?;
    info!(
        bot_user_id = %auth.user_id,
        bot = auth.user.as_deref().unwrap_or("-"),
        team = auth.team.as_deref().unwrap_or("-"),
        "[slack] authenticated"
    );

    let github = match config.github_token() {
        Some(token) => match GitHubClient::new(token) {
            Ok(client) => {
                info!("[github] integration enabled");
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "[github] client unavailable, pull requests will not be opened");
                None
            }
        },
        None => {
            warn!("[github] GITHUB_TOKEN not set, pull requests will not be opened");
            None
        }
    };

    let transport = Arc::new(SlackTransport::new(Arc::clone(&client), config.max_message_length));
    let outbound = OutboundHub::new(transport);
    let worker = Worker::new(Arc::clone(&config), runner, github, outbound);

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    tokio::spawn(Arc::clone(&worker).run(inbound_rx));
    tokio::spawn(keep_presence(Arc::clone(&client), PRESENCE_INTERVAL, shutdown.clone()));

    info!(commands = "/code, /feature, /review, /pr", "[slack] bot running");
    run_socket_mode(client, Some(auth.user_id), inbound_tx, SocketModeOptions::default(), shutdown).await
}
