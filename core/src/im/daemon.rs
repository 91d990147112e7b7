//! Per-channel outbound: one FIFO queue and one send daemon task per channel.
//! The daemon paces posts (at most one per MIN_INTERVAL) and, after a rate-limit response, waits out
//! the server's Retry-After before the next post. Failed posts are logged and dropped, never resent.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use super::formatter::{split_preserving_fences, Delivery, FileAttachment};
use super::log::{thread_field, truncate_content_default};
use super::transport::{ImChannelCapabilities, ImTransport, ReplyTarget, SendError};

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const QUEUE_DEPTH: usize = 256;

/// Outbound queue item.
#[derive(Debug)]
pub enum OutboundMsg {
    /// One inline message (status lines, errors, help).
    Text(ReplyTarget, String),
    /// A planned reply: its inline messages in order, then its file if any.
    Reply(ReplyTarget, Delivery),
    /// Resolves once every item queued before it on this channel has been processed.
    Flush(String, oneshot::Sender<()>),
}

impl OutboundMsg {
    fn channel(&self) -> &str {
        match self {
            OutboundMsg::Text(t, _) | OutboundMsg::Reply(t, _) => &t.channel,
            OutboundMsg::Flush(channel, _) => channel,
        }
    }
}

enum Op<'a> {
    Post(&'a str),
    Upload(&'a FileAttachment),
}

struct ChannelSendState {
    last_send: Option<Instant>,
    retry_after: Option<Instant>,
}

impl ChannelSendState {
    fn next_slot(&self, now: Instant) -> Option<Instant> {
        let paced = self.last_send.map(|t| t + MIN_INTERVAL);
        [self.retry_after, paced]
            .into_iter()
            .flatten()
            .filter(|t| *t > now)
            .max()
    }
}

/// Post or upload once, after waiting for the channel's next free slot.
async fn perform<T: ImTransport>(
    op: Op<'_>,
    target: &ReplyTarget,
    state: &mut ChannelSendState,
    transport: &Arc<T>,
    caps: &ImChannelCapabilities,
) {
    if let Some(until) = state.next_slot(Instant::now()) {
        tokio::time::sleep_until(until).await;
    }
    let (direction, content, result) = match op {
        Op::Post(text) => ("send", text, transport.send(target, text).await.map(|_| ())),
        Op::Upload(file) => ("upload", file.filename.as_str(), transport.upload_file(target, file).await),
    };
    state.last_send = Some(Instant::now());
    match result {
        Ok(()) => {
            state.retry_after = None;
            debug!(
                channel = %target.channel,
                thread = thread_field(target.thread_ts.as_deref()),
                direction,
                content = %truncate_content_default(content),
                "[{}] delivered",
                caps.channel_id_prefix
            );
        }
        Err(SendError::RateLimited { retry_after_secs }) => {
            state.retry_after = Some(Instant::now() + Duration::from_secs_f64(retry_after_secs.max(0.0)));
            warn!(
                channel = %target.channel,
                thread = thread_field(target.thread_ts.as_deref()),
                direction,
                retry_after_secs,
                content = %truncate_content_default(content),
                "[{}] rate limited, message dropped",
                caps.channel_id_prefix
            );
        }
        Err(SendError::Other(e)) => {
            error!(
                channel = %target.channel,
                thread = thread_field(target.thread_ts.as_deref()),
                direction,
                content = %truncate_content_default(content),
                error = %e,
                "[{}] send failed",
                caps.channel_id_prefix
            );
        }
    }
}

/// One send daemon for a single channel: drains that channel's FIFO queue in order.
async fn run_send_daemon_for_channel<T>(mut rx: mpsc::Receiver<OutboundMsg>, transport: Arc<T>)
where
    T: ImTransport,
{
    let caps = transport.capabilities();
    let mut state = ChannelSendState {
        last_send: None,
        retry_after: None,
    };

    while let Some(msg) = rx.recv().await {
        match msg {
            OutboundMsg::Text(target, text) => {
                perform(Op::Post(&text), &target, &mut state, &transport, &caps).await;
            }
            OutboundMsg::Reply(target, delivery) => {
                for text in delivery.inline_messages() {
                    perform(Op::Post(text), &target, &mut state, &transport, &caps).await;
                }
                if let Delivery::Attachment { file, .. } = &delivery {
                    if caps.supports_file_upload {
                        perform(Op::Upload(file), &target, &mut state, &transport, &caps).await;
                    } else {
                        for chunk in split_preserving_fences(&file.content, caps.max_message_len) {
                            perform(Op::Post(&chunk), &target, &mut state, &transport, &caps).await;
                        }
                    }
                }
            }
            OutboundMsg::Flush(_, done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Routes outbound messages to a per-channel FIFO queue with a dedicated daemon task per channel.
pub struct OutboundHub<T> {
    channels: DashMap<String, mpsc::Sender<OutboundMsg>>,
    transport: Arc<T>,
}

impl<T> OutboundHub<T>
where
    T: ImTransport + 'static,
{
    pub fn new(transport: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            channels: DashMap::new(),
            transport,
        })
    }

    /// Get or create the sender for this channel (creates the queue and spawns its daemon).
    fn sender_for(&self, channel: &str) -> mpsc::Sender<OutboundMsg> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel::<OutboundMsg>(QUEUE_DEPTH);
                tokio::spawn(run_send_daemon_for_channel(rx, Arc::clone(&self.transport)));
                tx
            })
            .clone()
    }

    /// Enqueue an outbound message on its channel's queue.
    pub async fn send(&self, msg: OutboundMsg) {
        let tx = self.sender_for(msg.channel());
        if tx.send(msg).await.is_err() {
            warn!("[{}] outbound queue closed", self.transport.capabilities().channel_id_prefix);
        }
    }

    pub async fn send_text(&self, target: &ReplyTarget, text: impl Into<String>) {
        self.send(OutboundMsg::Text(target.clone(), text.into())).await;
    }

    pub async fn send_reply(&self, target: &ReplyTarget, delivery: Delivery) {
        self.send(OutboundMsg::Reply(target.clone(), delivery)).await;
    }

    /// Wait until everything queued so far on `channel` has been processed.
    pub async fn flush(&self, channel: &str) {
        let (tx, rx) = oneshot::channel();
        self.send(OutboundMsg::Flush(channel.to_string(), tx)).await;
        let _ = rx.await;
    }

    pub fn capabilities(&self) -> ImChannelCapabilities {
        self.transport.capabilities()
    }
}
