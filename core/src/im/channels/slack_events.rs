//! Slack Socket Mode payloads: envelopes, Events API events and slash commands, and their conversion to
//! worker requests. Pure parsing; nothing here talks to the network.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::im::commands::SlashCommand;
use crate::im::worker::{InboundRequest, RequestSource};

/// Socket Mode envelope wrapping every inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketModeEnvelope {
    /// Absent on `hello` and `disconnect` frames.
    #[serde(default)]
    pub envelope_id: Option<String>,
    #[serde(rename = "type")]
    pub envelope_type: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Reason on `disconnect` frames (e.g. "refresh_requested").
    #[serde(default)]
    pub reason: Option<String>,
}

/// Acknowledgement written back for every envelope that has an id.
#[derive(Debug, Clone, Serialize)]
pub struct SocketModeAck {
    pub envelope_id: String,
}

impl SocketModeAck {
    pub fn new(envelope_id: impl Into<String>) -> Self {
        Self {
            envelope_id: envelope_id.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppMentionEvent {
    pub user: String,
    #[serde(default)]
    pub text: String,
    pub channel: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub channel: String,
    #[serde(default)]
    pub channel_type: Option<String>,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    /// Set for edits, deletions, joins, bot posts, etc.
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MessageEvent {
    pub fn is_direct_message(&self) -> bool {
        self.channel_type.as_deref() == Some("im") || self.channel.starts_with('D')
    }

    pub fn is_bot_message(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    AppMention(AppMentionEvent),
    Message(MessageEvent),
    #[serde(other)]
    Unknown,
}

/// `events_api` payload (event callback).
#[derive(Debug, Clone, Deserialize)]
pub struct EventCallback {
    pub event: SlackEvent,
}

/// `slash_commands` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SlashCommandPayload {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
}

static ANY_MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<@[A-Z0-9]+(?:\|[^>]*)?>").expect("valid regex"));

/// Remove the bot's own mention(s) from message text. Without a known bot id, every user mention is removed.
pub fn strip_bot_mention(text: &str, bot_user_id: Option<&str>) -> String {
    let stripped = match bot_user_id {
        Some(id) => {
            let own = format!("<@{}>", id);
            let own_named = format!("<@{}|", id);
            ANY_MENTION
                .replace_all(text, |caps: &regex::Captures| {
                    let m = &caps[0];
                    if m == own || m.starts_with(&own_named) {
                        String::new()
                    } else {
                        m.to_string()
                    }
                })
                .into_owned()
        }
        None => ANY_MENTION.replace_all(text, "").into_owned(),
    };
    stripped.trim().to_string()
}

fn mentions(text: &str, bot_user_id: &str) -> bool {
    text.contains(&format!("<@{}>", bot_user_id)) || text.contains(&format!("<@{}|", bot_user_id))
}

/// Convert one envelope into a worker request. None for frames the relay does not act on.
pub fn inbound_from_envelope(envelope: &SocketModeEnvelope, bot_user_id: Option<&str>) -> Option<InboundRequest> {
    let payload = envelope.payload.as_ref()?;
    match envelope.envelope_type.as_str() {
        "events_api" => {
            let callback: EventCallback = match serde_json::from_value(payload.clone()) {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "[slack] unparsed events_api payload");
                    return None;
                }
            };
            from_event(callback.event, bot_user_id)
        }
        "slash_commands" => {
            let cmd: SlashCommandPayload = match serde_json::from_value(payload.clone()) {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "[slack] unparsed slash command payload");
                    return None;
                }
            };
            let source = match SlashCommand::parse(&cmd.command) {
                Some(c) => RequestSource::Slash(c),
                None => RequestSource::UnknownSlash(cmd.command.clone()),
            };
            Some(InboundRequest {
                source,
                user: cmd.user_id,
                channel: cmd.channel_id,
                thread_ts: None,
                text: cmd.text.trim().to_string(),
            })
        }
        _ => None,
    }
}

fn from_event(event: SlackEvent, bot_user_id: Option<&str>) -> Option<InboundRequest> {
    match event {
        SlackEvent::AppMention(ev) => {
            if ev.bot_id.is_some() || Some(ev.user.as_str()) == bot_user_id {
                return None;
            }
            // Mentions are answered in a thread under the mention.
            let thread_ts = ev.thread_ts.clone().or_else(|| Some(ev.ts.clone()));
            Some(InboundRequest {
                source: RequestSource::Mention,
                text: strip_bot_mention(&ev.text, bot_user_id),
                user: ev.user,
                channel: ev.channel,
                thread_ts,
            })
        }
        SlackEvent::Message(ev) => {
            if ev.is_bot_message() || ev.subtype.is_some() {
                return None;
            }
            let user = ev.user.clone()?;
            if Some(user.as_str()) == bot_user_id {
                return None;
            }
            // A channel message that mentions the bot also arrives as app_mention.
            if let Some(bot) = bot_user_id {
                if !ev.is_direct_message() && mentions(&ev.text, bot) {
                    return None;
                }
            }
            let source = if ev.is_direct_message() {
                RequestSource::DirectMessage
            } else if ev.thread_ts.is_some() {
                RequestSource::ThreadReply
            } else {
                return None;
            };
            Some(InboundRequest {
                source,
                text: strip_bot_mention(&ev.text, bot_user_id),
                user,
                channel: ev.channel,
                thread_ts: ev.thread_ts,
            })
        }
        SlackEvent::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: Option<&str> = Some("UBOT");

    fn envelope(json: serde_json::Value) -> SocketModeEnvelope {
        serde_json::from_value(json).unwrap()
    }

    fn events_api(event: serde_json::Value) -> SocketModeEnvelope {
        envelope(serde_json::json!({
            "envelope_id": "env-1",
            "type": "events_api",
            "payload": {"team_id": "T1", "event_id": "Ev1", "type": "event_callback", "event": event}
        }))
    }

    #[test]
    fn strips_only_the_bot_mention() {
        assert_eq!(strip_bot_mention("<@UBOT> fix the frontend", BOT), "fix the frontend");
        assert_eq!(strip_bot_mention("<@UBOT|claude>   ask <@U2> why", BOT), "ask <@U2> why");
        assert_eq!(strip_bot_mention("<@U1> <@U2> check this", None), "check this");
        assert_eq!(strip_bot_mention("<@UBOT>", BOT), "");
    }

    #[test]
    fn app_mention_replies_in_a_thread_under_the_mention() {
        let env = events_api(serde_json::json!({
            "type": "app_mention", "user": "U1", "text": "<@UBOT> fix the frontend login bug",
            "channel": "C1", "ts": "100.1"
        }));
        let req = inbound_from_envelope(&env, BOT).unwrap();
        assert_eq!(req.source, RequestSource::Mention);
        assert_eq!(req.text, "fix the frontend login bug");
        assert_eq!(req.channel, "C1");
        assert_eq!(req.thread_ts.as_deref(), Some("100.1"));
    }

    #[test]
    fn mention_inside_a_thread_keeps_the_thread() {
        let env = events_api(serde_json::json!({
            "type": "app_mention", "user": "U1", "text": "<@UBOT> and tests?",
            "channel": "C1", "ts": "100.5", "thread_ts": "100.1"
        }));
        assert_eq!(inbound_from_envelope(&env, BOT).unwrap().thread_ts.as_deref(), Some("100.1"));
    }

    #[test]
    fn direct_message_is_a_request() {
        let env = events_api(serde_json::json!({
            "type": "message", "user": "U1", "text": "help", "channel": "D1",
            "channel_type": "im", "ts": "5.0"
        }));
        let req = inbound_from_envelope(&env, BOT).unwrap();
        assert_eq!(req.source, RequestSource::DirectMessage);
        assert!(req.thread_ts.is_none());
    }

    #[test]
    fn bot_and_edited_messages_are_ignored() {
        let bot = events_api(serde_json::json!({
            "type": "message", "bot_id": "B1", "subtype": "bot_message", "text": "hi",
            "channel": "D1", "channel_type": "im", "ts": "1.0"
        }));
        assert!(inbound_from_envelope(&bot, BOT).is_none());

        let own = events_api(serde_json::json!({
            "type": "message", "user": "UBOT", "text": "✅ done", "channel": "D1",
            "channel_type": "im", "ts": "1.0"
        }));
        assert!(inbound_from_envelope(&own, BOT).is_none());

        let edited = events_api(serde_json::json!({
            "type": "message", "subtype": "message_changed", "channel": "D1",
            "channel_type": "im", "ts": "1.0"
        }));
        assert!(inbound_from_envelope(&edited, BOT).is_none());
    }

    #[test]
    fn channel_messages_only_count_as_thread_replies() {
        let top_level = events_api(serde_json::json!({
            "type": "message", "user": "U1", "text": "lunch?", "channel": "C1",
            "channel_type": "channel", "ts": "1.0"
        }));
        assert!(inbound_from_envelope(&top_level, BOT).is_none());

        let reply = events_api(serde_json::json!({
            "type": "message", "user": "U1", "text": "also the backend", "channel": "C1",
            "channel_type": "channel", "ts": "2.0", "thread_ts": "1.0"
        }));
        assert_eq!(inbound_from_envelope(&reply, BOT).unwrap().source, RequestSource::ThreadReply);

        let mention_echo = events_api(serde_json::json!({
            "type": "message", "user": "U1", "text": "<@UBOT> again", "channel": "C1",
            "channel_type": "channel", "ts": "3.0", "thread_ts": "1.0"
        }));
        assert!(inbound_from_envelope(&mention_echo, BOT).is_none());
    }

    #[test]
    fn slash_commands_parse_known_and_unknown() {
        let env = envelope(serde_json::json!({
            "envelope_id": "env-2",
            "type": "slash_commands",
            "payload": {"command": "/review", "text": " src/components/ ", "channel_id": "C1",
                        "user_id": "U1", "response_url": "https://hooks.slack.com/x", "trigger_id": "t"}
        }));
        let req = inbound_from_envelope(&env, BOT).unwrap();
        assert_eq!(req.source, RequestSource::Slash(SlashCommand::Review));
        assert_eq!(req.text, "src/components/");
        assert!(req.thread_ts.is_none());

        let env = envelope(serde_json::json!({
            "envelope_id": "env-3",
            "type": "slash_commands",
            "payload": {"command": "/fix", "text": "x", "channel_id": "C1", "user_id": "U1"}
        }));
        assert_eq!(
            inbound_from_envelope(&env, BOT).unwrap().source,
            RequestSource::UnknownSlash("/fix".into())
        );
    }

    #[test]
    fn hello_and_unknown_events_yield_nothing() {
        let hello = envelope(serde_json::json!({"type": "hello", "num_connections": 1}));
        assert!(hello.envelope_id.is_none());
        assert!(inbound_from_envelope(&hello, BOT).is_none());

        let reaction = events_api(serde_json::json!({"type": "reaction_added", "user": "U1"}));
        assert!(inbound_from_envelope(&reaction, BOT).is_none());
    }
}
