//! Conversation contexts: one per chat thread, in memory only (gone when the process restarts).
//! Holds the turn count, the repository the last run used, and the assistant session id for `--resume`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Identifies a conversation. Threaded messages key on (channel, thread_ts); unthreaded input such as
/// slash commands keys on (channel, user) so each user keeps their own context in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(channel: &str, thread_ts: Option<&str>, user: &str) -> Self {
        match thread_ts {
            Some(ts) => Self(format!("{}:{}", channel, ts)),
            None => Self(format!("{}:user:{}", channel, user)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub key: ConversationKey,
    pub turn_count: u32,
    pub repo_path: PathBuf,
    /// Assistant session id from the latest run; passed back as `--resume`.
    pub assistant_session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

/// Per-thread conversation registry. Each entry is only touched by the request currently holding that
/// conversation's busy slot, so plain map operations are enough.
#[derive(Debug, Default)]
pub struct ConversationStore {
    contexts: DashMap<ConversationKey, ConversationContext>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ConversationKey) -> Option<ConversationContext> {
        self.contexts.get(key).map(|e| e.value().clone())
    }

    /// Record the start of a turn: create the context on first use, otherwise bump the turn count and
    /// switch to `repo_path`. Returns the updated context.
    pub fn begin_turn(&self, key: &ConversationKey, repo_path: &Path) -> ConversationContext {
        let now = Utc::now();
        let mut entry = self
            .contexts
            .entry(key.clone())
            .or_insert_with(|| ConversationContext {
                key: key.clone(),
                turn_count: 0,
                repo_path: repo_path.to_path_buf(),
                assistant_session_id: None,
                created_at: now,
                last_active_at: now,
            });
        let ctx = entry.value_mut();
        if ctx.repo_path != repo_path {
            // An assistant session is tied to its working directory.
            ctx.assistant_session_id = None;
            ctx.repo_path = repo_path.to_path_buf();
        }
        ctx.turn_count += 1;
        ctx.last_active_at = now;
        ctx.clone()
    }

    /// Store the assistant session id returned by the latest run. `None` keeps the previous id.
    pub fn record_session(&self, key: &ConversationKey, session_id: Option<String>) {
        if let (Some(sid), Some(mut ctx)) = (session_id, self.contexts.get_mut(key)) {
            ctx.assistant_session_id = Some(sid);
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
