//! IM log helpers. Events are logged through `tracing` with key=value fields:
//! `channel=... thread=... direction=incoming|send|upload|worker_error content=...`.
//! Message bodies are truncated before they reach the log.

use std::borrow::Cow;

const CONTENT_LOG_MAX_LEN: usize = 120;

/// Truncate message content for logging to at most `max_chars` characters (avoid huge dumps).
pub fn truncate_content(content: &str, max_chars: usize) -> Cow<'_, str> {
    match content.char_indices().nth(max_chars) {
        None => Cow::Borrowed(content),
        Some((cut, _)) => Cow::Owned(format!("{}... ({} bytes)", &content[..cut], content.len())),
    }
}

#[inline]
pub fn truncate_content_default(content: &str) -> Cow<'_, str> {
    truncate_content(content, CONTENT_LOG_MAX_LEN)
}

/// Thread field for log lines ("-" when the message is not threaded).
#[inline]
pub fn thread_field(thread_ts: Option<&str>) -> &str {
    thread_ts.unwrap_or("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_borrowed() {
        assert!(matches!(truncate_content("hello", 10), Cow::Borrowed("hello")));
    }

    #[test]
    fn long_content_is_cut_on_char_boundary() {
        let s = "héllo wörld";
        let out = truncate_content(s, 3);
        assert_eq!(out, format!("hél... ({} bytes)", s.len()));
    }
}
