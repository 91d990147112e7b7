//! Response formatter: decides how an assistant reply reaches the chat.
//! Short replies go inline as one message; long ones become a fence-safe preview plus an uploaded file,
//! or, on channels without uploads, several messages. No message leaves a ``` block open unless the budget
//! is too small to hold a fence pair at all.
//! All lengths are counted in chars.

use std::sync::LazyLock;

use regex::Regex;

/// Sent instead of an empty reply.
pub const EMPTY_REPLY_PLACEHOLDER: &str = "✅ Done. The assistant returned no text output.";
pub const ATTACHMENT_FILENAME: &str = "claude_response.md";
pub const ATTACHMENT_TITLE: &str = "Full Claude Response";
/// Preview length (chars) shown inline when the full reply is uploaded as a file.
pub const PREVIEW_LEN: usize = 500;
pub const TRUNCATION_NOTICE: &str = "\n\n... (response truncated, see attached file for full output)";
/// Below this budget a preview is a bare first chunk, without the truncation notice.
pub const MIN_BUDGET: usize = 32;

const FENCE: &str = "```";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttachment {
    pub filename: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// One inline message.
    Inline(String),
    /// Inline preview followed by the full text as a file.
    Attachment { preview: String, file: FileAttachment },
    /// Several inline messages, in order.
    Split(Vec<String>),
}

impl Delivery {
    /// Inline messages this delivery posts, in order.
    pub fn inline_messages(&self) -> Vec<&str> {
        match self {
            Delivery::Inline(text) => vec![text.as_str()],
            Delivery::Attachment { preview, .. } => vec![preview.as_str()],
            Delivery::Split(chunks) => chunks.iter().map(String::as_str).collect(),
        }
    }

    /// Replace the uploaded file body (e.g. with the raw Markdown instead of the chat-formatted text).
    pub fn with_file_content(self, content: &str) -> Self {
        match self {
            Delivery::Attachment { preview, file } => Delivery::Attachment {
                preview,
                file: FileAttachment {
                    content: content.to_string(),
                    ..file
                },
            },
            other => other,
        }
    }
}

/// Decide how `text` is delivered under an inline `budget`.
pub fn plan_delivery(text: &str, budget: usize, supports_file_upload: bool) -> Delivery {
    let budget = budget.max(1);
    if text.trim().is_empty() {
        return Delivery::Inline(EMPTY_REPLY_PLACEHOLDER.to_string());
    }
    if char_len(text) <= budget {
        return Delivery::Inline(text.to_string());
    }
    if !supports_file_upload {
        return Delivery::Split(split_preserving_fences(text, budget));
    }

    let notice_len = char_len(TRUNCATION_NOTICE);
    let preview = if budget >= notice_len + MIN_BUDGET {
        let head_budget = PREVIEW_LEN.min(budget - notice_len);
        first_chunk(text, head_budget) + TRUNCATION_NOTICE
    } else {
        first_chunk(text, budget)
    };

    Delivery::Attachment {
        preview,
        file: FileAttachment {
            filename: ATTACHMENT_FILENAME.to_string(),
            title: ATTACHMENT_TITLE.to_string(),
            content: text.to_string(),
        },
    }
}

fn first_chunk(text: &str, budget: usize) -> String {
    split_preserving_fences(text, budget)
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// A source line, or a whole fenced block (opening line, body lines).
enum Unit<'a> {
    Line(&'a str),
    Fence { open: &'a str, body: Vec<&'a str> },
}

impl Unit<'_> {
    fn render(&self) -> String {
        match self {
            Unit::Line(line) => line.to_string(),
            Unit::Fence { open, body } => render_fence(open, &body.join("\n")),
        }
    }
}

fn render_fence(open: &str, body: &str) -> String {
    if body.is_empty() {
        format!("{}\n{}", open, FENCE)
    } else {
        format!("{}\n{}\n{}", open, body, FENCE)
    }
}

fn is_fence_line(line: &str) -> bool {
    let t = line.trim_start();
    // "```code```" on a single line is inline code, not a block delimiter.
    t.starts_with(FENCE) && !t[FENCE.len()..].contains(FENCE)
}

fn parse_units(text: &str) -> Vec<Unit<'_>> {
    let mut units = Vec::new();
    let mut lines = text.lines();
    while let Some(line) = lines.next() {
        if !is_fence_line(line) {
            units.push(Unit::Line(line));
            continue;
        }
        let open = line.trim();
        let mut body = Vec::new();
        // An unterminated block runs to the end of the text and is closed on render.
        for inner in lines.by_ref() {
            if inner.trim_start().starts_with(FENCE) {
                break;
            }
            body.push(inner);
        }
        units.push(Unit::Fence { open, body });
    }
    units
}

/// Message being assembled: lines joined by '\n', length tracked in chars.
struct ChunkBuf {
    text: String,
    len: usize,
    lines: usize,
    budget: usize,
}

impl ChunkBuf {
    fn new(budget: usize) -> Self {
        Self {
            text: String::new(),
            len: 0,
            lines: 0,
            budget,
        }
    }

    fn fits(&self, line: &str) -> bool {
        let sep = usize::from(self.lines > 0);
        self.len + sep + char_len(line) <= self.budget
    }

    fn push_line(&mut self, line: &str) {
        if self.lines > 0 {
            self.text.push('\n');
            self.len += 1;
        }
        self.text.push_str(line);
        self.len += char_len(line);
        self.lines += 1;
    }

    fn is_empty(&self) -> bool {
        self.lines == 0
    }

    fn flush_into(&mut self, out: &mut Vec<String>) {
        let text = std::mem::take(&mut self.text);
        self.len = 0;
        self.lines = 0;
        if !text.trim().is_empty() {
            out.push(text);
        }
    }
}

/// Split `text` into messages of at most `budget` chars (a budget of 0 counts as 1).
/// Breaks between lines; a fenced block is kept whole when it fits in one message, otherwise it is
/// closed at the message boundary and re-opened with the same info string in the next message.
/// Single lines longer than the budget are cut on char boundaries. When the budget cannot hold even a
/// bare fence pair around one char, fenced blocks are cut like plain text.
pub fn split_preserving_fences(text: &str, budget: usize) -> Vec<String> {
    let budget = budget.max(1);
    let mut chunks = Vec::new();
    let mut cur = ChunkBuf::new(budget);

    for unit in parse_units(text) {
        let rendered = unit.render();
        if cur.fits(&rendered) {
            cur.push_line(&rendered);
            continue;
        }
        if !cur.is_empty() {
            cur.flush_into(&mut chunks);
        }
        if cur.fits(&rendered) {
            cur.push_line(&rendered);
            continue;
        }
        match unit {
            Unit::Line(line) => {
                for piece in hard_split(line, budget) {
                    if !cur.fits(piece) {
                        cur.flush_into(&mut chunks);
                    }
                    cur.push_line(piece);
                }
            }
            Unit::Fence { open, body } => split_fence(open, &body, budget, &mut chunks, &mut cur),
        }
    }
    cur.flush_into(&mut chunks);
    chunks
}

/// Emit an oversized fenced block as several self-contained blocks. The last piece stays in `cur`
/// so following text can share its message.
fn split_fence(open: &str, body: &[&str], budget: usize, chunks: &mut Vec<String>, cur: &mut ChunkBuf) {
    // open + '\n' + body + '\n' + close
    let overhead = |open: &str| char_len(open) + 2 + FENCE.len();
    if budget <= overhead(FENCE) {
        let block = render_fence(open, &body.join("\n"));
        for line in block.lines() {
            for piece in hard_split(line, budget) {
                if !cur.fits(piece) {
                    cur.flush_into(chunks);
                }
                cur.push_line(piece);
            }
        }
        return;
    }
    let open = if budget >= overhead(open) + MIN_BUDGET / 2 { open } else { FENCE };
    let capacity = budget - overhead(open);

    let mut pieces: Vec<String> = Vec::new();
    let mut piece = ChunkBuf::new(capacity);
    for line in body {
        for part in hard_split(line, capacity) {
            if !piece.fits(part) {
                pieces.push(std::mem::take(&mut piece.text));
                piece = ChunkBuf::new(capacity);
            }
            piece.push_line(part);
        }
    }
    if !piece.is_empty() {
        pieces.push(piece.text);
    }

    let last = pieces.len().saturating_sub(1);
    for (i, body) in pieces.iter().enumerate() {
        let block = render_fence(open, body);
        if i == last {
            cur.push_line(&block);
        } else {
            chunks.push(block);
        }
    }
}

fn hard_split(s: &str, max_chars: usize) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some((cut, _)) = rest.char_indices().nth(max_chars) {
        out.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    out.push(rest);
    out
}

#[inline]
fn char_len(s: &str) -> usize {
    s.chars().count()
}

static FENCE_INFO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)```[\w+#.\-]+\s*$").expect("fence info regex"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("bold regex"));
static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("link regex"));
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#{1,6}\s+(.+)$").expect("heading regex"));

/// Convert assistant Markdown to Slack mrkdwn. Fenced blocks lose their language tag (Slack shows it
/// as code otherwise) and their content is left untouched; outside fences `**bold**` becomes `*bold*`,
/// `# Heading` becomes `*Heading*`, and `[text](url)` becomes `<url|text>`.
pub fn to_slack_markup(text: &str) -> String {
    let mut out = Vec::new();
    let mut in_fence = false;
    for line in text.lines() {
        if in_fence {
            in_fence = !line.trim_start().starts_with(FENCE);
            out.push(line.to_string());
            continue;
        }
        if is_fence_line(line) {
            in_fence = true;
            out.push(FENCE_INFO.replace(line, "${1}```").into_owned());
            continue;
        }
        let line = HEADING.replace(line, "*$1*");
        let line = BOLD.replace_all(&line, "*$1*");
        let line = LINK.replace_all(&line, "<$2|$1>");
        out.push(line.into_owned());
    }
    out.join("\n")
}
