//! IM worker: takes requests from the inbound queue, runs the assistant in the routed repository, and
//! pushes the formatted reply to the outbound hub. One task per request; a conversation runs one
//! request at a time.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::commands::{self, RequestKind, SlashCommand};
use super::daemon::OutboundHub;
use super::formatter::{plan_delivery, to_slack_markup, EMPTY_REPLY_PLACEHOLDER};
use super::log::{thread_field, truncate_content_default};
use super::session::{ConversationKey, ConversationStore};
use super::transport::{ImTransport, ReplyTarget};
use crate::config::Config;
use crate::github::{origin_remote, parse_github_remote, split_branch_marker, GitHubClient, NewPullRequest, PullRequest};
use crate::headless::{AssistantRunner, RunRequest, RunnerError};
use crate::router::{project_name, RepoRouter};

const PR_TITLE_MAX_CHARS: usize = 72;

/// Where a request came from.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestSource {
    /// `@bot ...` in a channel.
    Mention,
    DirectMessage,
    /// Reply in a thread the bot is already part of, without a mention.
    ThreadReply,
    Slash(SlashCommand),
    /// A slash command this bot does not serve (name including the leading `/`).
    UnknownSlash(String),
}

/// Inbound request from Slack to the worker.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub source: RequestSource,
    pub user: String,
    pub channel: String,
    /// Thread to reply in; None for unthreaded input (slash commands, top-level DMs).
    pub thread_ts: Option<String>,
    /// Request text with the bot mention removed.
    pub text: String,
}

impl InboundRequest {
    pub fn kind(&self) -> RequestKind {
        match &self.source {
            RequestSource::Slash(c) => RequestKind::Slash(*c),
            _ => RequestKind::Chat,
        }
    }

    pub fn reply_target(&self) -> ReplyTarget {
        ReplyTarget::new(self.channel.clone(), self.thread_ts.clone())
    }

    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.channel, self.thread_ts.as_deref(), &self.user)
    }
}

/// Holds a conversation's busy slot until dropped.
struct BusyGuard<'a> {
    busy: &'a DashMap<ConversationKey, ()>,
    key: ConversationKey,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.remove(&self.key);
    }
}

pub struct Worker<T> {
    config: Arc<Config>,
    router: RepoRouter,
    conversations: ConversationStore,
    runner: Arc<dyn AssistantRunner>,
    github: Option<GitHubClient>,
    outbound: Arc<OutboundHub<T>>,
    busy: DashMap<ConversationKey, ()>,
}

impl<T> Worker<T>
where
    T: ImTransport + 'static,
{
    pub fn new(
        config: Arc<Config>,
        runner: Arc<dyn AssistantRunner>,
        github: Option<GitHubClient>,
        outbound: Arc<OutboundHub<T>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            router: RepoRouter::from_config(&config),
            config,
            conversations: ConversationStore::new(),
            runner,
            github,
            outbound,
            busy: DashMap::new(),
        })
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Drain the inbound queue, spawning one task per request. Returns when all senders are gone.
    pub async fn run(self: Arc<Self>, mut inbound_rx: mpsc::Receiver<InboundRequest>) {
        while let Some(request) = inbound_rx.recv().await {
            let worker = Arc::clone(&self);
            tokio::spawn(async move { worker.process(request).await });
        }
        debug!("[worker] inbound queue closed");
    }

    /// Handle one request to completion (the reply is queued, not necessarily delivered).
    pub async fn process(&self, request: InboundRequest) {
        let target = request.reply_target();
        let key = request.conversation_key();
        let kind = request.kind();
        let text = request.text.trim();

        if let RequestSource::UnknownSlash(name) = &request.source {
            self.outbound
                .send_text(&target, commands::unknown_command_message(name))
                .await;
            return;
        }
        if request.source == RequestSource::ThreadReply && self.conversations.get(&key).is_none() {
            debug!(conversation = %key, "[worker] reply in unknown thread ignored");
            return;
        }
        if kind == RequestKind::Chat && commands::is_help(text) {
            let help = commands::help_message(self.router.repositories(), self.router.default_path());
            self.outbound.send_text(&target, help).await;
            return;
        }
        if text.is_empty() {
            let reply = match kind {
                RequestKind::Slash(c) => c.usage(),
                RequestKind::Chat => commands::EMPTY_PROMPT_MESSAGE,
            };
            self.outbound.send_text(&target, reply).await;
            return;
        }

        let Some(_busy) = self.try_acquire(&key) else {
            info!(conversation = %key, "[worker] conversation busy");
            self.outbound.send_text(&target, commands::BUSY_MESSAGE).await;
            return;
        };

        // A follow-up that names no project stays in the repository the conversation already uses.
        let route = self.router.route(text);
        let repo_path = match (route.repo, self.conversations.get(&key)) {
            (None, Some(existing)) => existing.repo_path,
            _ => route.path.to_path_buf(),
        };
        let project = (repo_path != self.router.default_path()).then(|| project_name(&repo_path));
        let context = self.conversations.begin_turn(&key, &repo_path);

        info!(
            channel = %request.channel,
            thread = thread_field(request.thread_ts.as_deref()),
            user = %request.user,
            conversation = %key,
            turn = context.turn_count,
            repo = %repo_path.display(),
            direction = "worker_start",
            content = %truncate_content_default(text),
            "[worker] request"
        );

        self.outbound
            .send_text(&target, commands::working_indicator(kind, text, project.as_deref()))
            .await;

        let run = RunRequest {
            prompt: commands::build_prompt(kind, text),
            cwd: repo_path.clone(),
            max_turns: commands::turn_budget(text, self.config.max_turns),
            resume: context.assistant_session_id.clone(),
            model: self.config.anthropic_model.clone(),
            mcp_config: self.config.mcp_config().map(Path::to_path_buf),
        };

        let outcome = match self.runner.run(&run).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.report_failure(&request, &key, kind, &e).await;
                return;
            }
        };
        self.conversations.record_session(&key, outcome.session_id.clone());

        let mut body = outcome.text;
        if kind == RequestKind::Slash(SlashCommand::Pr) {
            body = self.finish_pull_request(&repo_path, text, body).await;
        }

        let header = commands::success_header(kind, text);
        let footer = commands::cost_footer(outcome.cost_usd);
        let shown = if body.trim().is_empty() { EMPTY_REPLY_PLACEHOLDER } else { body.as_str() };
        let formatted = compose(&header, &to_slack_markup(shown), footer.as_deref());
        let raw = compose(&header, shown, footer.as_deref());

        let caps = self.outbound.capabilities();
        let budget = self.config.max_message_length.min(caps.max_message_len);
        let delivery = plan_delivery(&formatted, budget, caps.supports_file_upload).with_file_content(&raw);

        info!(
            channel = %request.channel,
            thread = thread_field(request.thread_ts.as_deref()),
            conversation = %key,
            incomplete = outcome.incomplete,
            cost_usd = outcome.cost_usd.unwrap_or(0.0),
            reply_len = formatted.chars().count(),
            direction = "worker_done",
            "[worker] reply ready"
        );
        self.outbound.send_reply(&target, delivery).await;
    }

    fn try_acquire(&self, key: &ConversationKey) -> Option<BusyGuard<'_>> {
        match self.busy.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(BusyGuard {
                    busy: &self.busy,
                    key: key.clone(),
                })
            }
        }
    }

    async fn report_failure(&self, request: &InboundRequest, key: &ConversationKey, kind: RequestKind, e: &RunnerError) {
        error!(
            channel = %request.channel,
            thread = thread_field(request.thread_ts.as_deref()),
            conversation = %key,
            runner = self.runner.name(),
            error = %e,
            direction = "worker_error",
            content = %truncate_content_default(&request.text),
            "[worker] run failed"
        );
        self.outbound
            .send_text(&request.reply_target(), commands::failure_message(kind, &e.user_message()))
            .await;
    }

    /// Strip the branch marker from a `/pr` reply and open the pull request; the outcome is appended.
    async fn finish_pull_request(&self, repo_path: &Path, title: &str, reply: String) -> String {
        let (mut body, branch) = split_branch_marker(&reply);
        let note = match (branch, &self.github) {
            (None, _) => "⚠️ No branch was reported, so no pull request was opened.".to_string(),
            (Some(branch), None) => format!(
                "⚠️ Branch `{}` is ready, but GitHub integration is disabled (GITHUB_TOKEN not set).",
                branch
            ),
            (Some(branch), Some(github)) => {
                match self.open_pull_request(github, repo_path, &branch, title, &body).await {
                    Ok(pr) => {
                        info!(number = pr.number, url = %pr.html_url, branch = %branch, "[github] pull request opened");
                        format!("🔗 Pull request #{}: {}", pr.number, pr.html_url)
                    }
                    Err(e) => {
                        warn!(error = %e, branch = %branch, "[github] pull request failed");
                        format!("⚠️ Could not open a pull request for `{}`: {}", branch, e)
                    }
                }
            }
        };
        if !body.is_empty() {
            body.push_str("\n\n");
        }
        body.push_str(&note);
        body
    }

    async fn open_pull_request(
        &self,
        github: &GitHubClient,
        repo_path: &Path,
        branch: &str,
        title: &str,
        body: &str,
    ) -> anyhow::Result<PullRequest> {
        let remote = origin_remote(repo_path).await?;
        let (owner, repo) = parse_github_remote(&remote)
            .with_context(|| format!("origin `{}` is not a GitHub repository", remote))?;
        let pr = NewPullRequest {
            title: pr_title(title),
            head: branch.to_string(),
            base: self.config.github_base_branch.clone(),
            body: body.to_string(),
        };
        github.create_pull_request(&owner, &repo, &pr).await
    }
}

fn compose(header: &str, body: &str, footer: Option<&str>) -> String {
    match footer {
        Some(f) => format!("{}\n\n{}\n\n{}", header, body, f),
        None => format!("{}\n\n{}", header, body),
    }
}

fn pr_title(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default().trim();
    let mut title: String = first.chars().take(PR_TITLE_MAX_CHARS).collect();
    if first.chars().count() > PR_TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::RunOutcome;
    use crate::im::formatter::{FileAttachment, ATTACHMENT_FILENAME};
    use crate::im::transport::{ImChannelCapabilities, SendError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Debug, Clone, PartialEq)]
    enum Sent {
        Post(String),
        Upload(String),
    }

    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        max_message_len: usize,
    }

    impl RecordingTransport {
        fn new(max_message_len: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                max_message_len,
            }
        }

        fn posts(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter_map(|s| match s {
                    Sent::Post(t) => Some(t.clone()),
                    Sent::Upload(_) => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ImTransport for RecordingTransport {
        fn capabilities(&self) -> ImChannelCapabilities {
            ImChannelCapabilities {
                supports_file_upload: true,
                max_message_len: self.max_message_len,
                channel_id_prefix: "mock",
            }
        }

        async fn send(&self, _target: &ReplyTarget, text: &str) -> Result<Option<String>, SendError> {
            self.sent.lock().unwrap().push(Sent::Post(text.to_string()));
            Ok(None)
        }

        async fn upload_file(&self, _target: &ReplyTarget, file: &FileAttachment) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(Sent::Upload(file.filename.clone()));
            Ok(())
        }
    }

    /// Replays canned results in order and records every request.
    struct ScriptedRunner {
        results: Mutex<Vec<Result<RunOutcome, RunnerError>>>,
        requests: Mutex<Vec<RunRequest>>,
        started: Notify,
        release: Option<Notify>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<Result<RunOutcome, RunnerError>>) -> Self {
            Self {
                results: Mutex::new(results),
                requests: Mutex::new(Vec::new()),
                started: Notify::new(),
                release: None,
            }
        }

        fn requests(&self) -> Vec<RunRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AssistantRunner for ScriptedRunner {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&self, request: &RunRequest) -> Result<RunOutcome, RunnerError> {
            self.requests.lock().unwrap().push(request.clone());
            self.started.notify_one();
            if let Some(release) = &self.release {
                release.notified().await;
            }
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(outcome("ok", None))
            } else {
                results.remove(0)
            }
        }
    }

    fn outcome(text: &str, session: Option<&str>) -> RunOutcome {
        RunOutcome {
            text: text.to_string(),
            session_id: session.map(str::to_string),
            cost_usd: None,
            incomplete: false,
        }
    }

    fn config(repo: &Path, default: &Path) -> Arc<Config> {
        let vars: HashMap<&str, String> = [
            ("SLACK_BOT_TOKEN", "xoxb-1".to_string()),
            ("SLACK_APP_TOKEN", "xapp-1".to_string()),
            ("REPO1_NAME", "frontend".to_string()),
            ("REPO1_PATH", repo.display().to_string()),
            ("DEFAULT_REPO_PATH", default.display().to_string()),
            ("MCP_CONFIG_PATH", default.join("absent.json").display().to_string()),
        ]
        .into_iter()
        .collect();
        Arc::new(Config::from_lookup(|name| vars.get(name).cloned()).unwrap())
    }

    struct Fixture {
        _tmp: tempfile::TempDir,
        repo: std::path::PathBuf,
        transport: Arc<RecordingTransport>,
        runner: Arc<ScriptedRunner>,
        worker: Arc<Worker<RecordingTransport>>,
    }

    fn fixture(runner: ScriptedRunner) -> Fixture {
        fixture_with_limit(runner, 3000)
    }

    fn fixture_with_limit(runner: ScriptedRunner, max_message_len: usize) -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let repo = tmp.path().join("web-app");
        let default = tmp.path().join("scratch");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::create_dir_all(&default).unwrap();
        let transport = Arc::new(RecordingTransport::new(max_message_len));
        let runner = Arc::new(runner);
        let worker = Worker::new(
            config(&repo, &default),
            Arc::clone(&runner) as Arc<dyn AssistantRunner>,
            None,
            OutboundHub::new(Arc::clone(&transport)),
        );
        Fixture {
            _tmp: tmp,
            repo,
            transport,
            runner,
            worker,
        }
    }

    fn request(source: RequestSource, thread_ts: Option<&str>, text: &str) -> InboundRequest {
        InboundRequest {
            source,
            user: "U1".into(),
            channel: "C1".into(),
            thread_ts: thread_ts.map(str::to_string),
            text: text.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn mention_runs_in_routed_repo_and_resumes_the_thread() {
        let f = fixture(ScriptedRunner::new(vec![
            Ok(outcome("First answer", Some("sess-1"))),
            Ok(outcome("Second answer", Some("sess-1"))),
        ]));

        f.worker
            .process(request(RequestSource::Mention, Some("10.0"), "fix the Frontend build"))
            .await;
        f.worker
            .process(request(RequestSource::ThreadReply, Some("10.0"), "and add a test"))
            .await;
        f.worker.outbound.flush("C1").await;

        let runs = f.runner.requests();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].cwd, f.repo);
        assert_eq!(runs[0].resume, None);
        assert_eq!(runs[1].resume.as_deref(), Some("sess-1"));

        let posts = f.transport.posts();
        assert_eq!(posts[0], "🤖 Claude Code is working on (in web-app): \"fix the Frontend build\"");
        assert_eq!(posts[1], "✅ *Task Completed*\n\nFirst answer");
        assert_eq!(f.worker.conversations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_text_uses_default_directory_without_project_label() {
        let f = fixture(ScriptedRunner::new(vec![]));
        f.worker
            .process(request(RequestSource::DirectMessage, None, "what time is it"))
            .await;
        f.worker.outbound.flush("C1").await;

        assert!(f.runner.requests()[0].cwd.ends_with("scratch"));
        assert_eq!(f.transport.posts()[0], "🤖 Claude Code is working on: \"what time is it\"");
    }

    #[tokio::test(start_paused = true)]
    async fn help_empty_and_unknown_commands_never_reach_the_runner() {
        let f = fixture(ScriptedRunner::new(vec![]));
        f.worker.process(request(RequestSource::Mention, Some("1.0"), "  HELP ")).await;
        f.worker.process(request(RequestSource::Mention, Some("2.0"), "   ")).await;
        f.worker
            .process(request(RequestSource::Slash(SlashCommand::Review), None, ""))
            .await;
        f.worker
            .process(request(RequestSource::UnknownSlash("/deploy".into()), None, "prod"))
            .await;
        f.worker.outbound.flush("C1").await;

        assert!(f.runner.requests().is_empty());
        let posts = f.transport.posts();
        assert!(posts[0].starts_with("*Claude Code Bot - Help*"));
        assert!(posts[0].contains("`frontend`"));
        assert_eq!(posts[1], commands::EMPTY_PROMPT_MESSAGE);
        assert_eq!(posts[2], SlashCommand::Review.usage());
        assert_eq!(posts[3], commands::unknown_command_message("/deploy"));
    }

    #[tokio::test(start_paused = true)]
    async fn replies_in_unknown_threads_are_ignored() {
        let f = fixture(ScriptedRunner::new(vec![]));
        f.worker
            .process(request(RequestSource::ThreadReply, Some("99.0"), "hello?"))
            .await;
        f.worker.outbound.flush("C1").await;
        assert!(f.runner.requests().is_empty());
        assert!(f.transport.posts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn runner_errors_become_friendly_failures() {
        let f = fixture(ScriptedRunner::new(vec![Err(RunnerError::Timeout(
            std::time::Duration::from_secs(300),
        ))]));
        f.worker
            .process(request(RequestSource::Slash(SlashCommand::Code), None, "refactor everything"))
            .await;
        f.worker.outbound.flush("C1").await;

        let posts = f.transport.posts();
        assert_eq!(posts.len(), 2);
        assert!(posts[1].starts_with("❌ *Error*: ⏱️ Task timed out."));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_and_long_replies_are_delivered() {
        let long = "word ".repeat(2000);
        let f = fixture(ScriptedRunner::new(vec![Ok(outcome("   ", None)), Ok(outcome(&long, None))]));
        f.worker.process(request(RequestSource::Mention, Some("1.0"), "quiet")).await;
        f.worker.process(request(RequestSource::Mention, Some("2.0"), "chatty")).await;
        f.worker.outbound.flush("C1").await;

        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent[1], Sent::Post(format!("✅ *Task Completed*\n\n{}", EMPTY_REPLY_PLACEHOLDER)));
        assert_eq!(sent.last(), Some(&Sent::Upload(ATTACHMENT_FILENAME.to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn transport_limit_caps_the_configured_budget() {
        // Configured MAX_MESSAGE_LENGTH is 3000; this channel only takes 200 chars per message.
        let f = fixture_with_limit(ScriptedRunner::new(vec![Ok(outcome(&"word ".repeat(100), None))]), 200);
        f.worker.process(request(RequestSource::Mention, Some("1.0"), "explain")).await;
        f.worker.outbound.flush("C1").await;

        let sent = f.transport.sent.lock().unwrap().clone();
        assert_eq!(sent.last(), Some(&Sent::Upload(ATTACHMENT_FILENAME.to_string())));
        for s in &sent {
            if let Sent::Post(text) = s {
                assert!(text.chars().count() <= 200, "{} chars", text.chars().count());
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_in_a_busy_conversation_is_refused() {
        let mut runner = ScriptedRunner::new(vec![]);
        runner.release = Some(Notify::new());
        let f = fixture(runner);

        let worker = Arc::clone(&f.worker);
        let first = tokio::spawn(async move {
            worker
                .process(request(RequestSource::Mention, Some("5.0"), "long task"))
                .await
        });
        f.runner.started.notified().await;

        f.worker
            .process(request(RequestSource::ThreadReply, Some("5.0"), "are you done?"))
            .await;
        if let Some(release) = &f.runner.release {
            release.notify_one();
        }
        first.await.unwrap();
        f.worker.outbound.flush("C1").await;

        assert_eq!(f.runner.requests().len(), 1);
        assert!(f.transport.posts().contains(&commands::BUSY_MESSAGE.to_string()));

        // The slot is free again once the first request finished.
        if let Some(release) = &f.runner.release {
            release.notify_one();
        }
        f.worker
            .process(request(RequestSource::ThreadReply, Some("5.0"), "next"))
            .await;
        assert_eq!(f.runner.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pr_reply_drops_branch_marker_and_notes_missing_github() {
        let f = fixture(ScriptedRunner::new(vec![Ok(outcome(
            "Committed and pushed.\nBRANCH: feature/profile",
            None,
        ))]));
        f.worker
            .process(request(RequestSource::Slash(SlashCommand::Pr), None, "user profile page"))
            .await;
        f.worker.outbound.flush("C1").await;

        let runs = f.runner.requests();
        assert!(runs[0].prompt.contains("BRANCH: <branch-name>"));
        let reply = f.transport.posts().pop().unwrap();
        assert!(reply.starts_with("✅ *Pull Request Created!*"));
        assert!(!reply.contains("BRANCH:"));
        assert!(reply.contains("`feature/profile`"));
        assert!(reply.contains("GITHUB_TOKEN not set"));
    }

    #[test]
    fn pr_titles_are_single_line_and_bounded() {
        assert_eq!(pr_title("Add login\nwith details"), "Add login");
        let long = "x".repeat(100);
        assert_eq!(pr_title(&long).chars().count(), PR_TITLE_MAX_CHARS + 1);
    }

    #[test]
    fn conversation_keys_follow_threads_or_users() {
        let threaded = request(RequestSource::Mention, Some("7.0"), "hi");
        assert_eq!(threaded.conversation_key().as_str(), "C1:7.0");
        let slash = request(RequestSource::Slash(SlashCommand::Code), None, "hi");
        assert_eq!(slash.conversation_key().as_str(), "C1:user:U1");
        assert_eq!(slash.kind(), RequestKind::Slash(SlashCommand::Code));
        assert_eq!(threaded.kind(), RequestKind::Chat);
    }
}
