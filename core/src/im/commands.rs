//! Command catalogue: slash commands, help text, prompt templates and the status lines posted around a run.
//! Everything here is pure text shaping; the worker decides when to send it.

use crate::config::RepositoryConfig;

/// Inputs that show the help message instead of running the assistant.
pub const HELP_TRIGGERS: [&str; 3] = ["help", "help me", "?"];

pub const EMPTY_PROMPT_MESSAGE: &str = "Please provide a request. Type `help` for usage instructions.";

pub const BUSY_MESSAGE: &str = "Please wait for the current task to finish.";

/// Keywords that mark a task as analysis-heavy; such tasks get [`ANALYSIS_TURN_BONUS`] extra turns.
pub const ANALYSIS_KEYWORDS: [&str; 8] = [
    "analyze", "review", "examine", "check", "audit", "overview", "summary", "structure",
];
pub const ANALYSIS_TURN_BONUS: u32 = 5;

/// Marker line the `/pr` prompt asks the assistant to end with.
pub const BRANCH_MARKER: &str = "BRANCH:";

/// Slash commands registered with the Slack app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlashCommand {
    Code,
    Feature,
    Review,
    Pr,
}

impl SlashCommand {
    pub const ALL: [SlashCommand; 4] = [
        SlashCommand::Code,
        SlashCommand::Feature,
        SlashCommand::Review,
        SlashCommand::Pr,
    ];

    /// Parse a command name such as "/code" (case-insensitive).
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(name))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlashCommand::Code => "/code",
            SlashCommand::Feature => "/feature",
            SlashCommand::Review => "/review",
            SlashCommand::Pr => "/pr",
        }
    }

    /// Reply for a command sent without text.
    pub fn usage(&self) -> &'static str {
        match self {
            SlashCommand::Code => "Please provide a coding task. Example: `/code create a React login component`",
            SlashCommand::Feature => "Please describe the feature. Example: `/feature user authentication with JWT`",
            SlashCommand::Review => "Specify what to review. Example: `/review PR #123` or `/review src/components/`",
            SlashCommand::Pr => "Please describe the PR. Example: `/pr implement user profile management`",
        }
    }
}

/// What kind of request the worker is serving. Mentions and DMs behave like `/code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Chat,
    Slash(SlashCommand),
}

impl RequestKind {
    fn command(&self) -> SlashCommand {
        match self {
            RequestKind::Chat => SlashCommand::Code,
            RequestKind::Slash(c) => *c,
        }
    }
}

pub fn is_help(text: &str) -> bool {
    let t = text.trim().to_lowercase();
    HELP_TRIGGERS.contains(&t.as_str())
}

pub fn unknown_command_message(name: &str) -> String {
    format!("Unknown command: {}. Type `help` for available commands.", name)
}

/// Help text, including the configured project aliases and the default directory.
pub fn help_message(repos: &[RepositoryConfig], default_path: &std::path::Path) -> String {
    let mut out = String::from(
        "*Claude Code Bot - Help*\n\n\
         *Commands:*\n\
         • `@bot <your request>` - Mention me in any channel\n\
         • Send me a direct message\n\
         • `/code <request>` - General coding tasks\n\
         • `/feature <description>` - Create new features with PR\n\
         • `/review <target>` - Code review (PR, files, directories)\n\
         • `/pr <description>` - Create pull request from current changes\n\n\
         *Examples:*\n\
         • `/code add authentication to the login page`\n\
         • `/feature user authentication system with JWT`\n\
         • `/review PR #123 for security issues`\n\
         • `/pr implement user profile management`\n\n\
         *Project Selection:*\n",
    );
    out.push_str(&format!("• *Default*: works in `{}`\n", default_path.display()));
    if repos.is_empty() {
        out.push_str("• No project aliases configured\n");
    } else {
        out.push_str("• *Auto-detect*: mention a project name in your request\n");
        for repo in repos {
            out.push_str(&format!("  - `{}` → `{}`\n", repo.alias, repo.path.display()));
        }
    }
    out.push_str(
        "\n*Tips:*\n\
         • Replies in the same thread continue the same conversation\n\
         • Long responses are uploaded as files",
    );
    out
}

/// `--max-turns` for this input: the base budget, plus a bonus for analysis-heavy requests.
pub fn turn_budget(text: &str, base: u32) -> u32 {
    let lowered = text.to_lowercase();
    if ANALYSIS_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        base + ANALYSIS_TURN_BONUS
    } else {
        base
    }
}

/// Prompt sent to the assistant. Chat and `/code` pass the text through.
pub fn build_prompt(kind: RequestKind, text: &str) -> String {
    match kind.command() {
        SlashCommand::Code => text.to_string(),
        SlashCommand::Feature => format!(
            "Create a new feature: {text}\n\n\
             Please follow this complete workflow:\n\
             1. Create a new feature branch with descriptive name\n\
             2. Implement the feature with proper code structure and best practices\n\
             3. Write comprehensive unit tests for the feature\n\
             4. Update documentation and README if needed\n\
             5. Run tests to ensure everything works\n\
             6. Provide a summary of all changes made\n\n\
             Focus on clean, maintainable code, proper error handling, security and performance."
        ),
        SlashCommand::Review => format!(
            "Perform a comprehensive code review of: {text}\n\n\
             Please analyze and provide detailed feedback on:\n\
             1. **Code Quality & Best Practices**: structure, naming, design patterns, duplication\n\
             2. **Security Analysis**: input validation, authentication/authorization, injection risks, sensitive data exposure\n\
             3. **Performance Considerations**: algorithm efficiency, query optimization, memory usage, bottlenecks\n\
             4. **Testing & Reliability**: coverage, edge cases, error handling, logging\n\
             5. **Documentation & Maintainability**: comments, documentation, README updates needed\n\n\
             Provide specific, actionable recommendations for each area."
        ),
        SlashCommand::Pr => format!(
            "Prepare a pull request for the changes related to: {text}\n\n\
             Please:\n\
             1. Review all current changes in the repository\n\
             2. Create commits with clear, descriptive messages\n\
             3. Push the commits to a new branch on origin\n\
             4. Summarize what was added, modified or removed, with testing notes and any breaking changes\n\n\
             Do not open the pull request yourself. End your reply with a single line of the form\n\
             {BRANCH_MARKER} <branch-name>"
        ),
    }
}

/// Status line posted before the assistant starts.
pub fn working_indicator(kind: RequestKind, text: &str, project: Option<&str>) -> String {
    match kind.command() {
        SlashCommand::Code => {
            let place = project.map(|p| format!(" (in {})", p)).unwrap_or_default();
            format!("🤖 Claude Code is working on{}: \"{}\"", place, text)
        }
        SlashCommand::Feature => format!("🚀 Creating feature: \"{}\"", text),
        SlashCommand::Review => format!("🔍 Starting comprehensive code review: \"{}\"", text),
        SlashCommand::Pr => format!("📝 Creating pull request: \"{}\"", text),
    }
}

/// Header line prefixed to a successful reply.
pub fn success_header(kind: RequestKind, text: &str) -> String {
    match kind.command() {
        SlashCommand::Code => "✅ *Task Completed*".to_string(),
        SlashCommand::Feature => format!("✅ *Feature \"{}\" completed!*", text),
        SlashCommand::Review => format!("📋 *Code Review Results for \"{}\"*", text),
        SlashCommand::Pr => "✅ *Pull Request Created!*".to_string(),
    }
}

/// Reply for a failed run.
pub fn failure_message(kind: RequestKind, error: &str) -> String {
    match kind.command() {
        SlashCommand::Pr => format!("❌ *PR Creation Failed*\n\n{}", error),
        _ => format!("❌ *Error*: {}", error),
    }
}

/// Cost footer; empty when the run reported no cost.
pub fn cost_footer(cost_usd: Option<f64>) -> Option<String> {
    cost_usd
        .filter(|c| *c > 0.0)
        .map(|c| format!("_Cost: ${:.4}_", c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn slash_commands_parse_case_insensitively() {
        assert_eq!(SlashCommand::parse("/code"), Some(SlashCommand::Code));
        assert_eq!(SlashCommand::parse("/PR"), Some(SlashCommand::Pr));
        assert_eq!(SlashCommand::parse("/fix"), None);
    }

    #[test]
    fn help_triggers() {
        assert!(is_help("help"));
        assert!(is_help(" Help Me "));
        assert!(is_help("?"));
        assert!(!is_help("help me fix the build"));
    }

    #[test]
    fn analysis_keywords_raise_the_turn_budget() {
        assert_eq!(turn_budget("add a button", 8), 8);
        assert_eq!(turn_budget("Analyze the auth flow", 8), 13);
        assert_eq!(turn_budget("give me an overview", 3), 8);
    }

    #[test]
    fn help_lists_configured_aliases() {
        let repos = vec![RepositoryConfig::new("frontend", "/repo/fe")];
        let help = help_message(&repos, Path::new("/repo/main"));
        assert!(help.contains("`frontend` → `/repo/fe`"));
        assert!(help.contains("`/repo/main`"));

        let empty = help_message(&[], Path::new("/repo/main"));
        assert!(empty.contains("No project aliases configured"));
    }

    #[test]
    fn chat_and_code_pass_text_through() {
        assert_eq!(build_prompt(RequestKind::Chat, "fix it"), "fix it");
        assert_eq!(build_prompt(RequestKind::Slash(SlashCommand::Code), "fix it"), "fix it");
    }

    #[test]
    fn pr_prompt_asks_for_branch_marker() {
        let prompt = build_prompt(RequestKind::Slash(SlashCommand::Pr), "profile page");
        assert!(prompt.contains("profile page"));
        assert!(prompt.trim_end().ends_with("BRANCH: <branch-name>"));
    }

    #[test]
    fn working_indicator_names_the_project() {
        let line = working_indicator(RequestKind::Chat, "fix login", Some("fe"));
        assert_eq!(line, "🤖 Claude Code is working on (in fe): \"fix login\"");
        let line = working_indicator(RequestKind::Slash(SlashCommand::Review), "src/", None);
        assert!(line.starts_with("🔍"));
    }

    #[test]
    fn cost_footer_only_for_positive_cost() {
        assert_eq!(cost_footer(Some(0.01234)), Some("_Cost: $0.0123_".to_string()));
        assert_eq!(cost_footer(Some(0.0)), None);
        assert_eq!(cost_footer(None), None);
    }

    #[test]
    fn failures_use_command_specific_text() {
        assert_eq!(failure_message(RequestKind::Chat, "boom"), "❌ *Error*: boom");
        assert!(failure_message(RequestKind::Slash(SlashCommand::Pr), "boom").starts_with("❌ *PR Creation Failed*"));
    }
}
