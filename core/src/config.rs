//! Process configuration. Built once at startup from environment variables (optionally seeded from `.env`)
//! and passed around as `Arc<Config>`; nothing here is mutated after construction.
//! Tokens are kept in `SecretString` and never printed.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

pub const DEFAULT_WORKSPACE_DIR: &str = "/tmp/claude-workspace";
pub const DEFAULT_REPO_PATH: &str = "/tmp/repos";
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 3000;
pub const DEFAULT_MAX_TURNS: u32 = 8;
pub const DEFAULT_MCP_CONFIG_PATH: &str = "mcp-config.json";
pub const DEFAULT_LOG_FILE: &str = "slack-claude-bot.log";
pub const DEFAULT_GITHUB_BASE_BRANCH: &str = "main";

/// Number of REPO{n}_PATH / REPO{n}_NAME slots read from the environment.
pub const REPO_SLOTS: usize = 5;

/// Value shipped in the sample `.env`; treated as "no token".
const GITHUB_TOKEN_PLACEHOLDER: &str = "ghp_your_github_token_here";

/// One alias → repository working directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    /// Lower-cased alias matched against command text.
    pub alias: String,
    pub path: PathBuf,
}

impl RepositoryConfig {
    pub fn new(alias: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            alias: alias.into().trim().to_lowercase(),
            path: path.into(),
        }
    }
}

pub struct Config {
    slack_bot_token: SecretString,
    slack_app_token: SecretString,
    github_token: Option<SecretString>,
    /// Passed as `--model` when set.
    pub anthropic_model: Option<String>,
    /// Scratch directory created at startup.
    pub workspace_dir: PathBuf,
    /// Inline reply budget in characters.
    pub max_message_length: usize,
    /// Assistant `--max-turns` per invocation.
    pub max_turns: u32,
    pub debug: bool,
    pub github_base_branch: String,
    pub default_repo_path: PathBuf,
    /// Ordered alias table; configuration order is the tie-break order.
    pub repositories: Vec<RepositoryConfig>,
    pub mcp_config_path: PathBuf,
    /// Assistant executable (default `claude`).
    pub claude_bin: String,
    pub log_file: PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("slack_bot_token", &"[REDACTED]")
            .field("slack_app_token", &"[REDACTED]")
            .field("github_token", &self.github_token.as_ref().map(|_| "[REDACTED]"))
            .field("anthropic_model", &self.anthropic_model)
            .field("workspace_dir", &self.workspace_dir)
            .field("max_message_length", &self.max_message_length)
            .field("max_turns", &self.max_turns)
            .field("debug", &self.debug)
            .field("github_base_branch", &self.github_base_branch)
            .field("default_repo_path", &self.default_repo_path)
            .field("repositories", &self.repositories)
            .field("mcp_config_path", &self.mcp_config_path)
            .field("claude_bin", &self.claude_bin)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut errors = Vec::new();

        let slack_bot_token = get("SLACK_BOT_TOKEN");
        if slack_bot_token.is_none() {
            errors.push(ConfigError::Missing("SLACK_BOT_TOKEN"));
        }
        let slack_app_token = get("SLACK_APP_TOKEN");
        if slack_app_token.is_none() {
            errors.push(ConfigError::Missing("SLACK_APP_TOKEN"));
        }

        let max_message_length = match parse_positive::<usize, _>(&get, "MAX_MESSAGE_LENGTH") {
            Ok(v) => v.unwrap_or(DEFAULT_MAX_MESSAGE_LENGTH),
            Err(e) => {
                errors.push(e);
                DEFAULT_MAX_MESSAGE_LENGTH
            }
        };
        let max_turns = match parse_positive::<u32, _>(&get, "MAX_TURNS") {
            Ok(v) => v.unwrap_or(DEFAULT_MAX_TURNS),
            Err(e) => {
                errors.push(e);
                DEFAULT_MAX_TURNS
            }
        };

        let (Some(bot), Some(app)) = (slack_bot_token, slack_app_token) else {
            return Err(collapse(errors));
        };
        if !errors.is_empty() {
            return Err(collapse(errors));
        }

        let github_token = get("GITHUB_TOKEN")
            .filter(|t| t != GITHUB_TOKEN_PLACEHOLDER)
            .map(SecretString::from);

        let repositories = (1..=REPO_SLOTS)
            .filter_map(|n| {
                let path = get(&format!("REPO{}_PATH", n))?;
                let alias = get(&format!("REPO{}_NAME", n)).unwrap_or_else(|| format!("project{}", n));
                let repo = RepositoryConfig::new(alias, path);
                (!repo.alias.is_empty()).then_some(repo)
            })
            .collect();

        let config = Config {
            slack_bot_token: SecretString::from(bot),
            slack_app_token: SecretString::from(app),
            github_token,
            anthropic_model: get("ANTHROPIC_MODEL"),
            workspace_dir: PathBuf::from(get("CLAUDE_WORKSPACE").unwrap_or_else(|| DEFAULT_WORKSPACE_DIR.into())),
            max_message_length,
            max_turns,
            debug: get("DEBUG").map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false),
            github_base_branch: get("GITHUB_BASE_BRANCH").unwrap_or_else(|| DEFAULT_GITHUB_BASE_BRANCH.into()),
            default_repo_path: PathBuf::from(get("DEFAULT_REPO_PATH").unwrap_or_else(|| DEFAULT_REPO_PATH.into())),
            repositories,
            mcp_config_path: PathBuf::from(get("MCP_CONFIG_PATH").unwrap_or_else(|| DEFAULT_MCP_CONFIG_PATH.into())),
            claude_bin: get("CLAUDE_BIN").unwrap_or_else(|| "claude".into()),
            log_file: PathBuf::from(get("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.into())),
        };

        Ok(config)
    }

    pub fn slack_bot_token(&self) -> &str {
        self.slack_bot_token.expose_secret()
    }

    pub fn slack_app_token(&self) -> &str {
        self.slack_app_token.expose_secret()
    }

    pub fn github_token(&self) -> Option<&str> {
        self.github_token.as_ref().map(|t| t.expose_secret())
    }

    pub fn github_enabled(&self) -> bool {
        self.github_token.is_some()
    }

    /// `--mcp-config` path when the configured file exists.
    pub fn mcp_config(&self) -> Option<&Path> {
        self.mcp_config_path
            .is_file()
            .then_some(self.mcp_config_path.as_path())
    }

    /// Token prefixes Slack issues; a mismatch is usually a swapped or wrong token.
    pub fn token_format_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.slack_bot_token().starts_with("xoxb-") {
            problems.push("SLACK_BOT_TOKEN doesn't start with 'xoxb-', this may be incorrect".to_string());
        }
        if !self.slack_app_token().starts_with("xapp-") {
            problems.push("SLACK_APP_TOKEN doesn't start with 'xapp-', this may be incorrect".to_string());
        }
        problems
    }
}

/// Unsigned value above zero; out-of-range values fail to parse rather than wrap.
fn parse_positive<T, F>(get: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    F: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(None),
        Some(raw) => match raw.parse::<T>() {
            Ok(n) if n != T::default() => Ok(Some(n)),
            _ => Err(ConfigError::InvalidNumber { name, value: raw }),
        },
    }
}

fn collapse(mut errors: Vec<ConfigError>) -> ConfigError {
    if errors.len() == 1 {
        errors.remove(0)
    } else {
        ConfigError::Multiple(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    const TOKENS: [(&str, &str); 2] = [("SLACK_BOT_TOKEN", "xoxb-1"), ("SLACK_APP_TOKEN", "xapp-1")];

    #[test]
    fn defaults_apply_when_only_tokens_are_set() {
        let cfg = Config::from_lookup(lookup(&TOKENS)).unwrap();
        assert_eq!(cfg.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
        assert_eq!(cfg.max_turns, DEFAULT_MAX_TURNS);
        assert_eq!(cfg.default_repo_path, PathBuf::from(DEFAULT_REPO_PATH));
        assert_eq!(cfg.workspace_dir, PathBuf::from(DEFAULT_WORKSPACE_DIR));
        assert!(cfg.repositories.is_empty());
        assert!(!cfg.github_enabled());
        assert!(!cfg.debug);
        assert!(cfg.token_format_problems().is_empty());
    }

    #[test]
    fn missing_tokens_are_all_reported() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Multiple(vec![
                ConfigError::Missing("SLACK_BOT_TOKEN"),
                ConfigError::Missing("SLACK_APP_TOKEN"),
            ])
        );
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let err = Config::from_lookup(lookup(&[("SLACK_BOT_TOKEN", "  "), ("SLACK_APP_TOKEN", "xapp-1")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("SLACK_BOT_TOKEN"));
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("MAX_MESSAGE_LENGTH", "lots"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { name: "MAX_MESSAGE_LENGTH", .. }));

        let mut pairs = TOKENS.to_vec();
        pairs.push(("MAX_TURNS", "0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn max_turns_beyond_u32_is_rejected_not_wrapped() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("MAX_TURNS", "4294967297"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { name: "MAX_TURNS", ref value } if value == "4294967297"
        ));

        let mut pairs = TOKENS.to_vec();
        pairs.push(("MAX_TURNS", "4294967295"));
        assert_eq!(Config::from_lookup(lookup(&pairs)).unwrap().max_turns, u32::MAX);
    }

    #[test]
    fn repositories_keep_slot_order_and_skip_empty_paths() {
        let mut pairs = TOKENS.to_vec();
        pairs.extend([
            ("REPO1_PATH", "/repo/fe"),
            ("REPO1_NAME", "FrontEnd"),
            ("REPO2_PATH", ""),
            ("REPO2_NAME", "ignored"),
            ("REPO3_PATH", "/repo/three"),
        ]);
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            cfg.repositories,
            vec![
                RepositoryConfig::new("frontend", "/repo/fe"),
                RepositoryConfig::new("project3", "/repo/three"),
            ]
        );
    }

    #[test]
    fn github_placeholder_token_is_ignored() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("GITHUB_TOKEN", GITHUB_TOKEN_PLACEHOLDER));
        assert!(!Config::from_lookup(lookup(&pairs)).unwrap().github_enabled());

        let mut pairs = TOKENS.to_vec();
        pairs.push(("GITHUB_TOKEN", "ghp_real"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(cfg.github_token(), Some("ghp_real"));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let mut pairs = TOKENS.to_vec();
        pairs.push(("GITHUB_TOKEN", "ghp_secret"));
        let cfg = Config::from_lookup(lookup(&pairs)).unwrap();
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("xoxb-1"));
        assert!(!dbg.contains("ghp_secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn swapped_tokens_are_flagged() {
        let cfg = Config::from_lookup(lookup(&[("SLACK_BOT_TOKEN", "xapp-1"), ("SLACK_APP_TOKEN", "xoxb-1")])).unwrap();
        assert_eq!(cfg.token_format_problems().len(), 2);
    }
}
