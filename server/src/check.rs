//! `check` subcommand: verify configuration and connectivity, print PASS/FAIL per item.

use relay_core::config::Config;
use relay_core::headless::ClaudeRunner;
use relay_core::im::slack::SlackClient;
use relay_core::workspace::{check_writable, setup_workspace};

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok: false,
            detail: detail.into(),
        }
    }

    pub fn render(&self) -> String {
        format!("{} {}: {}", if self.ok { "PASS" } else { "FAIL" }, self.name, self.detail)
    }
}

/// Checks that need no network: token formats, directories, optional integrations.
pub fn local_checks(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let problems = config.token_format_problems();
    if problems.is_empty() {
        results.push(CheckResult::pass("token format", "xoxb-/xapp- prefixes look right"));
    } else {
        results.extend(problems.into_iter().map(|p| CheckResult::fail("token format", p)));
    }

    let workspace = setup_workspace(&config.workspace_dir).and_then(|dir| check_writable(&dir).map(|_| dir));
    results.push(match workspace {
        Ok(dir) => CheckResult::pass("workspace", format!("{} is writable", dir.display())),
        Err(e) => CheckResult::fail("workspace", format!("{}: {}", config.workspace_dir.display(), e)),
    });

    results.push(directory_check("default repository", &config.default_repo_path));
    for repo in &config.repositories {
        results.push(directory_check(&format!("repository `{}`", repo.alias), &repo.path));
    }

    results.push(CheckResult::pass(
        "mcp config",
        match config.mcp_config() {
            Some(path) => format!("{} will be passed to the assistant", path.display()),
            None => format!("{} not found, MCP disabled", config.mcp_config_path.display()),
        },
    ));
    results.push(CheckResult::pass(
        "github",
        if config.github_enabled() {
            "token set, /pr will open pull requests"
        } else {
            "GITHUB_TOKEN not set, /pr will only push branches"
        },
    ));
    results
}

fn directory_check(name: &str, path: &std::path::Path) -> CheckResult {
    if path.is_dir() {
        CheckResult::pass(name, path.display().to_string())
    } else {
        CheckResult::fail(name, format!("{} is not a directory", path.display()))
    }
}

/// Checks against Slack and the assistant CLI.
pub async fn remote_checks(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    match SlackClient::from_config(config) {
        Ok(client) => {
            results.push(match client.auth_test().await {
                Ok(auth) => CheckResult::pass(
                    "slack auth",
                    format!(
                        "bot {} ({}) in {}",
                        auth.user.as_deref().unwrap_or("?"),
                        auth.user_id,
                        auth.team.as_deref().unwrap_or("?")
                    ),
                ),
                Err(e) => CheckResult::fail("slack auth", e.to_string()),
            });
            results.push(match client.open_socket_url().await {
                Ok(_) => CheckResult::pass("socket mode", "app token can open connections"),
                Err(e) => CheckResult::fail("socket mode", e.to_string()),
            });
        }
        Err(e) => results.push(CheckResult::fail("slack client", e.to_string())),
    }

    let runner = ClaudeRunner::new(config.claude_bin.clone());
    results.push(match runner.version().await {
        Ok(version) => CheckResult::pass("assistant cli", version),
        Err(e) => CheckResult::fail("assistant cli", e.to_string()),
    });
    results
}

/// Run every check and print the results. True when all passed.
pub async fn run(config: &Config) -> bool {
    let mut results = local_checks(config);
    results.extend(remote_checks(config).await);
    for result in &results {
        println!("{}", result.render());
    }
    let failed = results.iter().filter(|r| !r.ok).count();
    if failed == 0 {
        println!("All {} checks passed", results.len());
    } else {
        println!("{} of {} checks failed", failed, results.len());
    }
    failed == 0
}
