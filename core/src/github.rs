//! GitHub API client for opening pull requests after a `/pr` run.
//! The assistant pushes a branch and names it on a `BRANCH: <name>` line; the relay opens the PR itself.

use std::path::Path;

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::process::Command as TokioCommand;

use crate::im::commands::BRANCH_MARKER;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("claude-slack-relay/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

pub struct GitHubClient {
    client: reqwest::Client,
    token: SecretString,
    base_url: String,
}

impl GitHubClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_base_url(token, DEFAULT_API_BASE)
    }

    /// Client against another API root (GitHub Enterprise, or a mock server in tests).
    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            token: SecretString::from(token.to_string()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn create_pull_request(&self, owner: &str, repo: &str, pr: &NewPullRequest) -> Result<PullRequest> {
        let url = format!("{}/repos/{}/{}/pulls", self.base_url, owner, repo);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .header("Accept", "application/vnd.github+json")
            .json(pr)
            .send()
            .await
            .context("Failed to send pull request creation request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                .unwrap_or(body);
            bail!("GitHub API error ({}): {}", status, message);
        }

        response
            .json::<PullRequest>()
            .await
            .context("Failed to parse pull request response")
    }
}

/// `(owner, repo)` from a GitHub remote URL (https, ssh, or scp-style). None for other hosts.
pub fn parse_github_remote(url: &str) -> Option<(String, String)> {
    let normalized = url.trim().trim_end_matches('/').trim_end_matches(".git");
    let path = ["https://github.com/", "http://github.com/", "ssh://git@github.com/", "git@github.com:"]
        .iter()
        .find_map(|prefix| normalized.strip_prefix(prefix))?;

    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// URL of the `origin` remote of the repository at `repo_path`.
pub async fn origin_remote(repo_path: &Path) -> Result<String> {
    let output = TokioCommand::new("git")
        .arg("-C")
        .arg(repo_path)
        .args(["remote", "get-url", "origin"])
        .output()
        .await
        .context("Failed to run git")?;
    if !output.status.success() {
        bail!(
            "git remote get-url origin failed in {}: {}",
            repo_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Split the assistant reply into its visible text and the branch named on the last `BRANCH:` line.
/// Marker lines are removed from the text.
pub fn split_branch_marker(text: &str) -> (String, Option<String>) {
    let mut branch = None;
    let mut kept = Vec::new();
    let decoration = |c: char| c == '*' || c == '`' || c.is_whitespace();
    for line in text.lines() {
        match line.trim_matches(decoration).strip_prefix(BRANCH_MARKER) {
            Some(rest) => {
                let name = rest.trim_matches(decoration);
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    branch = Some(name.to_string());
                }
            }
            None => kept.push(line),
        }
    }
    (kept.join("\n").trim_end().to_string(), branch)
}
