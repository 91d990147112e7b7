//! Relay server: bot startup, logging, and the `check` self-test. Slack and the assistant live in relay-core.

pub mod check;
pub mod logging;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use relay_core::config::Config;
use relay_core::headless::{AssistantRunner, ClaudeRunner};
use relay_core::im::slack::run_slack_bot;
use relay_core::workspace::setup_workspace;

/// Prepare the workspace, then run the Slack bot until Ctrl+C / SIGTERM.
pub async fn run_bot(config: Config) -> anyhow::Result<()> {
    warn_token_problems(&config);
    let workspace = setup_workspace(&config.workspace_dir)
        .with_context(|| format!("Failed to create workspace {}", config.workspace_dir.display()))?;
    info!(workspace = %workspace.display(), "Workspace ready");

    match config.mcp_config() {
        Some(path) => info!(path = %path.display(), "MCP config found, passing it to the assistant"),
        None => info!(path = %config.mcp_config_path.display(), "No MCP config, running without MCP servers"),
    }
    info!(default = %config.default_repo_path.display(), "Default repository");
    for repo in &config.repositories {
        if repo.path.is_dir() {
            info!(alias = %repo.alias, path = %repo.path.display(), "Repository alias");
        } else {
            warn!(alias = %repo.alias, path = %repo.path.display(), "Repository path does not exist");
        }
    }
    if let Some(model) = &config.anthropic_model {
        info!(model = %model, "Assistant model override");
    }

    let runner: Arc<dyn AssistantRunner> = Arc::new(ClaudeRunner::new(config.claude_bin.clone()));
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    info!("Starting Slack bot, press Ctrl+C to stop");
    run_slack_bot(Arc::new(config), runner, shutdown)
        .await
        .context("Slack bot failed")
}

/// Log suspicious token prefixes. Runs after the subscriber is installed; returns how many were found.
fn warn_token_problems(config: &Config) -> usize {
    let problems = config.token_format_problems();
    for problem in &problems {
        warn!("{}", problem);
    }
    problems.len()
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
