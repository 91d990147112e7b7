//! Relay binary. `claude-slack-relay` runs the bot; `claude-slack-relay check` verifies the setup and exits.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use relay_core::config::Config;
use relay_core::error::ConfigError;
use relay_server::{check, logging};

#[derive(Parser)]
#[command(name = "claude-slack-relay")]
#[command(about = "Relay Slack mentions, DMs and slash commands to the Claude Code CLI")]
#[command(version)]
struct Args {
    /// Env file loaded before reading configuration (defaults to ./.env when present)
    #[arg(long, env = "RELAY_ENV_FILE")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the Slack bot (default)
    Run,
    /// Check tokens, Slack auth, the assistant CLI and directories, then exit
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let env_loaded = match &args.env_file {
        Some(path) => dotenvy::from_path(path).map(|_| Some(path.clone())),
        None => Ok(dotenvy::dotenv().ok()),
    };

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            let _guard = logging::init(false, None);
            for problem in config_problems(&e) {
                error!("Configuration error: {}", problem);
            }
            error!("Set the variables above (see .env.example) and restart");
            return ExitCode::FAILURE;
        }
    };

    if matches!(args.command, Some(Command::Check)) {
        return if check::run(&config).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    let _guard = logging::init(config.debug, Some(&config.log_file));
    match env_loaded {
        Ok(Some(path)) => info!(path = %path.display(), "Loaded environment file"),
        Ok(None) => {}
        Err(e) => error!(error = %e, "Failed to load environment file"),
    }

    if let Err(e) = relay_server::run_bot(config).await {
        error!("Bot stopped with error: {:#}", e);
        return ExitCode::FAILURE;
    }
    info!("Bot stopped");
    ExitCode::SUCCESS
}

fn config_problems(error: &ConfigError) -> Vec<String> {
    match error {
        ConfigError::Multiple(errors) => errors.iter().flat_map(config_problems).collect(),
        other => vec![other.to_string()],
    }
}
