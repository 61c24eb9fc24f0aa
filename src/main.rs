//! chatterm - a full-screen terminal chat client.
//!
//! Messages typed at the prompt are sent to an OpenAI-compatible completion
//! endpoint and the reply is streamed back into the transcript as it arrives.

mod app;
mod clipboard;
mod config;
mod llm;
mod logging;
mod message;
mod pipeline;
mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command as ProcessCommand;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "chatterm")]
#[command(author, version, about = "A full-screen terminal chat client for LLM completion endpoints")]
struct Cli {
    /// Config file to use (default: ./config.toml, then ~/.config/chatterm/config.toml)
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Append logs to this file instead of the default cache location
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive chat interface
    Chat,
    /// Open the configuration file in $EDITOR
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat => handle_chat(cli.config.as_deref(), cli.log_file).await,
        Commands::Config => handle_config(cli.config.as_deref()),
    }
}

/// Load the configuration, build the client and run the UI.
async fn handle_chat(config_path: Option<&Path>, log_file: Option<PathBuf>) -> Result<()> {
    let log_path = logging::init(log_file)?;

    let config = match config::Config::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return Err(e.context("Failed to load configuration"));
        }
    };
    info!(
        "Starting chat (model: {}, endpoint: {}, mode: {}, log: {})",
        config.model,
        config.api_url,
        config.mode_label(),
        log_path.display()
    );

    let config = Arc::new(config);
    let client = llm::create_client(&config).context("Failed to create completion client")?;
    let unsent = tui::run(config, client).await?;

    // Echo the draft so it is not lost with the alternate screen.
    if !unsent.is_empty() {
        println!("{}", unsent);
    }
    Ok(())
}

/// Handle the config command.
fn handle_config(config_path: Option<&Path>) -> Result<()> {
    let config_path = config::Config::resolve_path(config_path)?;

    // Create a template if it doesn't exist
    if !config_path.exists() {
        config::Config::default().save(&config_path)?;
        println!("Created config template at {}", config_path.display());
        println!("Set api_key before starting a chat.");
    }

    // Open in editor
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let status = ProcessCommand::new(&editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        eprintln!("Editor exited with non-zero status");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["chatterm", "chat", "--config", "my.toml"]).unwrap();
        assert!(matches!(cli.command, Commands::Chat));
        assert_eq!(cli.config, Some(PathBuf::from("my.toml")));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["chatterm"]).is_err());
    }
}
