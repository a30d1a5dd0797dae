use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use parley::agents::AgentType;
use parley::config::{self, ClientConfig, FileConfig};

mod cli;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Realtime conversation client and agent session driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom config directory (defaults to the platform config dir)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a conversation on the shared connection and chat over stdin
    Chat(ChatArgs),

    /// Start a session with an agent and print its events until it ends
    Agent(AgentArgs),

    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Parser)]
struct ChatArgs {
    /// Conversation to rejoin (default: a new one)
    #[arg(long)]
    conversation: Option<String>,
}

#[derive(Parser)]
struct AgentArgs {
    #[arg(value_enum)]
    agent_type: AgentType,

    /// Opening message for the session
    #[arg(short, long)]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let dir = config::config_dir(cli.config_dir)?;
    let file_config: FileConfig = config::load_config(&dir)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", dir.display()))?;

    match cli.command {
        Commands::Config => cli::config_command(&file_config),
        Commands::Chat(args) => {
            cli::chat::run(&ClientConfig::from_file(&file_config), args.conversation).await
        }
        Commands::Agent(args) => {
            cli::agent::run(
                &ClientConfig::from_file(&file_config),
                args.agent_type,
                args.message,
            )
            .await
        }
    }
}

/// Logs go to stderr; stdout carries the event stream.
fn init_tracing(debug: bool) {
    let default_directive = if debug {
        "parley=debug,info"
    } else {
        "parley=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}
