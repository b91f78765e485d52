//! Chorus CLI: the main entry point.
//!
//! Commands:
//! - `chat`    Interactive multi-persona chat with live streaming
//! - `send`    Send one message and print the answer
//! - `models`  List models served behind an endpoint
//! - `detect`  Show which wire dialect a URL speaks
//! - `config`  Print the default config, its path, or validate it

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "chorus",
    about = "Chorus: multi-persona agent runtime for local and hosted model backends",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat interactively with the configured personas
    Chat {
        /// Persona to talk to first
        #[arg(short, long)]
        persona: Option<String>,
    },

    /// Send a single message and print the answer
    Send {
        /// The message text
        message: String,

        /// Persona to address (defaults to the first configured)
        #[arg(short, long)]
        persona: Option<String>,
    },

    /// List models served behind an endpoint
    Models {
        /// Override the configured endpoint
        #[arg(short, long)]
        endpoint: Option<String>,
    },

    /// Show which wire dialect a URL speaks
    Detect {
        url: String,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a default config file
    Default,
    /// Print the config file path
    Path,
    /// Load and validate the current config
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat { persona } => commands::chat::run(persona).await?,
        Commands::Send { message, persona } => commands::send::run(message, persona).await?,
        Commands::Models { endpoint } => commands::models::run(endpoint).await?,
        Commands::Detect { url } => commands::detect::run(&url)?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Default) {
            ConfigAction::Default => commands::config_cmd::print_default()?,
            ConfigAction::Path => commands::config_cmd::path()?,
            ConfigAction::Validate => commands::config_cmd::validate()?,
        },
    }

    Ok(())
}
