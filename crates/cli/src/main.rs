//! agentweave CLI: the main entry point.
//!
//! Commands:
//! - `init`: Write the default config file
//! - `import`: Store an agent definition from a JSON file
//! - `create`: Start a new agent instance
//! - `list`: List agent instances
//! - `history`: Show an instance's stored messages
//! - `prompt`: Print the prompt the next round would send
//! - `close`: Close an instance
//! - `delete`: Delete an instance and its messages

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "agentweave",
    about = "agentweave - inspect and manage agent conversations",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.agentweave/config.toml
    #[arg(long, global = true, env = "AGENTWEAVE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Import an agent definition from a JSON file
    Import {
        /// Path to the definition JSON
        path: PathBuf,
    },

    /// Create an agent instance from a stored definition
    Create {
        /// Definition id
        #[arg(short, long)]
        definition: String,

        /// Display name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List agent instances
    List {
        /// Include closed instances
        #[arg(short, long)]
        all: bool,
    },

    /// Show the stored messages of an instance
    History {
        instance: String,
    },

    /// Print the flattened prompt the next round would send
    Prompt {
        instance: String,
    },

    /// Close an instance
    Close {
        instance: String,
    },

    /// Delete an instance and all of its messages
    Delete {
        instance: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = commands::load_config(cli.config.as_deref())?;

    // Initialize tracing
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Init { force } => commands::init::run(cli.config.as_deref(), force).await?,
        Commands::Import { path } => commands::manage::import(&config, &path).await?,
        Commands::Create { definition, name } => {
            commands::manage::create(&config, &definition, name).await?
        }
        Commands::List { all } => commands::inspect::list(&config, all).await?,
        Commands::History { instance } => commands::inspect::history(&config, &instance).await?,
        Commands::Prompt { instance } => commands::inspect::prompt(&config, &instance).await?,
        Commands::Close { instance } => commands::manage::close(&config, &instance).await?,
        Commands::Delete { instance } => commands::manage::delete(&config, &instance).await?,
    }

    Ok(())
}
