use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "garrison")]
#[command(version, about = "Dedicated game-server lifecycle manager")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to garrison.toml (defaults to $XDG_CONFIG_HOME/garrison/garrison.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Give up on the operation after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Server selection shared by every lifecycle verb.
#[derive(Args, Clone, Debug)]
pub struct Target {
    /// Server key (see `garrison list`)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Isolation mode: none, service, container (defaults to the recorded mode)
    #[arg(short, long)]
    pub isolation: Option<String>,

    /// Install directory (defaults to $XDG_DATA_HOME/garrison/<server>)
    #[arg(long)]
    pub install_dir: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct LaunchArgs {
    /// Server config file
    #[arg(long = "server-config")]
    pub server_config: Option<PathBuf>,

    /// Profile directory
    #[arg(long)]
    pub profile: Option<PathBuf>,

    #[arg(long, default_value = "20001")]
    pub port: u16,

    #[arg(long, default_value = "27016")]
    pub query_port: u16,

    #[arg(long, default_value = "17777")]
    pub browser_port: u16,

    /// Extra arguments passed to the server, split on whitespace
    #[arg(long, allow_hyphen_values = true)]
    pub extra: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the server files, validating them
    Install {
        #[command(flatten)]
        target: Target,
    },
    /// Update the server files without validation
    Update {
        #[command(flatten)]
        target: Target,
    },
    /// Launch the server
    Start {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        launch: LaunchArgs,
    },
    /// Stop the server
    Stop {
        #[command(flatten)]
        target: Target,
    },
    /// Report whether the server is running
    Status {
        #[command(flatten)]
        target: Target,
    },
    /// Stop the server and remove its files
    Delete {
        #[command(flatten)]
        target: Target,
    },
    /// List known servers and their recorded isolation modes
    List,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = match garrison::logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    let code = match run(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("{} {:#}", console::style("error:").red().bold(), e);
            1
        }
    };
    // exit() skips destructors; flush the file writer first.
    drop(guard);
    std::process::exit(code);
}

async fn run(cli: &Cli) -> Result<()> {
    let env = cmd::Env::load(cli)?;

    match &cli.command {
        Commands::Install { target } => cmd::cmd_install(&env, target).await,
        Commands::Update { target } => cmd::cmd_update(&env, target).await,
        Commands::Start { target, launch } => cmd::cmd_start(&env, target, launch).await,
        Commands::Stop { target } => cmd::cmd_stop(&env, target).await,
        Commands::Status { target } => cmd::cmd_status(&env, target).await,
        Commands::Delete { target } => cmd::cmd_delete(&env, target).await,
        Commands::List => cmd::cmd_list(&env),
        Commands::Config { command } => cmd::cmd_config(&env, command.clone()),
    }
}
