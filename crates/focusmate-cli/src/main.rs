mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    cache::{handle_cache_command, CacheAction},
    session::{handle_session_command, SessionAction},
    tab::{handle_tab_command, watch_command, TabAction},
};
use focusmate_core::TabId;

#[derive(Parser)]
#[command(name = "focusmate")]
#[command(about = "Pomodoro focus sessions with a relevance-checking assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize focusmate (first-time setup)
    Init {
        /// Overwrite an existing config with defaults
        #[arg(short, long)]
        force: bool,
    },
    /// Run the assistant daemon in the foreground
    Daemon,
    /// Stop the running daemon
    Shutdown,
    #[command(flatten)]
    Session(SessionAction),
    /// Check whether a page fits the focus keywords
    Check {
        /// Page URL
        url: String,
        /// Page title (the page is fetched when omitted)
        #[arg(short, long)]
        title: Option<String>,
        /// Page text excerpt
        #[arg(short, long)]
        snippet: Option<String>,
        /// Focus keywords (defaults to the running session's)
        #[arg(short, long)]
        keywords: Option<String>,
    },
    /// Report browser tab activity to the daemon
    Tab {
        #[command(subcommand)]
        action: TabAction,
    },
    /// Stream assistant events (blocks, grace periods, session changes)
    Watch {
        /// Only this tab's events, plus session-wide ones
        #[arg(short, long)]
        tab: Option<TabId>,
        /// One JSON object per line, for browser bridges
        #[arg(long)]
        json: bool,
    },
    /// Relevance cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !matches!(cli.command, Commands::Daemon) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .format_timestamp_secs()
            .init();
    }

    match cli.command {
        Commands::Init { force } => commands::init::init_command(force),
        Commands::Daemon => commands::daemon::run_daemon().await,
        Commands::Shutdown => commands::daemon::shutdown_daemon().await,
        Commands::Session(action) => handle_session_command(action).await,
        Commands::Check {
            url,
            title,
            snippet,
            keywords,
        } => commands::check::check_command(url, title, snippet, keywords).await,
        Commands::Tab { action } => handle_tab_command(action).await,
        Commands::Watch { tab, json } => watch_command(tab, json).await,
        Commands::Cache { action } => handle_cache_command(action).await,
    }
}
