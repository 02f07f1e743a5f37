//! Command line interface.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sitewatch")]
#[command(about = "Web page change monitoring and notification service")]
#[command(version)]
pub struct Cli {
    /// Config file path (default: sitewatch.toml in the working directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage monitored sites
    Site {
        #[command(subcommand)]
        command: SiteCommands,
    },

    /// Check one site now, bypassing its due-time
    Check {
        /// Site ID to check
        site_id: i64,
    },

    /// Check every enabled site now
    CheckAll,

    /// Run the periodic check scheduler
    Run,

    /// Show monitoring status
    Status,

    /// Show recent checks for a site
    History {
        /// Site ID
        site_id: i64,
        /// Number of records to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum SiteCommands {
    /// Register a site for monitoring
    Add {
        /// Page URL to monitor
        url: String,
        /// Display name
        #[arg(short, long)]
        name: String,
        /// Owner reference
        #[arg(short, long, default_value = "")]
        owner: String,
        /// Check interval in seconds (minimum 60)
        #[arg(short, long, default_value = "3600")]
        interval: u64,
        /// CSS selector restricting monitoring to a sub-element
        #[arg(short, long)]
        selector: Option<String>,
        /// Comma-separated trigger keywords
        #[arg(short, long, default_value = "")]
        keywords: String,
    },

    /// List registered sites
    List,

    /// Re-enable a disabled site
    Enable { site_id: i64 },

    /// Soft-disable a site, preserving its history
    Disable { site_id: i64 },

    /// Subscribe a recipient to a site's change alerts
    Subscribe {
        site_id: i64,
        /// Email address for the email channel
        #[arg(long)]
        email: Option<String>,
        /// LINE user ID for the push channel
        #[arg(long)]
        line_user: Option<String>,
    },
}

/// Parse arguments and dispatch to the command handlers.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = crate::config::Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::init(&settings),
        Commands::Site { command } => match command {
            SiteCommands::Add {
                url,
                name,
                owner,
                interval,
                selector,
                keywords,
            } => commands::site_add(&settings, url, name, owner, interval, selector, keywords).await,
            SiteCommands::List => commands::site_list(&settings).await,
            SiteCommands::Enable { site_id } => {
                commands::site_set_enabled(&settings, site_id, true).await
            }
            SiteCommands::Disable { site_id } => {
                commands::site_set_enabled(&settings, site_id, false).await
            }
            SiteCommands::Subscribe {
                site_id,
                email,
                line_user,
            } => commands::site_subscribe(&settings, site_id, email, line_user).await,
        },
        Commands::Check { site_id } => commands::check(&settings, site_id).await,
        Commands::CheckAll => commands::check_all(&settings).await,
        Commands::Run => commands::run_scheduler(&settings).await,
        Commands::Status => commands::status(&settings).await,
        Commands::History { site_id, limit } => commands::history(&settings, site_id, limit).await,
    }
}
