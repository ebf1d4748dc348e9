//! Velox CLI - segmented download accelerator
//!
//! A command-line front end over `velox-core`'s `TaskSupervisor`.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use velox_core::EngineConfig;

/// Velox - segmented download accelerator
#[derive(Parser)]
#[command(name = "velox")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Directory segment temp files live in while a download is in flight
    #[arg(long, env = "VELOX_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new download and run it to completion
    Add {
        /// URL to download
        url: String,

        /// Output file path (directory, or directory + file name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of segments for parallel download
        #[arg(short, long)]
        segments: Option<u32>,

        /// Defer the start until this RFC3339 timestamp
        #[arg(long)]
        at: Option<String>,
    },

    /// List tasks currently known to this process
    List {
        /// Show all details
        #[arg(short, long)]
        all: bool,
    },

    /// Show task info
    Info {
        /// Task ID
        id: String,
    },

    /// Pause a task
    Pause {
        /// Task ID
        id: String,
    },

    /// Resume a paused task
    Resume {
        /// Task ID
        id: String,
    },

    /// Cancel a running task
    Cancel {
        /// Task ID
        id: String,
    },

    /// Remove a task's bookkeeping
    Remove {
        /// Task ID
        id: String,

        /// Also delete the downloaded file
        #[arg(long)]
        with_file: bool,
    },

    /// Probe a URL for size and range support without downloading
    Probe {
        /// URLs to probe
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if cli.verbose {
        filter = filter.add_directive("velox_core=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let temp_dir = cli.temp_dir.unwrap_or_else(std::env::temp_dir);
    tokio::fs::create_dir_all(&temp_dir).await?;

    let config = EngineConfig::default();
    let supervisor = velox_core::TaskSupervisor::new(config, temp_dir)?;

    match cli.command {
        Commands::Add {
            url,
            output,
            segments,
            at,
        } => commands::add_download(&supervisor, &url, output, segments, at, cli.output).await?,

        Commands::List { all } => commands::list_tasks(&supervisor, all, cli.output).await?,

        Commands::Info { id } => commands::show_info(&supervisor, &id, cli.output).await?,

        Commands::Pause { id } => commands::pause_task(&supervisor, &id).await?,

        Commands::Resume { id } => commands::resume_task(&supervisor, &id).await?,

        Commands::Cancel { id } => commands::cancel_task(&supervisor, &id).await?,

        Commands::Remove { id, with_file } => {
            commands::remove_task(&supervisor, &id, with_file).await?
        }

        Commands::Probe { urls } => commands::probe_urls(&supervisor, urls, cli.output).await?,
    }

    Ok(())
}
