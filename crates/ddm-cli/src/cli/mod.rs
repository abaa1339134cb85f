//! CLI for the DDM download manager.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use ddm_core::config;
use ddm_core::manager::Manager;
use ddm_core::queue::Priority;
use ddm_core::resume_db::ResumeDb;
use ddm_core::storage;
use std::path::Path;

use commands::{
    run_add, run_bench, run_checksum, run_import_har, run_pause, run_remove, run_resume,
    run_scheduler, run_status,
};

/// Top-level CLI for the DDM download manager.
#[derive(Debug, Parser)]
#[command(name = "ddm")]
#[command(about = "DDM: high-throughput segmented download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

/// Admission priority as exposed on the command line; maps 1:1 onto
/// `ddm_core::queue::Priority`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliPriority {
    Low,
    Normal,
    High,
}

impl From<CliPriority> for Priority {
    fn from(p: CliPriority) -> Self {
        match p {
            CliPriority::Low => Priority::Low,
            CliPriority::Normal => Priority::Normal,
            CliPriority::High => Priority::High,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add a new download and enqueue it.
    Add {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory where the file will be saved (default: current directory). Stored with the item so resume works from any working directory.
        #[arg(long, value_name = "DIR")]
        download_dir: Option<std::path::PathBuf>,
        /// Admission priority within the queue.
        #[arg(long, value_enum, default_value_t = CliPriority::Normal)]
        priority: CliPriority,
    },

    /// Drain the admission queue, downloading with bounded concurrency.
    Run,

    /// Show status of all downloads.
    Status,

    /// Pause the queue. Already-active downloads are unaffected; no new ones start until `resume`.
    Pause,

    /// Resume the queue, allowing waiting downloads to be admitted again.
    Resume,

    /// Remove a download by hash. With --delete-files, also deletes its downloaded file.
    Remove {
        /// Download hash, as printed by `status` or `add`.
        hash: String,
        /// Also delete the download's file from disk.
        #[arg(long)]
        delete_files: bool,
    },

    /// Import a HAR file and register a download from it.
    ImportHar {
        /// Path to the HAR file.
        path: String,

        /// Allow persisting cookies extracted from the HAR (if needed).
        #[arg(long)]
        allow_cookies: bool,
    },

    /// Report the part count calibration and per-host adaptive policy would pick for a URL.
    Bench {
        /// Direct HTTP/HTTPS URL to benchmark.
        url: String,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: String,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        let db = ResumeDb::open_default().await?;
        let data_root = storage::default_scratch_root()?;
        let manager = Manager::init(cfg.clone(), db, data_root).await?;

        match cli.command {
            CliCommand::Add { url, download_dir, priority } => {
                run_add(&manager, &cfg, &url, download_dir.as_deref(), priority.into()).await?
            }
            CliCommand::Run => run_scheduler(&manager, &cfg).await?,
            CliCommand::Status => run_status(&manager).await?,
            CliCommand::Pause => run_pause(&manager, cfg.default_queue_max_concurrent).await?,
            CliCommand::Resume => run_resume(&manager, cfg.default_queue_max_concurrent).await?,
            CliCommand::Remove { hash, delete_files } => {
                run_remove(&manager, &hash, delete_files, cfg.default_queue_max_concurrent).await?
            }
            CliCommand::ImportHar { path, allow_cookies } => {
                run_import_har(&manager, &cfg, Path::new(&path), allow_cookies).await?;
            }
            CliCommand::Bench { url } => run_bench(&url).await?,
            CliCommand::Checksum { path } => run_checksum(Path::new(&path)).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
