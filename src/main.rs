//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the frame-loop runner and the profiling report.
//! Handles shared concerns: structured logging setup, configuration
//! resolution (file, then flags), and the global allocator.

mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "lockstep", about = "Lock-free frame-based task scheduler demo")]
struct Cli {
    /// Path to a TOML config file (flags below override it)
    #[arg(long, env = "LOCKSTEP_CONFIG")]
    config: Option<PathBuf>,

    /// Number of worker threads (0 = all hardware threads, capped at 32)
    #[arg(long, env = "LOCKSTEP_THREADS")]
    threads: Option<u32>,

    /// Number of active task stacks (5..=8 for the demo)
    #[arg(long)]
    active_stacks: Option<u32>,

    /// Stop after this many executed tasks
    #[arg(long)]
    shutdown_after: Option<u64>,

    /// Seconds between progress lines (0 disables the reporter)
    #[arg(long)]
    report_interval: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the demo frame loop until shutdown
    Run {
        /// Simulate an escape press after this many pumped frames
        #[arg(long)]
        quit_after_frames: Option<u64>,

        /// Write the profiling dump here (needs --features profiling)
        #[arg(long)]
        profile_out: Option<PathBuf>,
    },
    /// Summarize a profiling dump
    Report {
        /// Path to a dump written by `run --profile-out`
        #[arg(long)]
        input: PathBuf,
    },
}

fn main() -> Result<()> {
    // Structured logging: LOG_FORMAT=json for machine ingestion,
    // human-readable otherwise.
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt().json().with_target(false).init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { .. } => cli::run(&cli),
        Commands::Report { input } => cli::report(input),
    }
}
