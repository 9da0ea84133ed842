//! revline - concurrent literature acquisition for systematic reviews
//!
//! Fans search queries out across scholarly sources under per-source
//! rate limits, resumes interrupted fetches from the page cache, and
//! merges the combined corpus into a deduplicated canonical set.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Result;
use clap::{Parser, Subcommand};

use revline_core::{ProgressContext, init_logging, shutdown_flag};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "revline")]
#[command(about = "Concurrent literature acquisition for systematic reviews")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./revline.toml or ~/.config/revline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run search tasks across scholarly sources
    Search(cmd::search::SearchArgs),
    /// Deduplicate a corpus of paper records
    Dedup(cmd::dedup::DedupArgs),
    /// Show tasks recorded in the queue journal
    Status(cmd::status::StatusArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let progress = Arc::new(ProgressContext::new());
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    // TTY: quiet unless --debug (the status line shows activity);
    // non-TTY: logs are the only progress indicator
    let quiet = is_tty && !cli.debug;
    init_logging(quiet, cli.debug, multi);

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("configuration error: {e:#}");
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Command::Search(args) => {
            setup_signal_handler();
            cmd::search::run(args, &config, &progress)
        }
        Command::Dedup(args) => cmd::dedup::run(args),
        Command::Status(args) => cmd::status::run(args, &config),
        Command::Config => cmd::show_config(&config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
}

fn setup_signal_handler() {
    // First signal: set graceful shutdown flag
    // Second signal: force exit (default SIGINT behavior restored)
    // SAFETY: AtomicBool::store and process::exit are async-signal-safe
    unsafe {
        signal_hook::low_level::register(signal_hook::consts::SIGTERM, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .expect("Failed to register SIGTERM handler");
        signal_hook::low_level::register(signal_hook::consts::SIGINT, || {
            if shutdown_flag().swap(true, Ordering::Relaxed) {
                std::process::exit(130);
            }
        })
        .expect("Failed to register SIGINT handler");
    }
}
