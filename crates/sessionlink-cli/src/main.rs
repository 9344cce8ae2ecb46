//! SessionLink CLI - serve a session or call into whichever process owns it.
//!
//! Logs go to stderr; stdout carries only results so scripts can parse them.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sessionlink_core::config::{self, AppConfig};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "sessionlink")]
#[command(about = "Single-owner session coordination over a shared mailbox")]
struct Args {
    /// Coordination root shared by all instances
    #[arg(long, global = true, env = AppConfig::ROOT_ENV_VAR)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Own the session (or stand by until the current owner goes away)
    Serve {
        /// Fixture file backing the session
        #[arg(long)]
        fixture: PathBuf,

        /// Poll the mailbox on a timer only, without filesystem notifications
        #[arg(long)]
        no_watch: bool,
    },

    /// Run one operation through the current primary
    Call {
        /// Operation name, e.g. listChats
        operation: String,

        /// Params as a JSON object
        #[arg(default_value = "{}")]
        params: String,

        /// Override the operation's default timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Show readiness and ownership without contacting the primary
    Status,

    /// Show the raw lease and whether it is stale
    Lease,
}

fn init_logging(debug: bool, json: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let root = match args.root {
        Some(root) => root,
        None => config::default_root().context("Could not determine a data directory; pass --root")?,
    };

    match args.command {
        Command::Serve { fixture, no_watch } => commands::serve(&root, &fixture, !no_watch).await,
        Command::Call {
            operation,
            params,
            timeout_ms,
        } => commands::call(&root, &operation, &params, timeout_ms).await,
        Command::Status => commands::status(&root).await,
        Command::Lease => commands::lease(&root),
    }
}
