//! CLI definitions for Conveyor.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Conveyor CLI.
#[derive(Parser)]
#[command(name = "conveyor")]
#[command(about = "Distributed workflow orchestrator")]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the orchestrator: scheduler loops plus the HTTP API
    Run {
        /// API bind address
        #[arg(long, default_value = "127.0.0.1:8080")]
        api_addr: String,

        /// State directory for the durable store (in-memory when omitted)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Scheduling tick in seconds
        #[arg(long, default_value_t = 10)]
        schedule_interval: u64,

        /// Retry-promotion tick in seconds
        #[arg(long, default_value_t = 60)]
        retry_interval: u64,

        /// Completion-monitor tick in seconds
        #[arg(long, default_value_t = 300)]
        monitor_interval: u64,

        /// Lease-reaper tick in seconds
        #[arg(long, default_value_t = 60)]
        reaper_interval: u64,
    },

    /// Run a worker serving one or more task types
    Worker {
        /// Orchestrator base URL for queue access
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        queue_url: String,

        /// Status-callback base URL (defaults to the queue URL)
        #[arg(long)]
        callback_url: Option<String>,

        /// Comma-separated task types to serve
        #[arg(long, default_value = "generic")]
        types: String,

        /// Address this worker advertises in the registry
        #[arg(long, default_value = "127.0.0.1:9000")]
        address: String,
    },

    /// Parse a YAML workflow definition and submit it
    Submit {
        /// Path to the definition file
        file: PathBuf,

        /// Orchestrator base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}
