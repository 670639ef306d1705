//! Conveyor — distributed workflow orchestrator.
//!
//! Main entry point for the orchestrator, worker and submit commands.

mod cli;
mod server;

use std::time::Duration;

use clap::Parser;

use cli::{Cli, Commands};
use conveyor_scheduler::SchedulerConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            api_addr,
            data_dir,
            schedule_interval,
            retry_interval,
            monitor_interval,
            reaper_interval,
        } => {
            let log_dir = data_dir.as_ref().map(|d| d.join("logs"));
            server::init_tracing(log_dir.as_deref())?;
            let config = SchedulerConfig {
                schedule_interval: Duration::from_secs(schedule_interval),
                retry_interval: Duration::from_secs(retry_interval),
                monitor_interval: Duration::from_secs(monitor_interval),
                reaper_interval: Duration::from_secs(reaper_interval),
            };
            server::run_orchestrator(api_addr, data_dir, config).await
        }
        Commands::Worker {
            queue_url,
            callback_url,
            types,
            address,
        } => {
            server::init_tracing(None)?;
            server::run_worker(queue_url, callback_url, types, address).await
        }
        Commands::Submit { file, url } => {
            server::init_tracing(None)?;
            server::run_submit(file, url).await
        }
    }
}
