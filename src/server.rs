//! Process wiring: tracing setup and the orchestrator/worker/submit runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use conveyor_api::{ApiConfig, ApiServer, ApiState};
use conveyor_core::WorkflowDefinition;
use conveyor_queue::{HttpWorkQueue, MemoryWorkQueue, QueueConfig, WorkQueue};
use conveyor_scheduler::{Scheduler, SchedulerConfig};
use conveyor_store::{FileStore, MemoryStore, StateStore};
use conveyor_worker::{
    EchoExecutor, ExecutorRegistry, HttpStatusReporter, WorkerConfig, WorkerRuntime,
};

/// Initialize tracing with console output and, when a state directory is
/// configured, a daily-rolling file layer under `{data_dir}/logs`.
pub(crate) fn init_tracing(log_dir: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true));

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("conveyor")
                .filename_suffix("log")
                .max_log_files(30)
                .build(dir)?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // Keep the writer guard alive for the process lifetime.
            static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
                std::sync::OnceLock::new();
            let _ = GUARD.set(guard);

            registry
                .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                .init();
        }
        None => registry.init(),
    }
    Ok(())
}

/// Run the orchestrator until ctrl-c.
pub(crate) async fn run_orchestrator(
    api_addr: String,
    data_dir: Option<PathBuf>,
    config: SchedulerConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("starting conveyor v{}", env!("CARGO_PKG_VERSION"));

    let store: Arc<dyn StateStore> = match &data_dir {
        Some(dir) => {
            info!("using file store at {}", dir.display());
            Arc::new(FileStore::new(dir.clone()).await?)
        }
        None => {
            warn!("no --data-dir given, workflow state will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };
    let queue: Arc<dyn WorkQueue> = Arc::new(MemoryWorkQueue::new(QueueConfig::default()));

    let scheduler = Arc::new(Scheduler::new(store.clone(), queue.clone(), config));
    let loop_handles = scheduler.start();

    let (host, port) = split_addr(&api_addr)?;
    let state = Arc::new(ApiState::new(scheduler.clone(), store, queue));
    let server = ApiServer::new(ApiConfig::new(host, port), state);

    info!("conveyor ready on http://{api_addr}");
    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
        })
        .await?;

    scheduler.stop();
    for handle in loop_handles {
        let _ = handle.await;
    }
    info!("orchestrator stopped");
    Ok(())
}

/// Run a worker until ctrl-c.
pub(crate) async fn run_worker(
    queue_url: String,
    callback_url: Option<String>,
    types: String,
    address: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let callback_url = callback_url.unwrap_or_else(|| queue_url.clone());
    let queue: Arc<dyn WorkQueue> = Arc::new(HttpWorkQueue::new(queue_url));
    let reporter = Arc::new(HttpStatusReporter::new(callback_url));

    // Task bodies are deployment-specific; the stock binary wires the echo
    // body for every served type.
    let mut executors = ExecutorRegistry::new();
    for task_type in types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        executors = executors.register(task_type, Arc::new(EchoExecutor));
    }

    let worker = Arc::new(WorkerRuntime::new(
        address,
        queue,
        reporter,
        executors,
        WorkerConfig::default(),
    ));
    let handles = worker.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    worker.stop();
    for handle in handles {
        let _ = handle.await;
    }
    info!("worker stopped");
    Ok(())
}

/// Parse a YAML definition and submit it to a running orchestrator.
pub(crate) async fn run_submit(
    file: PathBuf,
    url: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let workflow = WorkflowDefinition::load_file(&file)?.into_workflow()?;
    info!(
        "submitting '{}' ({} tasks) to {url}",
        workflow.name,
        workflow.tasks.len()
    );

    let body = serde_json::json!({
        "name": workflow.name,
        "description": workflow.description,
        "config": workflow.config,
        "tasks": workflow.tasks.iter().map(|t| serde_json::json!({
            "name": t.name,
            "type": t.task_type,
            "payload": t.payload,
            "max_retries": t.max_retries,
            "priority": t.priority,
            "dependencies": t.dependencies,
        })).collect::<Vec<_>>(),
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/api/v1/workflows", url.trim_end_matches('/')))
        .json(&body)
        .timeout(Duration::from_secs(10))
        .send()
        .await?;

    let status = response.status();
    let payload: serde_json::Value = response.json().await?;
    if !status.is_success() {
        return Err(format!("submission failed ({status}): {payload}").into());
    }
    println!("created workflow {}", payload["id"].as_str().unwrap_or("?"));
    Ok(())
}

fn split_addr(addr: &str) -> Result<(String, u16), Box<dyn std::error::Error>> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| format!("invalid bind address '{addr}', expected host:port"))?;
    Ok((host.to_string(), port.parse()?))
}
