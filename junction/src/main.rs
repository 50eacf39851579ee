use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;
use tracing_subscriber::EnvFilter;

use junction::config::{self, CoordinatorConfig, RetryPolicy};
use junction::{build_router, monitor, run_forwarder, AppState, Coordinator, MergerClient};

#[derive(Parser, Debug)]
#[command(name = "junction")]
#[command(about = "Coordinador: reparte tareas y junta los resultados parciales")]
struct Args {
    #[arg(long, env = "JUNCTION_API_ADDR", default_value = config::DEFAULT_API_ADDR)]
    api_addr: SocketAddr,

    #[arg(long, env = "JUNCTION_MERGER_URL", default_value = config::DEFAULT_MERGER_URL)]
    merger_url: String,

    /// Redespachos por tarea después del primer intento
    #[arg(long, env = "JUNCTION_MAX_RETRIES", default_value_t = config::MAX_TASK_RETRIES)]
    max_retries: u32,

    #[arg(long, env = "JUNCTION_TASK_TIMEOUT_SECS", default_value_t = config::TASK_TIMEOUT.as_secs())]
    task_timeout_secs: u64,

    #[arg(long, env = "JUNCTION_BACKOFF_BASE_MS", default_value_t = config::BACKOFF_BASE.as_millis() as u64)]
    backoff_base_ms: u64,

    #[arg(long, env = "JUNCTION_BACKOFF_MAX_MS", default_value_t = config::BACKOFF_MAX.as_millis() as u64)]
    backoff_max_ms: u64,

    #[arg(long, env = "JUNCTION_WORKER_TIMEOUT_SECS", default_value_t = config::WORKER_DEAD_TIMEOUT.as_secs())]
    worker_timeout_secs: u64,
}

impl Args {
    fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff_base: Duration::from_millis(self.backoff_base_ms),
                backoff_max: Duration::from_millis(self.backoff_max_ms),
            },
            task_timeout: Duration::from_secs(self.task_timeout_secs),
            worker_timeout: Duration::from_secs(self.worker_timeout_secs),
            ..CoordinatorConfig::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("junction=debug,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.coordinator_config();
    info!("configuración: {:?}", config);

    let (merger_tx, merger_rx) = unbounded_channel();
    let coordinator = Arc::new(Coordinator::new(config, merger_tx));
    let state = AppState::new(coordinator.clone());

    // reenvío de aportes al merger
    let client = MergerClient::new(args.merger_url.clone());
    tokio::spawn(run_forwarder(coordinator, merger_rx, client));

    // monitor de heartbeats en segundo plano
    tokio::spawn(monitor::monitor_workers(state.clone()));

    let app = build_router(state);

    let listener = TcpListener::bind(args.api_addr)
        .await
        .with_context(|| format!("no se pudo escuchar en {}", args.api_addr))?;
    info!(
        "junction escuchando en {} (merger en {})",
        listener.local_addr()?,
        args.merger_url
    );

    axum::serve(listener, app).await?;
    Ok(())
}
