mod config;
mod runner;
mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::CommandSet;
use crate::runner::RunDir;
use crate::worker::WorkerConfig;

const DEFAULT_WORKER_CONCURRENCY: u32 = 2;

/// Executor de referencia para junction.
#[derive(Parser, Debug)]
#[command(name = "worker")]
struct Args {
    /// URL base del coordinador
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:7749")]
    master_url: String,

    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = DEFAULT_WORKER_CONCURRENCY)]
    concurrency: u32,

    /// YAML con los comandos (slug, cmd, args) que este worker puede correr
    #[arg(long, env = "WORKER_COMMANDS")]
    commands: Option<PathBuf>,

    /// Directorio de trabajo de los comandos; se crea si no existe
    #[arg(long, env = "WORKER_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("worker=debug,reqwest=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let commands = match &args.commands {
        Some(path) => CommandSet::from_yaml_file(path)
            .with_context(|| format!("cargando comandos de {}", path.display()))?,
        None => CommandSet::default(),
    };
    let run_dir = RunDir::prepare(&args.data_dir)
        .with_context(|| format!("preparando el directorio de datos {}", args.data_dir.display()))?;

    worker::run(WorkerConfig {
        master_url: args.master_url,
        concurrency: args.concurrency,
        commands,
        run_dir,
    })
    .await
}
