use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::MergeRule;
use junction_merger::{build_router, fetch::fetch_content, merge_parts, Merger, Part};

#[derive(Parser)]
#[command(name = "junction-merger")]
#[command(about = "Ensambla los resultados parciales de los jobs de junction")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum MergeType {
    Json,
    Plaintext,
    Ini,
    Sum,
}

impl From<MergeType> for MergeRule {
    fn from(t: MergeType) -> Self {
        match t {
            MergeType::Json => MergeRule::Json,
            MergeType::Plaintext => MergeRule::default(),
            MergeType::Ini => MergeRule::Ini,
            MergeType::Sum => MergeRule::Sum,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Servicio que recibe los mensajes del coordinador
    Serve {
        #[arg(long, env = "JUNCTION_MERGER_API_ADDR", default_value = junction_merger::DEFAULT_API_ADDR)]
        api_addr: SocketAddr,
    },
    /// Merge puntual de archivos o URLs, en el orden dado
    Merge {
        #[arg(required = true, num_args = 1..)]
        sources: Vec<String>,

        #[arg(short = 't', long = "type", value_enum)]
        merge_type: MergeType,

        /// Archivo de salida (por defecto stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("junction_merger=debug,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    match Cli::parse().command {
        Commands::Serve { api_addr } => {
            let app = build_router(Arc::new(Merger::new()));
            let listener = TcpListener::bind(api_addr)
                .await
                .with_context(|| format!("no se pudo escuchar en {}", api_addr))?;
            info!("merger escuchando en {}", listener.local_addr()?);
            axum::serve(listener, app).await?;
        }

        Commands::Merge {
            sources,
            merge_type,
            output,
        } => {
            let client = reqwest::Client::new();
            let mut contents = Vec::with_capacity(sources.len());
            for source in &sources {
                let content = fetch_content(&client, source)
                    .await
                    .with_context(|| format!("fallo al obtener {}", source))?;
                contents.push(content);
            }

            let parts: Vec<Part<'_>> = sources
                .iter()
                .zip(&contents)
                .map(|(source, content)| Part::Present {
                    task_id: source,
                    payload: content,
                })
                .collect();

            let merged = merge_parts(&merge_type.into(), &parts)?;

            if let Some(path) = output {
                tokio::fs::write(&path, &merged).await?;
                info!("salida escrita en {}", path);
            } else {
                let mut stdout = tokio::io::stdout();
                stdout.write_all(merged.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
    }

    Ok(())
}
