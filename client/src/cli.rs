use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use common::{JobInfo, JobResultView, MergeRule, WorkerMetrics};

use crate::plan::{load_plan, plan_from_glob};

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI simple para hablar con junction")]
struct Cli {
    /// URL base del coordinador
    #[arg(long, env = "MASTER_URL", default_value = "http://localhost:7749", global = true)]
    master_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Rule {
    Concat,
    Json,
    Ini,
    Sum,
}

#[derive(Subcommand)]
enum Commands {
    /// Envía un job nuevo: plan completo (--plan) o un archivo por tarea (--glob)
    Submit {
        /// Plan en JSON o YAML
        #[arg(long, conflicts_with = "glob", required_unless_present = "glob")]
        plan: Option<PathBuf>,

        #[arg(long)]
        glob: Option<String>,

        #[arg(long, default_value = "")]
        name: String,

        /// Regla de merge para --glob
        #[arg(long, value_enum, default_value = "concat")]
        rule: Rule,

        /// Separador de la regla concat
        #[arg(long, default_value = "\n")]
        separator: String,

        /// Slug del comando que debe correr el worker en cada tarea (--glob)
        #[arg(long)]
        command: Option<String>,

        /// Id propio para el job
        #[arg(long)]
        id: Option<String>,
    },
    /// Consulta el estado de un job
    Status {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Muestra el resultado combinado de un job
    Result {
        #[arg(value_name = "JOB_ID")]
        id: String,

        /// Esperar hasta que el job termine
        #[arg(long)]
        wait: bool,
    },
    /// Cancela un job en curso
    Cancel {
        #[arg(value_name = "JOB_ID")]
        id: String,
    },
    /// Lista los jobs
    Jobs,
    Workers,
}

impl Rule {
    fn into_merge_rule(self, separator: String) -> MergeRule {
        match self {
            Rule::Concat => MergeRule::Concat { separator },
            Rule::Json => MergeRule::Json,
            Rule::Ini => MergeRule::Ini,
            Rule::Sum => MergeRule::Sum,
        }
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("el coordinador respondió {}: {}", status, body);
    }
    Ok(resp.json().await?)
}

fn print_job(job: &JobInfo) {
    println!("Job:");
    println!("  id: {}", job.id);
    println!("  nombre: {}", job.name);
    println!("  estado: {:?}", job.status);
    println!("  regla: {:?}", job.merge_rule);

    // métricas de tareas
    println!(
        "  tareas: total={}, completadas={}, fallidas={}, reintentos={}",
        job.total_tasks, job.completed_tasks, job.failed_tasks, job.retries
    );

    // progreso calculado localmente
    if job.total_tasks > 0 {
        let pct = (job.completed_tasks as f64 / job.total_tasks as f64) * 100.0;
        println!("  progreso: {:.1}%", pct);
    }

    println!("  submitted_at: {}", job.submitted_at);
    if let Some(ref done) = job.finished_at {
        println!("  finalizado: {}", done);
    }
    if let Some(ref reason) = job.failure {
        println!("  motivo: {}", reason);
    }
    for t in &job.tasks {
        let mut line = format!("    - {} {:?} reintentos={}", t.id, t.status, t.retries);
        if t.optional {
            line.push_str(" (opcional)");
        }
        if t.abandoned {
            line.push_str(" ABANDONADA");
        }
        if let Some(ref err) = t.last_error {
            line.push_str(&format!(" último error: {}", err));
        }
        println!("{}", line);
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.master_url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Submit {
            plan,
            glob,
            name,
            rule,
            separator,
            command,
            id,
        } => {
            let mut req = match (plan, glob) {
                (Some(path), _) => load_plan(&path)?,
                (None, Some(pattern)) => plan_from_glob(
                    &pattern,
                    name.clone(),
                    rule.into_merge_rule(separator),
                    command,
                )?,
                (None, None) => bail!("hace falta --plan o --glob"),
            };
            if id.is_some() {
                req.id = id;
            }
            if !name.is_empty() {
                req.name = name;
            }

            let url = format!("{}/api/v1/jobs", base_url);
            let job: JobInfo = read_json(client.post(&url).json(&req).send().await?).await?;
            println!("Job creado:");
            print_job(&job);
        }

        Commands::Status { id } => {
            let url = format!("{}/api/v1/jobs/{}", base_url, id);
            let job: JobInfo = read_json(client.get(&url).send().await?).await?;
            print_job(&job);
        }

        Commands::Result { id, wait } => {
            let url = format!("{}/api/v1/jobs/{}/result", base_url, id);
            loop {
                let view: JobResultView = read_json(client.get(&url).send().await?).await?;
                match view {
                    JobResultView::InProgress { status } if wait => {
                        eprintln!("job {} en {:?}, esperando...", id, status);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    JobResultView::InProgress { status } => {
                        println!("El job {} todavía no terminó ({:?})", id, status);
                        break;
                    }
                    JobResultView::Completed { result } => {
                        if !result.missing.is_empty() {
                            eprintln!("resultado degradado, faltan: {}", result.missing.join(", "));
                        }
                        println!("{}", result.payload);
                        break;
                    }
                    JobResultView::Failed { reason } => {
                        bail!("el job {} falló: {}", id, reason);
                    }
                }
            }
        }

        Commands::Cancel { id } => {
            let url = format!("{}/api/v1/jobs/{}/cancel", base_url, id);
            let job: JobInfo = read_json(client.post(&url).send().await?).await?;
            println!("Job {} cancelado ({:?})", job.id, job.status);
        }

        Commands::Jobs => {
            let url = format!("{}/api/v1/jobs", base_url);
            let jobs: Vec<JobInfo> = read_json(client.get(&url).send().await?).await?;
            if jobs.is_empty() {
                println!("No hay jobs.");
            }
            for job in jobs {
                println!(
                    "{}  {:?}  {}/{}  {}",
                    job.id, job.status, job.completed_tasks, job.total_tasks, job.name
                );
            }
        }

        Commands::Workers => {
            let url = format!("{}/api/v1/workers", base_url);
            let workers: Vec<WorkerMetrics> = read_json(client.get(&url).send().await?).await?;
            if workers.is_empty() {
                println!("No hay workers registrados.");
            }
            for w in workers {
                println!("Worker {}", w.worker_id);
                println!("  host           : {}", w.hostname);
                println!("  dead           : {}", w.dead);
                println!("  last_heartbeat : {} s ago", w.last_heartbeat_secs_ago);
                println!("  concurrency    : max={}", w.max_concurrency);
                println!(
                    "  tareas         : started={}, ok={}, failed={}",
                    w.tasks_started, w.tasks_succeeded, w.tasks_failed
                );
                match w.avg_task_ms {
                    Some(avg) => println!("  avg_task_ms    : {:.1}", avg),
                    None => println!("  avg_task_ms    : (sin datos)"),
                }
                match w.cpu_percent {
                    Some(cpu) => println!("  cpu_percent    : {:.1}%", cpu),
                    None => println!("  cpu_percent    : (sin datos)"),
                }
                match w.mem_bytes {
                    Some(mem) => println!("  mem_bytes      : {}", mem),
                    None => println!("  mem_bytes      : (sin datos)"),
                }
                println!();
            }
        }
    }

    Ok(())
}
