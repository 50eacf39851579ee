use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use sysinfo::{CpuExt, System, SystemExt};
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use common::{
    Task, TaskAssignmentRequest, TaskAssignmentResponse, TaskCompleteRequest,
    TaskCompleteResponse, TaskOutcome, TaskRef, WorkerHeartbeatRequest, WorkerHeartbeatResponse,
    WorkerRegisterRequest, WorkerRegisterResponse,
};

use crate::config::CommandSet;
use crate::runner::{run_task, RunDir};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const LONG_POLL_MS: u64 = 10_000;
const RETRY_PAUSE: Duration = Duration::from_secs(2);

pub struct WorkerConfig {
    pub master_url: String,
    pub concurrency: u32,
    pub commands: CommandSet,
    pub run_dir: RunDir,
}

/// Tareas corriendo en este worker, para poder abortarlas.
#[derive(Clone, Default)]
struct Running {
    tasks: Arc<Mutex<HashMap<TaskRef, AbortHandle>>>,
}

impl Running {
    fn lock(&self) -> MutexGuard<'_, HashMap<TaskRef, AbortHandle>> {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn abort(&self, task_ref: &TaskRef) -> bool {
        match self.lock().remove(task_ref) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

#[derive(Clone)]
struct Master {
    http: Client,
    base_url: String,
}

impl Master {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn register(&self, hostname: String, max_concurrency: u32) -> Result<String> {
        let WorkerRegisterResponse { worker_id } = self
            .http
            .post(self.url("/api/v1/workers/register"))
            .json(&WorkerRegisterRequest {
                hostname,
                max_concurrency,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(worker_id)
    }

    async fn heartbeat(&self, req: &WorkerHeartbeatRequest) -> Result<WorkerHeartbeatResponse> {
        Ok(self
            .http
            .post(self.url("/api/v1/workers/heartbeat"))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }

    async fn next_task(&self, worker_id: &str) -> Result<Option<Task>> {
        let resp: TaskAssignmentResponse = self
            .http
            .post(self.url("/api/v1/tasks/next"))
            .json(&TaskAssignmentRequest {
                worker_id: worker_id.to_string(),
                wait_ms: Some(LONG_POLL_MS),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.task)
    }

    async fn complete(&self, req: &TaskCompleteRequest) -> Result<bool> {
        let resp: TaskCompleteResponse = self
            .http
            .post(self.url("/api/v1/tasks/complete"))
            .json(req)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp.accepted)
    }
}

/// Loop principal del worker.
/// - Se registra en el coordinador.
/// - Hace heartbeats periódicos y atiende los pedidos de aborto.
/// - Pide tareas (long-poll) mientras tenga "slots" libres.
/// - Ejecuta cada tarea en paralelo (hasta `concurrency`).
pub async fn run(config: WorkerConfig) -> Result<()> {
    let master = Master {
        http: Client::new(),
        base_url: config.master_url.trim_end_matches('/').to_string(),
    };

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let concurrency = config.concurrency.max(1);

    let worker_id = master
        .register(hostname, concurrency)
        .await
        .with_context(|| format!("no se pudo registrar en {}", master.base_url))?;
    info!(
        "worker {} registrado con concurrency={} contra {} ({} comandos, datos en {})",
        worker_id,
        concurrency,
        master.base_url,
        config.commands.len(),
        config.run_dir.dir().display()
    );

    let running = Running::default();
    tokio::spawn(heartbeat_loop(master.clone(), worker_id.clone(), running.clone()));

    let commands = Arc::new(config.commands);
    let run_dir = Arc::new(config.run_dir);
    let sem = Arc::new(Semaphore::new(concurrency as usize));

    loop {
        // --------- Control de concurrencia local ---------
        let permit = sem.clone().acquire_owned().await?;

        let task = match master.next_task(&worker_id).await {
            Ok(Some(task)) => task,
            Ok(None) => continue,
            Err(e) => {
                warn!("error pidiendo tarea: {:#}", e);
                drop(permit);
                sleep(RETRY_PAUSE).await;
                continue;
            }
        };

        info!(
            "tengo tarea {} del job {} (intento {}, comando {:?})",
            task.id, task.job_id, task.attempt, task.command
        );

        let task_ref = TaskRef {
            job_id: task.job_id.clone(),
            task_id: task.id.clone(),
        };
        let master = master.clone();
        let worker_id = worker_id.clone();
        let commands = commands.clone();
        let run_dir = run_dir.clone();
        let done = running.clone();
        let key = task_ref.clone();

        // el lock se toma antes del spawn para que la tarea no se saque
        // del mapa antes de estar registrada
        let mut tasks = running.lock();
        let handle = tokio::spawn(async move {
            let outcome = run_task(&task, &commands, &run_dir).await;
            done.lock().remove(&key);

            if let TaskOutcome::Failure { reason } = &outcome {
                warn!("tarea {} falló: {}", task.id, reason);
            }

            let report = TaskCompleteRequest {
                worker_id,
                job_id: task.job_id.clone(),
                task_id: task.id.clone(),
                attempt: task.attempt,
                outcome,
            };
            match master.complete(&report).await {
                Ok(true) => info!("tarea {} reportada", task.id),
                Ok(false) => info!("el coordinador descartó el reporte de {}", task.id),
                Err(e) => warn!("no se pudo reportar la tarea {}: {:#}", task.id, e),
            }

            // Liberar el "slot" de concurrencia al terminar
            drop(permit);
        });
        tasks.insert(task_ref, handle.abort_handle());
    }
}

async fn heartbeat_loop(master: Master, worker_id: String, running: Running) {
    // System para leer CPU y memoria
    let mut sys = System::new_all();

    loop {
        sys.refresh_cpu();
        sys.refresh_memory();

        let req = WorkerHeartbeatRequest {
            worker_id: worker_id.clone(),
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            mem_bytes: sys.used_memory(),
        };

        match master.heartbeat(&req).await {
            Ok(resp) => {
                for task_ref in &resp.abort {
                    if running.abort(task_ref) {
                        info!(
                            "abortada tarea {} del job {} a pedido del coordinador",
                            task_ref.task_id, task_ref.job_id
                        );
                    }
                }
            }
            Err(e) => warn!("heartbeat fallido: {:#}", e),
        }

        sleep(HEARTBEAT_INTERVAL).await;
    }
}
