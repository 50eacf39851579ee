use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc::UnboundedSender, Notify};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::{
    validate_plan, JobId, JobInfo, JobRequest, JobResultView, JobStatus, MergeOutcome,
    MergerMessage, PartialResult, Task, TaskCompleteRequest, TaskOutcome, TaskRef, TaskStatus,
    WorkerId,
};

use crate::config::CoordinatorConfig;
use crate::dispatch::JobEntry;
use crate::error::CoordinatorError;

pub const CANCELLED_REASON: &str = "cancelled";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Dueño del ciclo de vida de los jobs: despacho, reintentos, plazos y
/// reenvío de aportes al merger.
///
/// El mapa de jobs sólo se bloquea para buscar/insertar. Cada job tiene su
/// propio `Mutex`, que nunca se mantiene tomado a través de un `.await`.
pub struct Coordinator {
    config: CoordinatorConfig,
    jobs: RwLock<HashMap<JobId, Arc<Mutex<JobEntry>>>>,
    // tareas listas para despachar
    ready: Mutex<VecDeque<TaskRef>>,
    ready_notify: Notify,
    // avisos de aborto pendientes por executor (se entregan en el heartbeat)
    aborts: Mutex<HashMap<WorkerId, Vec<TaskRef>>>,
    merger_tx: UnboundedSender<MergerMessage>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, merger_tx: UnboundedSender<MergerMessage>) -> Self {
        Self {
            config,
            jobs: RwLock::new(HashMap::new()),
            ready: Mutex::new(VecDeque::new()),
            ready_notify: Notify::new(),
            aborts: Mutex::new(HashMap::new()),
            merger_tx,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn get(&self, job_id: &str) -> Option<Arc<Mutex<JobEntry>>> {
        let jobs = self.jobs.read().unwrap_or_else(|p| p.into_inner());
        jobs.get(job_id).cloned()
    }

    fn all_jobs(&self) -> Vec<Arc<Mutex<JobEntry>>> {
        let jobs = self.jobs.read().unwrap_or_else(|p| p.into_inner());
        jobs.values().cloned().collect()
    }

    fn send_to_merger(&self, msg: MergerMessage) {
        if self.merger_tx.send(msg).is_err() {
            warn!("canal hacia el merger cerrado, mensaje descartado");
        }
    }

    fn push_ready(&self, tickets: impl IntoIterator<Item = TaskRef>) {
        {
            let mut ready = lock(&self.ready);
            ready.extend(tickets);
        }
        self.ready_notify.notify_waiters();
    }

    /* ---------------- SubmitJob ---------------- */

    pub fn submit(&self, req: JobRequest) -> Result<JobInfo, CoordinatorError> {
        validate_plan(&req.tasks)?;

        let job_id = match &req.id {
            Some(id) if !id.trim().is_empty() => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        let entry = Arc::new(Mutex::new(JobEntry::new(job_id.clone(), req)));
        {
            let mut jobs = self.jobs.write().unwrap_or_else(|p| p.into_inner());
            if jobs.contains_key(&job_id) {
                return Err(CoordinatorError::DuplicateJob(job_id));
            }
            jobs.insert(job_id.clone(), entry.clone());
        }

        let mut job = lock(&entry);
        self.send_to_merger(MergerMessage::Open {
            job_id: job_id.clone(),
            plan: job.plan(),
        });
        job.set_status(JobStatus::Dispatching);

        let tickets: Vec<TaskRef> = job
            .tasks
            .iter()
            .map(|t| TaskRef {
                job_id: job_id.clone(),
                task_id: t.id().to_string(),
            })
            .collect();

        info!(
            "job {} ({}) aceptado con {} tareas",
            job_id,
            job.name,
            tickets.len()
        );
        self.push_ready(tickets);

        Ok(job.snapshot())
    }

    /* ---------------- Dispatch ---------------- */

    /// Saca la siguiente tarea lista y la asigna al executor. No espera.
    pub fn next_task(self: &Arc<Self>, worker_id: &str) -> Option<Task> {
        loop {
            let ticket = lock(&self.ready).pop_front()?;

            let Some(entry) = self.get(&ticket.job_id) else {
                continue;
            };
            let mut job = lock(&entry);
            if job.status.is_terminal() {
                continue;
            }
            let Some(idx) = job.index_of(&ticket.task_id) else {
                continue;
            };

            let timeout = self.config.task_timeout;
            let task = &mut job.tasks[idx];
            // ticket viejo: la tarea ya no está en cola
            if task.transition(TaskStatus::Dispatched).is_err() {
                continue;
            }
            task.attempt += 1;
            task.executor = Some(worker_id.to_string());
            task.dispatched_at = Some(Instant::now());
            let attempt = task.attempt;
            task.arm(self.arm_deadline(&ticket, attempt, timeout));

            info!(
                "asignando tarea {} del job {} al executor {} (intento {})",
                ticket.task_id, ticket.job_id, worker_id, attempt
            );

            return Some(Task {
                id: task.spec.id.clone(),
                job_id: ticket.job_id,
                attempt,
                payload: task.spec.payload.clone(),
                command: task.spec.command.clone(),
                deadline_ms: timeout.as_millis() as u64,
            });
        }
    }

    /// Como `next_task`, pero si no hay nada espera hasta `wait` a que se
    /// encole algo. Se despierta por notificación, no por sondeo.
    pub async fn wait_for_task(self: &Arc<Self>, worker_id: &str, wait: Duration) -> Option<Task> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.ready_notify.notified();
            if let Some(task) = self.next_task(worker_id) {
                return Some(task);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn arm_deadline(self: &Arc<Self>, ticket: &TaskRef, attempt: u32, timeout: Duration) -> AbortHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let ticket = ticket.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(coord) = weak.upgrade() {
                coord.on_deadline(&ticket, attempt);
            }
        })
        .abort_handle()
    }

    fn arm_retry(self: &Arc<Self>, ticket: TaskRef, attempt: u32, delay: Duration) -> AbortHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(coord) = weak.upgrade() {
                coord.requeue(ticket, attempt);
            }
        })
        .abort_handle()
    }

    fn requeue(&self, ticket: TaskRef, attempt: u32) {
        let Some(entry) = self.get(&ticket.job_id) else {
            return;
        };
        {
            let mut job = lock(&entry);
            if job.status.is_terminal() {
                return;
            }
            let Some(idx) = job.index_of(&ticket.task_id) else {
                return;
            };
            let task = &mut job.tasks[idx];
            if task.attempt != attempt || task.abandoned {
                return;
            }
            if task.transition(TaskStatus::Queued).is_err() {
                return;
            }
            debug!(
                "reencolando tarea {} del job {} (reintento {})",
                ticket.task_id, ticket.job_id, task.retries
            );
        }
        self.push_ready([ticket]);
    }

    /* ---------------- OnExecutorResult ---------------- */

    /// Devuelve `Some(duración)` si el reporte se aceptó, `None` si era viejo
    /// o el job ya terminó.
    pub fn on_executor_result(
        self: &Arc<Self>,
        report: TaskCompleteRequest,
    ) -> Result<Option<Duration>, CoordinatorError> {
        let entry = self
            .get(&report.job_id)
            .ok_or_else(|| CoordinatorError::JobNotFound(report.job_id.clone()))?;
        let mut job = lock(&entry);

        let idx = job
            .index_of(&report.task_id)
            .ok_or_else(|| CoordinatorError::TaskNotFound {
                job_id: report.job_id.clone(),
                task_id: report.task_id.clone(),
            })?;

        if job.status.is_terminal() {
            debug!(
                "reporte de {} para job {} ya terminado, descartado",
                report.task_id, report.job_id
            );
            return Ok(None);
        }

        {
            let task = &job.tasks[idx];
            if task.status != TaskStatus::Dispatched || task.attempt != report.attempt {
                debug!(
                    "reporte viejo de {} (intento {}, vigente {} en {:?}), descartado",
                    report.task_id, report.attempt, task.attempt, task.status
                );
                return Ok(None);
            }
        }

        let elapsed = job.tasks[idx]
            .dispatched_at
            .map(|t| t.elapsed())
            .unwrap_or_default();

        match report.outcome {
            TaskOutcome::Success { payload } => {
                let task = &mut job.tasks[idx];
                if task.transition(TaskStatus::Succeeded).is_err() {
                    return Ok(None);
                }
                task.disarm();
                let partial = PartialResult {
                    job_id: report.job_id.clone(),
                    task_id: report.task_id.clone(),
                    payload,
                    sequence: task.spec.sequence,
                };
                info!(
                    "tarea {} del job {} terminó ok en {:?}",
                    report.task_id, report.job_id, elapsed
                );
                self.send_to_merger(MergerMessage::Partial(partial));
                self.check_end_of_dispatch(&mut job);
            }
            TaskOutcome::Failure { reason } => {
                self.fail_attempt(&mut job, idx, TaskStatus::Failed, reason);
            }
        }

        Ok(Some(elapsed))
    }

    fn on_deadline(self: &Arc<Self>, ticket: &TaskRef, attempt: u32) {
        let Some(entry) = self.get(&ticket.job_id) else {
            return;
        };
        let mut job = lock(&entry);
        if job.status.is_terminal() {
            return;
        }
        let Some(idx) = job.index_of(&ticket.task_id) else {
            return;
        };
        let task = &job.tasks[idx];
        if task.status != TaskStatus::Dispatched || task.attempt != attempt {
            return;
        }
        let reason = format!(
            "plazo de {:?} vencido en el executor {}",
            self.config.task_timeout,
            task.executor.as_deref().unwrap_or("?")
        );
        self.fail_attempt(&mut job, idx, TaskStatus::TimedOut, reason);
    }

    /// Executor inalcanzable: todo lo que tenía en vuelo se trata como timeout.
    pub fn expire_executor(self: &Arc<Self>, worker_id: &str) -> usize {
        let mut expired = 0;
        for entry in self.all_jobs() {
            let mut job = lock(&entry);
            if job.status.is_terminal() {
                continue;
            }
            let victims: Vec<usize> = job
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| {
                    t.status == TaskStatus::Dispatched && t.executor.as_deref() == Some(worker_id)
                })
                .map(|(i, _)| i)
                .collect();

            for idx in victims {
                // un fallo anterior pudo haber terminado el job
                if job.status.is_terminal() {
                    break;
                }
                let reason = format!("executor {} sin heartbeat", worker_id);
                self.fail_attempt(&mut job, idx, TaskStatus::TimedOut, reason);
                expired += 1;
            }
        }
        expired
    }

    /// Fallo o timeout de un intento: reintenta con backoff, o agota.
    fn fail_attempt(
        self: &Arc<Self>,
        job: &mut JobEntry,
        idx: usize,
        status: TaskStatus,
        reason: String,
    ) {
        let policy = self.config.retry.clone();
        let job_id = job.id.clone();

        let task = &mut job.tasks[idx];
        if task.transition(status).is_err() {
            return;
        }
        task.disarm();
        task.last_error = Some(reason.clone());
        let task_id = task.spec.id.clone();

        if task.retries < policy.max_retries {
            task.retries += 1;
            let delay = policy.backoff(task.retries);
            let attempt = task.attempt;
            warn!(
                "tarea {} del job {} {:?}: {} (reintento {}/{} en {:?})",
                task_id, job_id, status, reason, task.retries, policy.max_retries, delay
            );
            let ticket = TaskRef {
                job_id: job_id.clone(),
                task_id,
            };
            task.arm(self.arm_retry(ticket, attempt, delay));
            job.total_retries += 1;
            return;
        }

        if task.spec.optional {
            task.abandoned = true;
            warn!(
                "tarea opcional {} del job {} agotó reintentos, se abandona: {}",
                task_id, job_id, reason
            );
            self.check_end_of_dispatch(job);
        } else {
            let why = format!(
                "la tarea {} agotó {} reintentos: {}",
                task_id, policy.max_retries, reason
            );
            warn!("job {} FAILED: {}", job_id, why);
            self.terminate(
                job,
                why.clone(),
                Some(MergerMessage::Fail {
                    job_id: job_id.clone(),
                    reason: why,
                }),
            );
        }
    }

    fn check_end_of_dispatch(&self, job: &mut JobEntry) {
        if job.status != JobStatus::Dispatching || !job.all_settled() {
            return;
        }
        job.set_status(JobStatus::Merging);
        let abandoned = job.abandoned_ids();
        info!(
            "job {}: despacho terminado ({} abandonadas), esperando merge",
            job.id,
            abandoned.len()
        );
        self.send_to_merger(MergerMessage::EndOfDispatch {
            job_id: job.id.clone(),
            abandoned,
        });
    }

    /// Pasa el job a Failed, desarma timers y pide abortar lo que esté en vuelo.
    fn terminate(&self, job: &mut JobEntry, reason: String, notify: Option<MergerMessage>) {
        if !job.set_status(JobStatus::Failed) {
            return;
        }
        job.failure = Some(reason);
        job.disarm_all();

        let in_flight = job.in_flight();
        if !in_flight.is_empty() {
            let mut aborts = lock(&self.aborts);
            for (worker, task_ref) in in_flight {
                aborts.entry(worker).or_default().push(task_ref);
            }
        }

        if let Some(msg) = notify {
            self.send_to_merger(msg);
        }
    }

    /* ---------------- Cancelación ---------------- */

    pub fn cancel(&self, job_id: &str) -> Result<JobInfo, CoordinatorError> {
        let entry = self
            .get(job_id)
            .ok_or_else(|| CoordinatorError::JobNotFound(job_id.to_string()))?;
        let mut job = lock(&entry);

        if job.status.is_terminal() {
            return Err(CoordinatorError::JobTerminal {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }

        info!("cancelando job {}", job_id);
        self.terminate(
            &mut job,
            CANCELLED_REASON.to_string(),
            Some(MergerMessage::Cancel {
                job_id: job_id.to_string(),
            }),
        );
        Ok(job.snapshot())
    }

    /// Avisos de aborto pendientes para un executor; se vacían al leerlos.
    pub fn take_aborts(&self, worker_id: &str) -> Vec<TaskRef> {
        lock(&self.aborts).remove(worker_id).unwrap_or_default()
    }

    /// Descarta los avisos de un executor que ya no va a volver a pedirlos.
    pub fn forget_executor(&self, worker_id: &str) -> usize {
        self.take_aborts(worker_id).len()
    }

    /* ---------------- Respuestas del merger ---------------- */

    pub fn on_merge_outcome(&self, outcome: MergeOutcome) {
        let Some(entry) = self.get(outcome.job_id()) else {
            warn!("respuesta del merger para job desconocido {}", outcome.job_id());
            return;
        };
        let mut job = lock(&entry);

        match outcome {
            MergeOutcome::Pending { .. } | MergeOutcome::Ignored { .. } => {}
            MergeOutcome::Completed { result } => {
                if job.status.is_terminal() {
                    debug!("job {} ya es terminal, ignorando resultado", job.id);
                    return;
                }
                if job.set_status(JobStatus::Completed) {
                    info!(
                        "job {} COMPLETED ({} aportes, {} ausentes)",
                        job.id,
                        result.contributors.len(),
                        result.missing.len()
                    );
                    job.result = Some(result);
                }
            }
            MergeOutcome::Failed { reason, .. } => {
                if !job.status.is_terminal() {
                    warn!("el merger falló el job {}: {}", job.id, reason);
                    self.terminate(&mut job, reason, None);
                }
            }
        }
    }

    /* ---------------- JobStatus / resultados ---------------- */

    pub fn status(&self, job_id: &str) -> Option<JobInfo> {
        let entry = self.get(job_id)?;
        let info = lock(&entry).snapshot();
        Some(info)
    }

    pub fn result(&self, job_id: &str) -> Option<JobResultView> {
        let entry = self.get(job_id)?;
        let job = lock(&entry);
        let view = match (job.status, &job.result, &job.failure) {
            (JobStatus::Completed, Some(result), _) => JobResultView::Completed {
                result: result.clone(),
            },
            (JobStatus::Failed, _, reason) => JobResultView::Failed {
                reason: reason.clone().unwrap_or_default(),
            },
            (status, _, _) => JobResultView::InProgress { status },
        };
        Some(view)
    }

    pub fn list(&self) -> Vec<JobInfo> {
        let mut out: Vec<JobInfo> = self
            .all_jobs()
            .iter()
            .map(|entry| lock(entry).snapshot())
            .collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        out
    }
}
