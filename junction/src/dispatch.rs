// Contabilidad de despacho de un job: cada job es dueño de sus tareas,
// indexadas por id. Nada aquí es compartido entre jobs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use common::{
    JobId, JobInfo, JobPlan, JobRequest, JobStatus, MergeRule, MergedResult, PlanEntry, TaskId,
    TaskInfo, TaskRef, TaskSpec, TaskStatus, WorkerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

#[derive(Debug)]
pub struct TaskEntry {
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Cantidad de despachos; identifica el intento vigente
    pub attempt: u32,
    pub retries: u32,
    pub executor: Option<WorkerId>,
    pub dispatched_at: Option<Instant>,
    /// Agotó reintentos siendo opcional
    pub abandoned: bool,
    pub last_error: Option<String>,
    /// Timer armado: deadline mientras está Dispatched, backoff mientras espera reintento
    timer: Option<AbortHandle>,
}

impl TaskEntry {
    fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            status: TaskStatus::Queued,
            attempt: 0,
            retries: 0,
            executor: None,
            dispatched_at: None,
            abandoned: false,
            last_error: None,
            timer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn arm(&mut self, handle: AbortHandle) {
        self.disarm();
        self.timer = Some(handle);
    }

    pub fn disarm(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    /// No queda nada por hacer con esta tarea.
    pub fn is_settled(&self) -> bool {
        self.status == TaskStatus::Succeeded || self.abandoned
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.spec.id.clone(),
            status: self.status,
            optional: self.spec.optional,
            retries: self.retries,
            executor: self.executor.clone(),
            abandoned: self.abandoned,
            last_error: self.last_error.clone(),
        }
    }
}

#[derive(Debug)]
pub struct JobEntry {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub merge_rule: MergeRule,
    pub tasks: Vec<TaskEntry>,
    index: HashMap<TaskId, usize>,

    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_retries: u32,
    pub failure: Option<String>,
    /// Sólo se llena al pasar a Completed
    pub result: Option<MergedResult>,
}

impl JobEntry {
    /// El plan ya tiene que venir validado.
    pub fn new(id: JobId, req: JobRequest) -> Self {
        let index = req
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        Self {
            id,
            name: req.name,
            status: JobStatus::Pending,
            merge_rule: req.merge_rule,
            tasks: req.tasks.into_iter().map(TaskEntry::new).collect(),
            index,
            submitted_at: Utc::now(),
            finished_at: None,
            total_retries: 0,
            failure: None,
            result: None,
        }
    }

    pub fn index_of(&self, task_id: &str) -> Option<usize> {
        self.index.get(task_id).copied()
    }

    /// Transiciones de estado del job; nada sale de un estado terminal.
    pub fn set_status(&mut self, next: JobStatus) -> bool {
        use JobStatus::*;
        let allowed = matches!(
            (self.status, next),
            (Pending, Dispatching)
                | (Dispatching, Merging)
                | (Dispatching, Completed)
                | (Merging, Completed)
                | (Pending, Failed)
                | (Dispatching, Failed)
                | (Merging, Failed)
        );
        if allowed {
            self.status = next;
            if next.is_terminal() {
                self.finished_at = Some(Utc::now());
            }
        }
        allowed
    }

    pub fn plan(&self) -> JobPlan {
        JobPlan {
            tasks: self.tasks.iter().map(|t| PlanEntry::from(&t.spec)).collect(),
            merge_rule: self.merge_rule.clone(),
        }
    }

    pub fn all_settled(&self) -> bool {
        self.tasks.iter().all(TaskEntry::is_settled)
    }

    pub fn abandoned_ids(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.abandoned)
            .map(|t| t.spec.id.clone())
            .collect()
    }

    /// Tareas actualmente en manos de un executor.
    pub fn in_flight(&self) -> Vec<(WorkerId, TaskRef)> {
        self.tasks
            .iter()
            .filter(|t| t.status.is_in_flight())
            .filter_map(|t| {
                t.executor.clone().map(|w| {
                    (
                        w,
                        TaskRef {
                            job_id: self.id.clone(),
                            task_id: t.spec.id.clone(),
                        },
                    )
                })
            })
            .collect()
    }

    pub fn disarm_all(&mut self) {
        for t in self.tasks.iter_mut() {
            t.disarm();
        }
    }

    pub fn snapshot(&self) -> JobInfo {
        let count = |s: TaskStatus| self.tasks.iter().filter(|t| t.status == s).count() as u32;

        JobInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            merge_rule: self.merge_rule.clone(),
            tasks: self.tasks.iter().map(TaskEntry::info).collect(),
            submitted_at: self.submitted_at,
            finished_at: self.finished_at,
            total_tasks: self.tasks.len() as u32,
            completed_tasks: count(TaskStatus::Succeeded),
            failed_tasks: count(TaskStatus::Failed) + count(TaskStatus::TimedOut),
            retries: self.total_retries,
            failure: self.failure.clone(),
        }
    }
}
