use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

use crate::merge::MergeRule;
use crate::results::MergedResult;
use crate::task::{TaskId, TaskStatus};
use crate::worker::WorkerId;

pub type JobId = String;

/// Descriptor de una tarea dentro del plan de particionado.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: TaskId,
    pub payload: String,

    /// Si es opcional, el job puede completarse sin su aporte (degraded completion).
    #[serde(default)]
    pub optional: bool,

    /// Pista de orden para reglas sensibles al orden.
    #[serde(default)]
    pub sequence: Option<u64>,

    /// Slug de un comando configurado en el worker; sin él la tarea es "identidad".
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// Id asignado por el cliente; si falta lo genera el coordinador.
    #[serde(default)]
    pub id: Option<JobId>,

    #[serde(default)]
    pub name: String,

    /// Plan de particionado, en orden
    pub tasks: Vec<TaskSpec>,

    #[serde(default)]
    pub merge_rule: MergeRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("el plan no tiene tareas")]
    Empty,
    #[error("tarea en la posición {0} sin id")]
    MissingTaskId(usize),
    #[error("id de tarea duplicado: {0}")]
    DuplicateTaskId(TaskId),
}

/// Valida un plan: no vacío, ids no vacíos y únicos dentro del job.
pub fn validate_plan(tasks: &[TaskSpec]) -> Result<(), PlanError> {
    if tasks.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut seen: HashSet<&str> = HashSet::with_capacity(tasks.len());
    for (pos, t) in tasks.iter().enumerate() {
        if t.id.trim().is_empty() {
            return Err(PlanError::MissingTaskId(pos));
        }
        if !seen.insert(t.id.as_str()) {
            return Err(PlanError::DuplicateTaskId(t.id.clone()));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Dispatching,
    Merging,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Vista de una tarea dentro de la foto de estado de un job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub status: TaskStatus,
    pub optional: bool,
    pub retries: u32,
    pub executor: Option<WorkerId>,
    /// true si agotó reintentos (sólo posible en tareas opcionales sin fallar el job)
    pub abandoned: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub merge_rule: MergeRule,
    pub tasks: Vec<TaskInfo>,

    /// -------- Métricas del job --------
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub retries: u32,

    pub failure: Option<String>,
}

/// Respuesta de GET /api/v1/jobs/:id/result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobResultView {
    InProgress { status: JobStatus },
    Completed { result: MergedResult },
    Failed { reason: String },
}
