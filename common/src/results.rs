use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

use crate::job::{JobId, TaskSpec};
use crate::merge::MergeRule;
use crate::task::TaskId;

/// Salida de una tarea exitosa, pendiente de merge. Inmutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialResult {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub payload: String,
    pub sequence: Option<u64>,
}

/// Resultado final de un job. Sólo existe para jobs completados.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    pub job_id: JobId,
    pub payload: String,
    /// Tareas que aportaron, en el orden del merge
    pub contributors: Vec<TaskId>,
    /// Tareas opcionales que nunca aportaron
    pub missing: Vec<TaskId>,
    pub completed_at: DateTime<Utc>,
}

/// Entrada del plan tal como la necesita el merger (sin payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub task_id: TaskId,
    pub optional: bool,
    pub sequence: Option<u64>,
}

impl From<&TaskSpec> for PlanEntry {
    fn from(t: &TaskSpec) -> Self {
        PlanEntry {
            task_id: t.id.clone(),
            optional: t.optional,
            sequence: t.sequence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPlan {
    pub tasks: Vec<PlanEntry>,
    pub merge_rule: MergeRule,
}

/* --------- Canal coordinador -> merger --------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergerMessage {
    Open { job_id: JobId, plan: JobPlan },
    Partial(PartialResult),
    /// No quedan tareas pendientes; `abandoned` son opcionales que agotaron reintentos.
    EndOfDispatch { job_id: JobId, abandoned: Vec<TaskId> },
    Fail { job_id: JobId, reason: String },
    Cancel { job_id: JobId },
}

impl MergerMessage {
    pub fn job_id(&self) -> &str {
        match self {
            MergerMessage::Open { job_id, .. } => job_id,
            MergerMessage::Partial(p) => &p.job_id,
            MergerMessage::EndOfDispatch { job_id, .. } => job_id,
            MergerMessage::Fail { job_id, .. } => job_id,
            MergerMessage::Cancel { job_id } => job_id,
        }
    }
}

/// Lo que responde el merger a cada mensaje.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MergeOutcome {
    Pending { job_id: JobId },
    Completed { result: MergedResult },
    Failed { job_id: JobId, reason: String },
    /// Mensaje descartado (job desconocido, tarea fuera del plan, job ya cancelado...)
    Ignored { job_id: JobId },
}

impl MergeOutcome {
    pub fn job_id(&self) -> &str {
        match self {
            MergeOutcome::Pending { job_id } => job_id,
            MergeOutcome::Completed { result } => &result.job_id,
            MergeOutcome::Failed { job_id, .. } => job_id,
            MergeOutcome::Ignored { job_id } => job_id,
        }
    }
}
