use std::collections::{BTreeSet, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use common::{JobId, JobPlan, MergeOutcome, MergedResult, PartialResult, PlanEntry, TaskId};

use crate::rules::{merge_parts, Part};

#[derive(Debug, Clone, PartialEq)]
pub enum AssemblyState {
    Collecting,
    Completed(MergedResult),
    Failed(String),
}

/// Resultado de ingerir un aporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingested {
    Accepted,
    /// (jobId, taskId) ya visto: no-op
    Duplicate,
    /// La tarea no está en el plan del job
    UnknownTask,
    /// El job ya es terminal
    Closed,
}

/// Estado de ensamblado de un job dentro del merger.
#[derive(Debug)]
pub struct Assembly {
    job_id: JobId,
    plan: JobPlan,
    parts: HashMap<TaskId, PartialResult>,
    abandoned: BTreeSet<TaskId>,
    state: AssemblyState,
}

/// Orden determinista: pista de secuencia ascendente, sin pista al final,
/// empates por id de tarea.
pub fn merge_order(entries: &[PlanEntry]) -> Vec<&PlanEntry> {
    let mut ordered: Vec<&PlanEntry> = entries.iter().collect();
    ordered.sort_by(|a, b| {
        (a.sequence.is_none(), a.sequence, &a.task_id).cmp(&(
            b.sequence.is_none(),
            b.sequence,
            &b.task_id,
        ))
    });
    ordered
}

impl Assembly {
    pub fn new(job_id: JobId, plan: JobPlan) -> Self {
        Self {
            job_id,
            plan,
            parts: HashMap::new(),
            abandoned: BTreeSet::new(),
            state: AssemblyState::Collecting,
        }
    }

    pub fn state(&self) -> &AssemblyState {
        &self.state
    }

    pub fn received(&self) -> usize {
        self.parts.len()
    }

    fn entry(&self, task_id: &str) -> Option<&PlanEntry> {
        self.plan.tasks.iter().find(|e| e.task_id == task_id)
    }

    pub fn ingest(&mut self, partial: PartialResult) -> Ingested {
        if self.state != AssemblyState::Collecting {
            return Ingested::Closed;
        }
        if self.entry(&partial.task_id).is_none() {
            return Ingested::UnknownTask;
        }
        if self.parts.contains_key(&partial.task_id) {
            return Ingested::Duplicate;
        }

        self.parts.insert(partial.task_id.clone(), partial);
        Ingested::Accepted
    }

    /// Registra tareas opcionales que no van a aportar. Devuelve las que se
    /// ignoraron por no ser opcionales (o no pertenecer al plan).
    pub fn abandon(&mut self, task_ids: &[TaskId]) -> Vec<TaskId> {
        let mut rejected = Vec::new();
        for id in task_ids {
            match self.entry(id) {
                Some(e) if e.optional => {
                    self.abandoned.insert(id.clone());
                }
                _ => rejected.push(id.clone()),
            }
        }
        rejected
    }

    /// ¿Cubre lo recibido el plan? Requeridas presentes, opcionales presentes o abandonadas.
    pub fn is_satisfied(&self) -> bool {
        self.plan.tasks.iter().all(|e| {
            self.parts.contains_key(&e.task_id) || (e.optional && self.abandoned.contains(&e.task_id))
        })
    }

    /// Intenta cerrar el job. Sólo tiene efecto mientras se está recolectando.
    pub fn try_finalize(&mut self) -> MergeOutcome {
        if self.state == AssemblyState::Collecting && self.is_satisfied() {
            self.state = self.assemble();
            self.parts.clear();
        }
        self.outcome()
    }

    fn assemble(&self) -> AssemblyState {
        // una reducción asociativa no necesita orden: se usa el del plan
        let ordered: Vec<&PlanEntry> = if self.plan.merge_rule.is_order_sensitive() {
            merge_order(&self.plan.tasks)
        } else {
            self.plan.tasks.iter().collect()
        };

        let mut parts: Vec<Part<'_>> = Vec::with_capacity(ordered.len());
        let mut contributors = Vec::new();
        let mut missing = Vec::new();

        for entry in ordered {
            match self.parts.get(&entry.task_id) {
                Some(p) => {
                    parts.push(Part::Present {
                        task_id: &entry.task_id,
                        payload: &p.payload,
                    });
                    contributors.push(entry.task_id.clone());
                }
                None => {
                    parts.push(Part::Missing {
                        task_id: &entry.task_id,
                    });
                    missing.push(entry.task_id.clone());
                }
            }
        }

        match merge_parts(&self.plan.merge_rule, &parts) {
            Ok(payload) => AssemblyState::Completed(MergedResult {
                job_id: self.job_id.clone(),
                payload,
                contributors,
                missing,
                completed_at: Utc::now(),
            }),
            Err(e) => AssemblyState::Failed(format!("merge fallido: {}", e)),
        }
    }

    /// Descarta el estado parcial y deja el job en Failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.state != AssemblyState::Collecting {
            return false;
        }
        self.parts.clear();
        self.abandoned.clear();
        self.state = AssemblyState::Failed(reason.into());
        true
    }

    pub fn outcome(&self) -> MergeOutcome {
        match &self.state {
            AssemblyState::Collecting => MergeOutcome::Pending {
                job_id: self.job_id.clone(),
            },
            AssemblyState::Completed(result) => MergeOutcome::Completed {
                result: result.clone(),
            },
            AssemblyState::Failed(reason) => MergeOutcome::Failed {
                job_id: self.job_id.clone(),
                reason: reason.clone(),
            },
        }
    }

    pub fn view(&self) -> AssemblyView {
        let (state, result, failure) = match &self.state {
            AssemblyState::Collecting => ("collecting", None, None),
            AssemblyState::Completed(r) => ("completed", Some(r.clone()), None),
            AssemblyState::Failed(reason) => ("failed", None, Some(reason.clone())),
        };

        let mut received: Vec<TaskId> = self.parts.keys().cloned().collect();
        received.sort();

        AssemblyView {
            job_id: self.job_id.clone(),
            state: state.to_string(),
            expected: self.plan.tasks.len(),
            received,
            abandoned: self.abandoned.iter().cloned().collect(),
            result,
            failure,
        }
    }
}

/// Respuesta de GET /api/v1/results/:job_id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyView {
    pub job_id: JobId,
    pub state: String,
    pub expected: usize,
    pub received: Vec<TaskId>,
    pub abandoned: Vec<TaskId>,
    pub result: Option<MergedResult>,
    pub failure: Option<String>,
}
