use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, info, warn};

use common::{JobId, JobPlan, MergeOutcome, MergerMessage, PartialResult, TaskId};

use crate::assembly::{Assembly, AssemblyState, AssemblyView, Ingested};

pub const CANCELLED_REASON: &str = "cancelled";

fn lock(asm: &Mutex<Assembly>) -> MutexGuard<'_, Assembly> {
    asm.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ensambla los aportes de muchos jobs a la vez.
/// El mapa global sólo se toca para buscar/insertar; cada job tiene su propio lock.
#[derive(Debug, Default)]
pub struct Merger {
    jobs: RwLock<HashMap<JobId, Arc<Mutex<Assembly>>>>,
}

impl Merger {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, job_id: &str) -> Option<Arc<Mutex<Assembly>>> {
        let jobs = self.jobs.read().unwrap_or_else(|p| p.into_inner());
        jobs.get(job_id).cloned()
    }

    /// Punto de entrada único para los mensajes del coordinador.
    pub fn handle(&self, msg: MergerMessage) -> MergeOutcome {
        match msg {
            MergerMessage::Open { job_id, plan } => self.open(job_id, plan),
            MergerMessage::Partial(partial) => self.ingest(partial),
            MergerMessage::EndOfDispatch { job_id, abandoned } => {
                self.end_of_dispatch(&job_id, &abandoned)
            }
            MergerMessage::Fail { job_id, reason } => self.fail_job(&job_id, &reason),
            MergerMessage::Cancel { job_id } => self.cancel(&job_id),
        }
    }

    pub fn open(&self, job_id: JobId, plan: JobPlan) -> MergeOutcome {
        let asm = {
            let mut jobs = self.jobs.write().unwrap_or_else(|p| p.into_inner());
            if let Some(existing) = jobs.get(&job_id) {
                debug!("job {} ya estaba abierto en el merger", job_id);
                existing.clone()
            } else {
                info!(
                    "abriendo ensamblado del job {} ({} tareas, regla {:?})",
                    job_id,
                    plan.tasks.len(),
                    plan.merge_rule
                );
                let asm = Arc::new(Mutex::new(Assembly::new(job_id.clone(), plan)));
                jobs.insert(job_id, asm.clone());
                asm
            }
        };

        let outcome = lock(&asm).outcome();
        outcome
    }

    /// Idempotente por (jobId, taskId).
    pub fn ingest(&self, partial: PartialResult) -> MergeOutcome {
        let job_id = partial.job_id.clone();
        let task_id = partial.task_id.clone();

        let Some(asm) = self.get(&job_id) else {
            warn!("aporte de {} para job desconocido {}", task_id, job_id);
            return MergeOutcome::Ignored { job_id };
        };

        let mut asm = lock(&asm);
        match asm.ingest(partial) {
            Ingested::Accepted => {
                debug!("aporte {} del job {} ingerido", task_id, job_id);
                let outcome = asm.try_finalize();
                log_transition(&job_id, &outcome);
                outcome
            }
            Ingested::Duplicate => {
                debug!("aporte duplicado {} del job {}, no-op", task_id, job_id);
                asm.outcome()
            }
            Ingested::UnknownTask => {
                warn!("tarea {} no pertenece al plan del job {}", task_id, job_id);
                MergeOutcome::Ignored { job_id }
            }
            Ingested::Closed => {
                debug!("job {} ya es terminal, descartando aporte {}", job_id, task_id);
                asm.outcome()
            }
        }
    }

    /// Señal de fin de despacho: no quedan tareas en vuelo para el job.
    pub fn end_of_dispatch(&self, job_id: &str, abandoned: &[TaskId]) -> MergeOutcome {
        let Some(asm) = self.get(job_id) else {
            warn!("fin de despacho para job desconocido {}", job_id);
            return MergeOutcome::Ignored {
                job_id: job_id.to_string(),
            };
        };

        let mut asm = lock(&asm);
        let rejected = asm.abandon(abandoned);
        if !rejected.is_empty() {
            warn!(
                "job {}: ignorando abandono de tareas no opcionales {:?}",
                job_id, rejected
            );
        }

        let outcome = asm.try_finalize();
        if let MergeOutcome::Pending { .. } = outcome {
            warn!(
                "job {}: fin de despacho pero faltan aportes ({} recibidos)",
                job_id,
                asm.received()
            );
        }
        log_transition(job_id, &outcome);
        outcome
    }

    pub fn fail_job(&self, job_id: &str, reason: &str) -> MergeOutcome {
        let Some(asm) = self.get(job_id) else {
            return MergeOutcome::Ignored {
                job_id: job_id.to_string(),
            };
        };

        let mut asm = lock(&asm);
        if asm.fail(reason) {
            warn!("job {} marcado FAILED en el merger: {}", job_id, reason);
        }
        asm.outcome()
    }

    /// Descarta el estado parcial sin error.
    pub fn cancel(&self, job_id: &str) -> MergeOutcome {
        let Some(asm) = self.get(job_id) else {
            return MergeOutcome::Ignored {
                job_id: job_id.to_string(),
            };
        };

        let mut asm = lock(&asm);
        if asm.fail(CANCELLED_REASON) {
            info!("job {} cancelado, estado parcial descartado", job_id);
        }
        asm.outcome()
    }

    pub fn view(&self, job_id: &str) -> Option<AssemblyView> {
        let asm = self.get(job_id)?;
        let view = lock(&asm).view();
        Some(view)
    }

    /// Completado o fallido. Un job desconocido no es terminal.
    pub fn is_terminal(&self, job_id: &str) -> bool {
        let Some(asm) = self.get(job_id) else {
            return false;
        };
        let terminal = lock(&asm).state() != &AssemblyState::Collecting;
        terminal
    }
}

fn log_transition(job_id: &str, outcome: &MergeOutcome) {
    match outcome {
        MergeOutcome::Completed { result } => info!(
            "job {} completado: {} aportes, {} ausentes",
            job_id,
            result.contributors.len(),
            result.missing.len()
        ),
        MergeOutcome::Failed { reason, .. } => warn!("job {} falló en el merge: {}", job_id, reason),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{MergeRule, PlanEntry};

    fn plan(ids: &[(&str, bool)]) -> JobPlan {
        JobPlan {
            tasks: ids
                .iter()
                .enumerate()
                .map(|(i, (id, optional))| PlanEntry {
                    task_id: id.to_string(),
                    optional: *optional,
                    sequence: Some(i as u64),
                })
                .collect(),
            merge_rule: MergeRule::default(),
        }
    }

    fn partial(job: &str, task: &str) -> MergerMessage {
        MergerMessage::Partial(PartialResult {
            job_id: job.to_string(),
            task_id: task.to_string(),
            payload: task.to_lowercase(),
            sequence: None,
        })
    }

    #[test]
    fn jobs_independientes_no_se_mezclan() {
        let merger = Merger::new();
        merger.open("j1".to_string(), plan(&[("A", false)]));
        merger.open("j2".to_string(), plan(&[("A", false), ("B", false)]));

        let out = merger.handle(partial("j2", "A"));
        assert!(matches!(out, MergeOutcome::Pending { .. }));

        let out = merger.handle(partial("j1", "A"));
        assert!(matches!(out, MergeOutcome::Completed { .. }));
        assert!(!merger.is_terminal("j2"));
    }

    #[test]
    fn reabrir_no_pierde_aportes() {
        let merger = Merger::new();
        merger.open("j".to_string(), plan(&[("A", false), ("B", false)]));
        merger.handle(partial("j", "A"));
        merger.open("j".to_string(), plan(&[("A", false), ("B", false)]));

        assert_eq!(merger.view("j").unwrap().received, vec!["A"]);
    }

    #[test]
    fn aporte_para_job_desconocido_se_ignora() {
        let merger = Merger::new();
        assert!(matches!(
            merger.handle(partial("nadie", "A")),
            MergeOutcome::Ignored { .. }
        ));
    }

    #[test]
    fn cancelar_descarta_y_aportes_posteriores_no_completan() {
        let merger = Merger::new();
        merger.open("j".to_string(), plan(&[("A", false), ("B", false)]));
        merger.handle(partial("j", "A"));

        let out = merger.handle(MergerMessage::Cancel {
            job_id: "j".to_string(),
        });
        assert!(matches!(out, MergeOutcome::Failed { ref reason, .. } if reason == CANCELLED_REASON));

        let out = merger.handle(partial("j", "B"));
        assert!(!matches!(out, MergeOutcome::Completed { .. }));
        assert!(merger.view("j").unwrap().result.is_none());
    }

    #[test]
    fn fail_job_no_produce_resultado() {
        let merger = Merger::new();
        merger.open("j".to_string(), plan(&[("A", false), ("B", false)]));
        merger.handle(partial("j", "A"));
        merger.handle(MergerMessage::Fail {
            job_id: "j".to_string(),
            reason: "B agotó reintentos".to_string(),
        });

        let view = merger.view("j").unwrap();
        assert_eq!(view.state, "failed");
        assert!(view.received.is_empty());
        assert!(view.result.is_none());
    }

    #[test]
    fn fin_de_despacho_con_opcional_abandonada_completa() {
        let merger = Merger::new();
        merger.open("j".to_string(), plan(&[("A", false), ("B", true)]));
        merger.handle(partial("j", "A"));

        let out = merger.handle(MergerMessage::EndOfDispatch {
            job_id: "j".to_string(),
            abandoned: vec!["B".to_string()],
        });
        match out {
            MergeOutcome::Completed { result } => assert_eq!(result.missing, vec!["B"]),
            other => panic!("esperaba Completed, llegó {:?}", other),
        }

        // reenvío del mismo aporte tras completar: se informa el terminal, no se re-mergea
        let again = merger.handle(partial("j", "A"));
        assert!(matches!(again, MergeOutcome::Completed { .. }));
    }
}
