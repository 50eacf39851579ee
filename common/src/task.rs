use serde::{Deserialize, Serialize};

use crate::job::JobId;

pub type TaskId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Queued,
    Dispatched,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Queued,
        TaskStatus::Dispatched,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::TimedOut,
    ];

    /// Reglas de transición de la máquina de estados de una tarea.
    /// Failed / TimedOut sólo pueden volver a Queued (reintento).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, Dispatched)
                | (Dispatched, Succeeded)
                | (Dispatched, Failed)
                | (Dispatched, TimedOut)
                | (Failed, Queued)
                | (TimedOut, Queued)
        )
    }

    /// Está en manos de un executor ahora mismo.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Dispatched)
    }
}

/// Tarea tal como se entrega a un executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    /// Número de despacho; el executor lo devuelve al reportar.
    pub attempt: u32,
    pub payload: String,
    pub command: Option<String>,
    /// Milisegundos que tiene el executor antes de que el coordinador la dé por vencida
    pub deadline_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { payload: String },
    Failure { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn transiciones_permitidas_son_exactamente_las_esperadas() {
        let allowed = [
            (Queued, Dispatched),
            (Dispatched, Succeeded),
            (Dispatched, Failed),
            (Dispatched, TimedOut),
            (Failed, Queued),
            (TimedOut, Queued),
        ];

        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{:?} -> {:?}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn succeeded_es_terminal() {
        for to in TaskStatus::ALL {
            assert!(!Succeeded.can_transition_to(to));
        }
    }

    #[test]
    fn task_outcome_se_serializa_con_kind() {
        let ok = TaskOutcome::Success {
            payload: "hola".to_string(),
        };
        let s = serde_json::to_string(&ok).unwrap();
        assert_eq!(s, r#"{"kind":"success","payload":"hola"}"#);

        let back: TaskOutcome = serde_json::from_str(r#"{"kind":"failure","reason":"boom"}"#).unwrap();
        assert_eq!(
            back,
            TaskOutcome::Failure {
                reason: "boom".to_string()
            }
        );
    }
}
