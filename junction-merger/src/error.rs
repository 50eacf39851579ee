use thiserror::Error;

use common::TaskId;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("el aporte de {task_id} no es JSON válido: {reason}")]
    InvalidJson { task_id: TaskId, reason: String },

    #[error("el aporte de {task_id} no es un objeto JSON")]
    NotAnObject { task_id: TaskId },

    #[error("el aporte de {task_id} usa la clave reservada {key:?}")]
    ReservedKey { task_id: TaskId, key: String },

    #[error("el aporte de {task_id} no es numérico: {value:?}")]
    NotANumber { task_id: TaskId, value: String },

    #[error("no se pudo obtener {origin}: {reason}")]
    Fetch { origin: String, reason: String },

    #[error("error de E/S: {0}")]
    Io(#[from] std::io::Error),
}
