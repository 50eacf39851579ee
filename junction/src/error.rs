use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use common::{JobId, JobStatus, PlanError, TaskId};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("plan inválido: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("ya existe un job con id {0}")]
    DuplicateJob(JobId),

    #[error("job {0} no encontrado")]
    JobNotFound(JobId),

    #[error("la tarea {task_id} no existe en el job {job_id}")]
    TaskNotFound { job_id: JobId, task_id: TaskId },

    #[error("el job {job_id} ya terminó ({status:?})")]
    JobTerminal { job_id: JobId, status: JobStatus },
}

impl CoordinatorError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CoordinatorError::InvalidPlan(_) => StatusCode::BAD_REQUEST,
            CoordinatorError::DuplicateJob(_) | CoordinatorError::JobTerminal { .. } => {
                StatusCode::CONFLICT
            }
            CoordinatorError::JobNotFound(_) | CoordinatorError::TaskNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
        }
    }
}

impl IntoResponse for CoordinatorError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
