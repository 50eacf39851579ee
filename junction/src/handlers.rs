use std::time::{Duration, SystemTime};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use common::{
    JobInfo, JobRequest, JobResultView, TaskAssignmentRequest, TaskAssignmentResponse,
    TaskCompleteRequest, TaskCompleteResponse, TaskOutcome, WorkerHeartbeatRequest,
    WorkerHeartbeatResponse, WorkerMetrics, WorkerRegisterRequest, WorkerRegisterResponse,
};

use crate::error::CoordinatorError;
use crate::state::{AppState, WorkerMeta};

/// Tope del long-poll de `/tasks/next`, pida lo que pida el executor.
pub const MAX_LONG_POLL: Duration = Duration::from_secs(30);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", post(create_job).get(list_jobs))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/result", get(get_job_result))
        .route("/api/v1/jobs/:id/cancel", post(cancel_job))
        .route("/api/v1/workers", get(list_workers))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/tasks/next", post(assign_task))
        .route("/api/v1/tasks/complete", post(complete_task))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<JobInfo>, CoordinatorError> {
    state.coordinator.submit(req).map(Json)
}

async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobInfo>> {
    Json(state.coordinator.list())
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, CoordinatorError> {
    state
        .coordinator
        .status(&id)
        .map(Json)
        .ok_or(CoordinatorError::JobNotFound(id))
}

async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobResultView>, CoordinatorError> {
    state
        .coordinator
        .result(&id)
        .map(Json)
        .ok_or(CoordinatorError::JobNotFound(id))
}

async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobInfo>, CoordinatorError> {
    state.coordinator.cancel(&id).map(Json)
}

async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<WorkerRegisterRequest>,
) -> Json<WorkerRegisterResponse> {
    let worker_id = uuid::Uuid::new_v4().to_string();

    state.workers().insert(
        worker_id.clone(),
        WorkerMeta::new(req.hostname, req.max_concurrency),
    );

    info!(
        "worker registrado: {} (max_concurrency={})",
        worker_id, req.max_concurrency
    );
    Json(WorkerRegisterResponse { worker_id })
}

// Heartbeat: refresca el worker y le entrega los abortos pendientes
async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<WorkerHeartbeatRequest>,
) -> Result<Json<WorkerHeartbeatResponse>, StatusCode> {
    {
        let mut workers = state.workers();
        let meta = workers.get_mut(&req.worker_id).ok_or(StatusCode::NOT_FOUND)?;
        if meta.dead {
            info!("worker {} volvió a dar señales de vida", req.worker_id);
            meta.dead = false;
        }
        meta.last_heartbeat = SystemTime::now();
        meta.last_cpu_percent = Some(req.cpu_percent);
        meta.last_mem_bytes = Some(req.mem_bytes);
    }

    let abort = state.coordinator.take_aborts(&req.worker_id);
    if !abort.is_empty() {
        info!(
            "pidiendo al worker {} abortar {} tareas",
            req.worker_id,
            abort.len()
        );
    }
    Ok(Json(WorkerHeartbeatResponse { ok: true, abort }))
}

// Long-poll por la siguiente tarea lista
async fn assign_task(
    State(state): State<AppState>,
    Json(req): Json<TaskAssignmentRequest>,
) -> Result<Json<TaskAssignmentResponse>, StatusCode> {
    if !state.workers().contains_key(&req.worker_id) {
        return Err(StatusCode::NOT_FOUND);
    }

    let wait = Duration::from_millis(req.wait_ms.unwrap_or(0)).min(MAX_LONG_POLL);
    let task = state.coordinator.wait_for_task(&req.worker_id, wait).await;

    match &task {
        Some(_) => {
            if let Some(meta) = state.workers().get_mut(&req.worker_id) {
                meta.tasks_started += 1;
            }
        }
        None => debug!("worker {} pidió tarea pero no hay en cola", req.worker_id),
    }

    Ok(Json(TaskAssignmentResponse { task }))
}

async fn complete_task(
    State(state): State<AppState>,
    Json(req): Json<TaskCompleteRequest>,
) -> Result<Json<TaskCompleteResponse>, CoordinatorError> {
    let worker_id = req.worker_id.clone();
    let success = matches!(req.outcome, TaskOutcome::Success { .. });

    let elapsed = state.coordinator.on_executor_result(req)?;

    if let Some(elapsed) = elapsed {
        if let Some(meta) = state.workers().get_mut(&worker_id) {
            meta.record_outcome(success, elapsed);
        }
    }

    Ok(Json(TaskCompleteResponse {
        accepted: elapsed.is_some(),
    }))
}

async fn list_workers(State(state): State<AppState>) -> Json<Vec<WorkerMetrics>> {
    let now = SystemTime::now();
    let workers = state.workers();

    let mut out: Vec<WorkerMetrics> = workers
        .iter()
        .map(|(wid, meta)| meta.metrics(wid, now))
        .collect();
    out.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));

    Json(out)
}
