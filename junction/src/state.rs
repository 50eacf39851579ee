use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, SystemTime},
};

use common::{WorkerId, WorkerMetrics};

use crate::coordinator::Coordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub workers: Arc<Mutex<HashMap<WorkerId, WorkerMeta>>>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn workers(&self) -> MutexGuard<'_, HashMap<WorkerId, WorkerMeta>> {
        self.workers.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerMeta {
    pub hostname: String,
    pub last_heartbeat: SystemTime,
    pub dead: bool,
    pub max_concurrency: u32,

    // Métricas
    pub tasks_started: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub total_task_time_ms: u64,

    pub last_cpu_percent: Option<f32>,
    pub last_mem_bytes: Option<u64>,
}

impl WorkerMeta {
    pub fn new(hostname: String, max_concurrency: u32) -> Self {
        Self {
            hostname,
            last_heartbeat: SystemTime::now(),
            dead: false,
            max_concurrency,
            tasks_started: 0,
            tasks_succeeded: 0,
            tasks_failed: 0,
            total_task_time_ms: 0,
            last_cpu_percent: None,
            last_mem_bytes: None,
        }
    }

    pub fn record_outcome(&mut self, success: bool, elapsed: Duration) {
        self.total_task_time_ms += elapsed.as_millis() as u64;
        if success {
            self.tasks_succeeded += 1;
        } else {
            self.tasks_failed += 1;
        }
    }

    pub fn metrics(&self, worker_id: &str, now: SystemTime) -> WorkerMetrics {
        let finished = self.tasks_succeeded + self.tasks_failed;
        WorkerMetrics {
            worker_id: worker_id.to_string(),
            hostname: self.hostname.clone(),
            dead: self.dead,
            max_concurrency: self.max_concurrency,
            last_heartbeat_secs_ago: now
                .duration_since(self.last_heartbeat)
                .unwrap_or_default()
                .as_secs(),
            tasks_started: self.tasks_started,
            tasks_succeeded: self.tasks_succeeded,
            tasks_failed: self.tasks_failed,
            avg_task_ms: (finished > 0)
                .then(|| self.total_task_time_ms as f64 / finished as f64),
            cpu_percent: self.last_cpu_percent,
            mem_bytes: self.last_mem_bytes,
        }
    }
}
