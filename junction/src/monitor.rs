use std::time::SystemTime;

use tokio::time::sleep;
use tracing::{debug, warn};

use common::WorkerId;

use crate::state::AppState;

/// Loop de tolerancia a fallos: detecta workers sin heartbeat y da por
/// vencidas sus tareas en vuelo.
pub async fn monitor_workers(state: AppState) {
    let interval = state.coordinator.config().monitor_interval;
    loop {
        sleep(interval).await;
        sweep_once(&state, SystemTime::now());
    }
}

/// Una pasada de chequeo:
/// 1. marca workers muertos
/// 2. sus tareas despachadas pasan por el camino de timeout
pub fn sweep_once(state: &AppState, now: SystemTime) -> Vec<WorkerId> {
    let timeout = state.coordinator.config().worker_timeout;

    let mut newly_dead: Vec<WorkerId> = Vec::new();
    {
        let mut workers = state.workers();
        for (worker_id, meta) in workers.iter_mut() {
            if meta.dead {
                continue;
            }
            // last_heartbeat en el futuro? raro, lo ignoramos.
            let Ok(elapsed) = now.duration_since(meta.last_heartbeat) else {
                continue;
            };
            if elapsed > timeout {
                meta.dead = true;
                warn!(
                    "marcando worker {} como DEAD (sin heartbeat hace {:?})",
                    worker_id, elapsed
                );
                newly_dead.push(worker_id.clone());
            }
        }
    }

    for worker_id in &newly_dead {
        let expired = state.coordinator.expire_executor(worker_id);
        if expired > 0 {
            warn!(
                "{} tareas del worker {} pasan a TIMED_OUT",
                expired, worker_id
            );
        }
        // va después de expirar: fallar el job puede dejarle avisos nuevos
        let dropped = state.coordinator.forget_executor(worker_id);
        if dropped > 0 {
            debug!("descartados {} avisos de aborto del worker {}", dropped, worker_id);
        }
    }

    newly_dead
}
