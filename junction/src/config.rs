use std::time::Duration;

pub const DEFAULT_API_ADDR: &str = "0.0.0.0:7749";
pub const DEFAULT_MERGER_URL: &str = "http://localhost:7750";

pub const MAX_TASK_RETRIES: u32 = 3;
pub const TASK_TIMEOUT: Duration = Duration::from_secs(30);
pub const BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const BACKOFF_MAX: Duration = Duration::from_secs(30);
pub const WORKER_DEAD_TIMEOUT: Duration = Duration::from_secs(20);
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Reintentos acotados con backoff exponencial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Redespachos permitidos después del primer intento
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_TASK_RETRIES,
            backoff_base: BACKOFF_BASE,
            backoff_max: BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Espera antes del reintento número `retry` (1 = primer reintento).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub retry: RetryPolicy,
    /// Plazo de cada tarea despachada
    pub task_timeout: Duration,
    /// Sin heartbeat durante este tiempo, el executor se da por muerto
    pub worker_timeout: Duration,
    pub monitor_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            task_timeout: TASK_TIMEOUT,
            worker_timeout: WORKER_DEAD_TIMEOUT,
            monitor_interval: MONITOR_INTERVAL,
        }
    }
}
