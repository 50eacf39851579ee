// Reenvío coordinador -> merger. Un único consumidor drena el canal en orden
// FIFO, así el orden de los mensajes de cada job se conserva.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, warn};

use common::{MergeOutcome, MergerMessage};

use crate::config::RetryPolicy;
use crate::coordinator::Coordinator;

#[derive(Debug, Clone)]
pub struct MergerClient {
    http: reqwest::Client,
    base_url: String,
}

impl MergerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn send(&self, msg: &MergerMessage) -> Result<MergeOutcome, reqwest::Error> {
        self.http
            .post(format!("{}/api/v1/messages", self.base_url))
            .json(msg)
            .send()
            .await?
            .error_for_status()?
            .json::<MergeOutcome>()
            .await
    }
}

/// Espera entre reintentos mientras el merger no responde.
pub fn forward_backoff() -> RetryPolicy {
    RetryPolicy {
        max_retries: u32::MAX,
        backoff_base: Duration::from_millis(200),
        backoff_max: Duration::from_secs(5),
    }
}

pub async fn run_forwarder(
    coordinator: Arc<Coordinator>,
    mut rx: UnboundedReceiver<MergerMessage>,
    client: MergerClient,
) {
    let backoff = forward_backoff();

    while let Some(msg) = rx.recv().await {
        let mut retry: u32 = 0;
        loop {
            match client.send(&msg).await {
                Ok(outcome) => {
                    debug!("merger respondió {:?} para job {}", outcome, msg.job_id());
                    coordinator.on_merge_outcome(outcome);
                    break;
                }
                // el merger rechazó el mensaje; reintentar no lo arregla
                Err(e) if e.status().is_some_and(|s| s.is_client_error()) => {
                    error!(
                        "el merger rechazó un mensaje del job {}: {}",
                        msg.job_id(),
                        e
                    );
                    break;
                }
                Err(e) => {
                    retry = retry.saturating_add(1);
                    let delay = backoff.backoff(retry);
                    warn!(
                        "merger inalcanzable (job {}, intento {}): {}; reintento en {:?}",
                        msg.job_id(),
                        retry,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    debug!("canal hacia el merger cerrado, forwarder terminado");
}
