use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info, warn};

/// A pipeline stage invoked once per batch of raw queue bodies.
///
/// Returning an error asks for the whole batch to be delivered again, so
/// implementations must be safe to re-run on the same input.
#[async_trait]
pub trait BatchHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, batch: &[Vec<u8>]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub cooldown: Duration,
}

/// Runs `handler` on `batch` until it succeeds. Returns the number of
/// attempts it took.
///
/// After `max_retries` consecutive failures the circuit breaker trips and
/// waits `cooldown` before trying again.
pub async fn deliver(handler: &dyn BatchHandler, batch: &[Vec<u8>], policy: &RedeliveryPolicy) -> u32 {
    let mut attempts = 0;
    let mut consecutive_failures = 0;

    loop {
        attempts += 1;
        match handler.handle(batch).await {
            Ok(()) => return attempts,
            Err(e) => {
                consecutive_failures += 1;
                error!(
                    "[{}] Batch of {} failed (attempt {}): {:#}",
                    handler.name(),
                    batch.len(),
                    attempts,
                    e
                );
            }
        }

        if consecutive_failures >= policy.max_retries {
            warn!(
                "[{}] Circuit breaker tripped ({} consecutive failures)! Sleeping for {:?}...",
                handler.name(),
                consecutive_failures,
                policy.cooldown
            );
            tokio::time::sleep(policy.cooldown).await;
            consecutive_failures = 0;
            info!("[{}] Circuit breaker reset. Redelivering batch.", handler.name());
        } else {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }
}
