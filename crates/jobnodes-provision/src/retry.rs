//! Bounded retry with linear backoff for node registration.
//!
//! Host inventories can reject a registration spuriously when several
//! nodes are added at once. Registration is retried a fixed number of
//! times, sleeping `base_delay * attempt` after each failed attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use jobnodes_core::{HostError, NodeDescriptor, NodeInventory};

use crate::error::{ProvisionError, ProvisionResult};

/// Retry settings for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Run `operation` until it succeeds or the policy is exhausted.
///
/// Returns the last error together with the number of attempts made.
pub async fn retry_linear<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, (E, u32)>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts => {
                error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
                return Err((e, attempt));
            }
            Err(e) => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Register `node`, retrying spurious inventory failures.
pub async fn register_with_retry(
    inventory: &dyn NodeInventory,
    node: &NodeDescriptor,
    policy: &RetryPolicy,
) -> ProvisionResult<()> {
    retry_linear(policy, "add_node", move |_| inventory.add_node(node))
        .await
        .map_err(|(source, attempts): (HostError, u32)| ProvisionError::Registration {
            node: node.name.clone(),
            attempts,
            source,
        })
}
