//! Retry policy for startup hooks.
//
// The transport never retries. The scheduler wraps each startup hook with
// `retry_with_policy` so a controller that is slow to come up still gets its
// points initialized.

use crate::config::StartupSettings;
use crate::error::BridgeResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Defines a policy for retrying an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts (1 = no retry).
    pub max_attempts: u32,
    /// The delay between attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_delay: Duration::from_millis(250),
        }
    }
}

impl From<&StartupSettings> for RetryPolicy {
    fn from(settings: &StartupSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_delay: Duration::from_millis(settings.backoff_ms),
        }
    }
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error when every attempt fails.
pub async fn retry_with_policy<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> BridgeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BridgeResult<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                debug!(attempt, max_attempts = attempts, error = %e, "attempt failed, retrying");
                sleep(policy.backoff_delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
