//! Bounded fixed-interval polling.
//!
//! Used where the cloud settles asynchronously: a public IP detaching
//! from its load balancer, or a load balancer picking up a static IP.
//! Errors from the check itself are not retried; they propagate.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use fullnet_core::ReconcileResult;

/// How many times to check and how long to wait between checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollConfig {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Static IP detachment: 10 checks, 5 seconds apart.
    pub const fn detach() -> Self {
        Self::new(10, Duration::from_secs(5))
    }

    /// Load balancer provisioning: every 10 seconds for up to 25 minutes.
    pub const fn load_balancer() -> Self {
        Self::new(150, Duration::from_secs(10))
    }

    /// Upper bound on time spent sleeping between checks.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Call `check` until it returns `Ok(true)` or attempts run out.
///
/// Returns `Ok(false)` when the condition never held; the caller decides
/// which timeout error that is.
pub async fn poll_until<F, Fut>(
    config: &PollConfig,
    operation: &str,
    mut check: F,
) -> ReconcileResult<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ReconcileResult<bool>>,
{
    for attempt in 1..=config.max_attempts {
        if check().await? {
            debug!(%operation, attempt, "condition met");
            return Ok(true);
        }
        if attempt < config.max_attempts {
            debug!(
                %operation,
                attempt,
                max_attempts = config.max_attempts,
                "condition not met, waiting"
            );
            tokio::time::sleep(config.interval).await;
        }
    }

    warn!(%operation, attempts = config.max_attempts, "gave up polling");
    Ok(false)
}
