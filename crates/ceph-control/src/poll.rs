use core::future::Future;
use core::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::{ControlError, Result};

/// How often and for how long to re-check a cluster condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollPolicy {
    #[serde(rename = "interval_ms", with = "minion_sim::serde_duration")]
    pub interval: Duration,
    #[serde(rename = "timeout_ms", with = "minion_sim::serde_duration")]
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Re-runs `fetch` until `predicate` accepts its output, returning that
/// output.
///
/// Errors from either closure end the wait immediately; only an unsatisfied
/// predicate is retried. Each fetch is bounded by what is left of the
/// timeout, so a hung fetch also ends in a convergence failure.
pub async fn wait_until<F, Fut, P>(
    what: &str,
    policy: PollPolicy,
    mut fetch: F,
    predicate: P,
) -> Result<String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String>>,
    P: Fn(&str) -> Result<bool>,
{
    let started = Instant::now();
    let mut attempts = 0_u32;
    let mut previous: Option<String> = None;

    loop {
        let remaining = policy.timeout.saturating_sub(started.elapsed());
        let Ok(fetched) = timeout(remaining, fetch()).await else {
            let elapsed = started.elapsed();
            warn!(what, attempts, ?elapsed, "fetch outlived the timeout");
            return Err(ControlError::Convergence {
                what: what.to_owned(),
                elapsed,
                last_output: previous,
            });
        };
        let output = fetched?;
        attempts = attempts.saturating_add(1);

        if predicate(&output)? {
            debug!(what, attempts, elapsed = ?started.elapsed(), "converged");
            return Ok(output);
        }

        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            warn!(what, attempts, ?elapsed, "did not converge");
            return Err(ControlError::Convergence {
                what: what.to_owned(),
                elapsed,
                last_output: Some(output),
            });
        }

        previous = Some(output);
        sleep(policy.interval).await;
    }
}

/// Like [`wait_until`] for a condition that needs no output.
pub async fn wait_until_true<C>(what: &str, policy: PollPolicy, mut condition: C) -> Result<()>
where
    C: FnMut() -> bool,
{
    let started = Instant::now();

    while !condition() {
        let elapsed = started.elapsed();
        if elapsed >= policy.timeout {
            warn!(what, ?elapsed, "did not converge");
            return Err(ControlError::Convergence {
                what: what.to_owned(),
                elapsed,
                last_output: None,
            });
        }

        sleep(policy.interval).await;
    }

    Ok(())
}
