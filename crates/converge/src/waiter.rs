//! Convergence waiter
//!
//! After a mutating call, polls observed state until the resource
//! reaches a stable target status or the deadline elapses. Polling is a
//! cooperative `tokio::time::sleep`, never a blocking thread, and the
//! deadline is the sole cancellation mechanism.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::attr::{ObservedState, ResourceId, Status};
use crate::error::{ConvergeError, Result};
use crate::remote::RemoteApi;

fn default_min_interval_ms() -> u64 {
    1000
}
fn default_timeout_ms() -> u64 {
    300_000
}
fn default_continuous_target_occurrence() -> u32 {
    2
}
fn default_not_found_checks() -> u32 {
    20
}

/// Which observed statuses mean "still converging" vs "done" for one
/// resource type, plus the polling budget.
///
/// A per-resource-type constant: built once at startup and shared
/// read-only. A status outside all three sets is a terminal unexpected
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvergenceTarget {
    /// Statuses that mean the remote system is still working.
    pub pending: Vec<Status>,
    /// Statuses that mean convergence succeeded.
    pub target: Vec<Status>,
    /// Statuses that mean the remote system gave up. Never retried.
    #[serde(default)]
    pub failure: Vec<Status>,
    /// Overall polling budget in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Minimum interval between polls in milliseconds.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    /// Consecutive target observations required before declaring
    /// success. Two absorbs statuses known to flap (report success,
    /// then revert).
    #[serde(default = "default_continuous_target_occurrence")]
    pub continuous_target_occurrence: u32,
    /// Consecutive NotFound observations tolerated before escalating.
    /// Covers read-after-write propagation delay on eventually
    /// consistent backends.
    #[serde(default = "default_not_found_checks")]
    pub not_found_checks: u32,
}

impl ConvergenceTarget {
    /// Build a target with default budget and occurrence settings.
    pub fn new(
        pending: impl IntoIterator<Item = impl Into<Status>>,
        target: impl IntoIterator<Item = impl Into<Status>>,
    ) -> Self {
        Self {
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            failure: Vec::new(),
            timeout_ms: default_timeout_ms(),
            min_interval_ms: default_min_interval_ms(),
            continuous_target_occurrence: default_continuous_target_occurrence(),
            not_found_checks: default_not_found_checks(),
        }
    }

    pub fn with_failure(
        mut self,
        failure: impl IntoIterator<Item = impl Into<Status>>,
    ) -> Self {
        self.failure = failure.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_continuous_target_occurrence(mut self, n: u32) -> Self {
        self.continuous_target_occurrence = n.max(1);
        self
    }

    pub fn with_not_found_checks(mut self, n: u32) -> Self {
        self.not_found_checks = n;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn is_pending(&self, status: &Status) -> bool {
        self.pending.contains(status)
    }

    pub fn is_target(&self, status: &Status) -> bool {
        self.target.contains(status)
    }

    pub fn is_failure(&self, status: &Status) -> bool {
        self.failure.contains(status)
    }
}

/// Poll `fetch(id)` until a stable target status, a terminal failure,
/// or the deadline.
///
/// Success requires `continuous_target_occurrence` consecutive target
/// observations; any non-target observation resets the streak. NotFound
/// counts as pending for up to `not_found_checks` consecutive polls.
/// Elapsed time is checked against a deadline computed once at entry,
/// so the bound holds across the whole sequence regardless of how long
/// individual fetches take.
pub async fn wait_for_status(
    remote: &dyn RemoteApi,
    id: &ResourceId,
    target: &ConvergenceTarget,
) -> Result<ObservedState> {
    let deadline = Instant::now() + target.timeout();
    let mut target_streak: u32 = 0;
    let mut not_found_streak: u32 = 0;
    let mut last: Option<ObservedState> = None;

    loop {
        match remote.fetch(id).await {
            Ok(state) => {
                not_found_streak = 0;

                if target.is_target(&state.status) {
                    target_streak += 1;
                    debug!(
                        id = %id,
                        status = %state.status,
                        streak = target_streak,
                        "Target status observed"
                    );
                    if target_streak >= target.continuous_target_occurrence {
                        return Ok(state);
                    }
                } else if target.is_failure(&state.status) {
                    return Err(ConvergeError::ConvergenceFailed {
                        id: id.to_string(),
                        status: state.status.to_string(),
                        message: state.status_message.unwrap_or_default(),
                    });
                } else if target.is_pending(&state.status) {
                    target_streak = 0;
                    debug!(id = %id, status = %state.status, "Still converging");
                } else {
                    return Err(ConvergeError::UnexpectedStatus {
                        id: id.to_string(),
                        status: state.status.to_string(),
                    });
                }

                last = Some(state);
            }
            Err(e) if e.is_not_found() => {
                not_found_streak += 1;
                target_streak = 0;
                debug!(id = %id, streak = not_found_streak, "Not yet visible");
                if not_found_streak > target.not_found_checks {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            let (last_status, message) = match &last {
                Some(state) => (
                    state.status.to_string(),
                    state.status_message.clone().unwrap_or_default(),
                ),
                None => ("<not found>".to_string(), String::new()),
            };
            return Err(ConvergeError::ConvergenceTimeout {
                id: id.to_string(),
                last_status,
                message,
            });
        }

        // Clamp to the remaining budget so the timeout error lands no
        // later than timeout + min_interval after entry.
        let sleep_for = target.min_interval().min(deadline - now);
        tokio::time::sleep(sleep_for).await;
    }
}

/// Poll until `fetch(id)` reports NotFound, confirming a delete took
/// effect. Pending statuses are treated as still-deleting.
pub async fn wait_for_deletion(
    remote: &dyn RemoteApi,
    id: &ResourceId,
    target: &ConvergenceTarget,
) -> Result<()> {
    let deadline = Instant::now() + target.timeout();
    let mut last: Option<ObservedState> = None;

    loop {
        match remote.fetch(id).await {
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
            Ok(state) => {
                if target.is_failure(&state.status) {
                    return Err(ConvergeError::ConvergenceFailed {
                        id: id.to_string(),
                        status: state.status.to_string(),
                        message: state.status_message.unwrap_or_default(),
                    });
                }
                debug!(id = %id, status = %state.status, "Awaiting deletion");
                last = Some(state);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            let (last_status, message) = match &last {
                Some(state) => (
                    state.status.to_string(),
                    state.status_message.clone().unwrap_or_default(),
                ),
                None => ("<unknown>".to_string(), String::new()),
            };
            return Err(ConvergeError::ConvergenceTimeout {
                id: id.to_string(),
                last_status,
                message,
            });
        }

        let sleep_for = target.min_interval().min(deadline - now);
        tokio::time::sleep(sleep_for).await;
    }
}
