//! Reconciler
//!
//! Composes diff, patch build, retried apply, and convergence waiting
//! into the per-operation sequence: diff -> build -> apply -> wait.
//! Holds only immutable per-resource-type configuration, so one
//! reconciler may be shared across resource identities; callers must
//! serialize mutations per identity themselves (the remote API is
//! typically not safe against concurrent partial updates to one
//! object).

use tracing::{debug, info};

use crate::attr::{AttributeSet, ObservedState, ResourceId};
use crate::diff::diff;
use crate::error::Result;
use crate::patch::{build, AddressingScheme};
use crate::remote::RemoteApi;
use crate::retry::{RetryPolicy, RetryableCondition};
use crate::waiter::{wait_for_deletion, wait_for_status, ConvergenceTarget};

/// Immutable per-resource-type reconciliation configuration.
#[derive(Debug, Clone, Default)]
pub struct ReconcilerConfig {
    /// Attribute-to-wire-path addressing for this resource type.
    pub addressing: AddressingScheme,
    /// Convergence target for create/update, when the resource is
    /// asynchronously provisioned. `None` means mutations take effect
    /// synchronously.
    pub convergence: Option<ConvergenceTarget>,
    /// Convergence target for delete, when deletion is asynchronous.
    pub deletion: Option<ConvergenceTarget>,
    /// Retry window and backoff for apply-time calls.
    pub retry: RetryPolicy,
    /// Which apply-time errors count as eventual-consistency noise.
    pub retryable: RetryableCondition,
}

/// Drives one resource type against a remote API.
pub struct Reconciler {
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Create the resource and wait for it to become available.
    pub async fn create(
        &self,
        remote: &dyn RemoteApi,
        desired: &AttributeSet,
    ) -> Result<(ResourceId, ObservedState)> {
        let (id, state) = self
            .config
            .retry
            .run(&self.config.retryable, || remote.create(desired))
            .await?;
        info!(id = %id, status = %state.status, "Created resource");

        let final_state = match &self.config.convergence {
            Some(target) => wait_for_status(remote, &id, target).await?,
            None => state,
        };
        Ok((id, final_state))
    }

    /// Converge the remote object from `observed` to `desired`.
    ///
    /// An empty diff sends nothing and returns the given observed state
    /// untouched. Wait-time errors pass through without re-entering the
    /// retry policy; retrying a whole update+wait sequence is the
    /// caller's decision.
    pub async fn reconcile(
        &self,
        remote: &dyn RemoteApi,
        id: &ResourceId,
        observed: &ObservedState,
        desired: &AttributeSet,
    ) -> Result<ObservedState> {
        let changes = diff(&observed.attributes, desired);
        if changes.is_empty() {
            debug!(id = %id, "No drift; nothing to apply");
            return Ok(observed.clone());
        }

        let ops = build(&changes, &self.config.addressing)?;
        info!(id = %id, ops = ops.len(), "Applying patch");

        let state = self
            .config
            .retry
            .run(&self.config.retryable, || remote.apply_patch(id, &ops))
            .await?;

        match &self.config.convergence {
            Some(target) => wait_for_status(remote, id, target).await,
            None => Ok(state),
        }
    }

    /// Re-read remote state. `NotFound` surfaces distinctly so the
    /// caller can drop the resource from tracked state instead of
    /// failing hard.
    pub async fn refresh(&self, remote: &dyn RemoteApi, id: &ResourceId) -> Result<ObservedState> {
        remote.fetch(id).await
    }

    /// Delete the resource. An already-absent resource is success.
    pub async fn destroy(&self, remote: &dyn RemoteApi, id: &ResourceId) -> Result<()> {
        let result = self
            .config
            .retry
            .run(&self.config.retryable, || remote.delete(id))
            .await;

        match result {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(id = %id, "Already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
        info!(id = %id, "Deleted resource");

        match &self.config.deletion {
            Some(target) => wait_for_deletion(remote, id, target).await,
            None => Ok(()),
        }
    }
}
