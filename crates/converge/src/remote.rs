//! Remote-object API boundary
//!
//! The only external collaborator the reconciliation core touches. A
//! provider implements this trait for one resource type; the trait
//! object is injected into the reconciler at call time, never looked up
//! from ambient state.

use async_trait::async_trait;

use crate::attr::{AttributeSet, ObservedState, ResourceId};
use crate::error::Result;
use crate::patch::PatchOp;

/// Capability set of a remote management API for one resource type.
///
/// Absence is reported as `Err(ConvergeError::NotFound)` rather than an
/// option, so callers handle "missing" and "failed" through the same
/// channel the reconciler does.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Read the current remote state of an object.
    async fn fetch(&self, id: &ResourceId) -> Result<ObservedState>;

    /// Apply an ordered batch of partial-update operations and return
    /// the resulting state.
    async fn apply_patch(&self, id: &ResourceId, ops: &[PatchOp]) -> Result<ObservedState>;

    /// Create a new object from a desired attribute set.
    async fn create(&self, desired: &AttributeSet) -> Result<(ResourceId, ObservedState)>;

    /// Delete an object. Returns `NotFound` if it does not exist.
    async fn delete(&self, id: &ResourceId) -> Result<()>;
}
