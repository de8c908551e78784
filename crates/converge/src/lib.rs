//! Converge — declarative reconciliation core
//!
//! Given a previous (remote) state and a desired (configured) state,
//! this crate computes the minimal ordered set of partial-update
//! operations needed to converge the remote object, applies them
//! through an eventual-consistency retry policy, then polls until the
//! remote system reaches a stable status.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              orchestration layer                  │
//! │      (resource lifecycle, config, CLI)            │
//! └─────────────────┬────────────────────────────────┘
//!                   │ desired / observed AttributeSets
//! ┌─────────────────▼────────────────────────────────┐
//! │                 Reconciler                        │
//! │   diff ──► patch build ──► retried apply ──► wait │
//! └───────┬──────────────────────────────────────────┘
//!         │
//! ┌───────▼───────┐
//! │   RemoteApi   │  fetch / apply_patch / create / delete
//! │  (provider)   │
//! └───────────────┘
//! ```
//!
//! Control flow per mutating operation is strictly sequential; one
//! reconciliation per resource identity may be in flight at a time.
//! Distinct identities reconcile fully in parallel — the reconciler
//! holds only immutable configuration.

pub mod attr;
pub mod diff;
pub mod error;
pub mod patch;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod waiter;

// Re-exports
pub use attr::{
    AttrEntry, AttrFlags, AttrValue, AttributeSet, ObservedState, ResourceId, Status,
};
pub use diff::{diff, AttributeChange, ChangeKind};
pub use error::{ConvergeError, Result};
pub use patch::{build, encode_value, AddressTraits, AddressingScheme, PatchOp, PatchOpKind};
pub use reconciler::{Reconciler, ReconcilerConfig};
pub use remote::RemoteApi;
pub use retry::{RetryPolicy, RetryableCondition};
pub use waiter::{wait_for_deletion, wait_for_status, ConvergenceTarget};
