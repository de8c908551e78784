//! In-memory remote for Converge
//!
//! This crate implements the `RemoteApi` trait over an in-process
//! store, playing the role of a remote management API for integration
//! tests and examples.
//!
//! # Features
//!
//! - JSON-Patch-like op application against typed attribute stores
//! - Scriptable per-resource status sequences to drive the waiter
//! - Injectable failures per call kind to drive the retry policy
//! - Call counters for retry/poll assertions
//!
//! # Wire convention
//!
//! Patch paths are `/<attribute>` for scalars and
//! `/<attribute>/<member>` for collection members, so an addressing
//! scheme that routes `x` to `/x` round-trips cleanly.
//!
//! # Example
//!
//! ```ignore
//! use converge_memory::MemoryRemote;
//! use converge::{RemoteApi, AttributeSet};
//!
//! let remote = MemoryRemote::new();
//! let mut desired = AttributeSet::new();
//! desired.insert("name", "api")?;
//! let (id, state) = remote.create(&desired).await?;
//! ```

pub mod remote;

pub use remote::{CallKind, MemoryRemote, ScriptedFailure};
