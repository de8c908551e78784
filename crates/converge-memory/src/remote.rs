//! In-memory `RemoteApi` implementation

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use converge::{
    AttrValue, AttributeSet, ConvergeError, ObservedState, PatchOp, PatchOpKind, RemoteApi,
    ResourceId, Result, Status,
};

/// Which remote call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Fetch,
    ApplyPatch,
    Create,
    Delete,
}

/// A failure queued for the next call of a given kind.
#[derive(Debug, Clone)]
pub enum ScriptedFailure {
    Transient { code: String, message: String },
    Validation { message: String },
    NotFound,
}

impl ScriptedFailure {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    fn into_error(self, id: &str) -> ConvergeError {
        match self {
            ScriptedFailure::Transient { code, message } => ConvergeError::Transient {
                id: id.to_string(),
                code,
                message,
            },
            ScriptedFailure::Validation { message } => ConvergeError::Validation {
                id: id.to_string(),
                message,
            },
            ScriptedFailure::NotFound => ConvergeError::NotFound { id: id.to_string() },
        }
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    attributes: AttributeSet,
    status: Status,
    status_message: Option<String>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, StoredObject>,
    next_id: u64,
    /// Per-id status sequences consumed one entry per fetch; the
    /// stored status remains once a script runs out.
    status_scripts: HashMap<String, VecDeque<Status>>,
    failures: HashMap<CallKind, VecDeque<ScriptedFailure>>,
    /// Wire names of collections that may never be emptied.
    required_collections: Vec<String>,
    create_status: Status,
}

/// In-process remote management API.
///
/// Cheap to share (`Arc` it or pass by reference); all state sits
/// behind one async mutex, which also serializes call interleaving the
/// way a single remote object would.
pub struct MemoryRemote {
    inner: Mutex<Inner>,
    fetches: AtomicU32,
    applies: AtomicU32,
    creates: AtomicU32,
    deletes: AtomicU32,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                create_status: Status::from("AVAILABLE"),
                ..Inner::default()
            }),
            fetches: AtomicU32::new(0),
            applies: AtomicU32::new(0),
            creates: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        }
    }

    /// Status newly created objects report (default `AVAILABLE`). Set
    /// to a pending status and script the rest to exercise the waiter.
    pub async fn set_create_status(&self, status: impl Into<Status>) {
        self.inner.lock().await.create_status = status.into();
    }

    /// Seed an object directly, bypassing `create`.
    pub async fn put_object(
        &self,
        id: impl Into<String>,
        attributes: AttributeSet,
        status: impl Into<Status>,
    ) {
        self.inner.lock().await.objects.insert(
            id.into(),
            StoredObject {
                attributes,
                status: status.into(),
                status_message: None,
            },
        );
    }

    /// Overwrite an object's status and message.
    pub async fn set_status(
        &self,
        id: &str,
        status: impl Into<Status>,
        message: Option<String>,
    ) {
        if let Some(obj) = self.inner.lock().await.objects.get_mut(id) {
            obj.status = status.into();
            obj.status_message = message;
        }
    }

    /// Queue a status sequence served one entry per fetch of `id`.
    pub async fn script_statuses(
        &self,
        id: &str,
        statuses: impl IntoIterator<Item = impl Into<Status>>,
    ) {
        self.inner
            .lock()
            .await
            .status_scripts
            .entry(id.to_string())
            .or_default()
            .extend(statuses.into_iter().map(Into::into));
    }

    /// Queue failures returned by upcoming calls of `kind`, oldest
    /// first.
    pub async fn script_failures(
        &self,
        kind: CallKind,
        failures: impl IntoIterator<Item = ScriptedFailure>,
    ) {
        self.inner
            .lock()
            .await
            .failures
            .entry(kind)
            .or_default()
            .extend(failures);
    }

    /// Mark a wire collection as never-empty; a `remove` that would
    /// empty it is rejected with a validation error, as a real API
    /// enforcing the constraint would.
    pub async fn require_non_empty(&self, wire_name: impl Into<String>) {
        self.inner
            .lock()
            .await
            .required_collections
            .push(wire_name.into());
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn apply_count(&self) -> u32 {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Direct read of stored attributes, for assertions.
    pub async fn attributes(&self, id: &str) -> Option<AttributeSet> {
        self.inner
            .lock()
            .await
            .objects
            .get(id)
            .map(|o| o.attributes.clone())
    }
}

fn pop_failure(inner: &mut Inner, kind: CallKind, id: &str) -> Result<()> {
    if let Some(queue) = inner.failures.get_mut(&kind) {
        if let Some(failure) = queue.pop_front() {
            return Err(failure.into_error(id));
        }
    }
    Ok(())
}

/// Split `/attr` or `/attr/member` into (attr, member).
fn split_wire_path(path: &str) -> Result<(&str, Option<&str>)> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err(ConvergeError::Unaddressable {
            path: path.to_string(),
        });
    }
    match trimmed.split_once('/') {
        Some((attr, member)) => Ok((attr, Some(member))),
        None => Ok((trimmed, None)),
    }
}

/// Parse an incoming wire string back into the type the stored value
/// carries, the way a schema-aware API deserializes its payload.
fn retype(existing: Option<&AttrValue>, raw: &str) -> AttrValue {
    match existing {
        Some(AttrValue::Int(_)) => raw
            .parse::<i64>()
            .map(AttrValue::Int)
            .unwrap_or_else(|_| AttrValue::Str(raw.to_string())),
        Some(AttrValue::Float(_)) => raw
            .parse::<f64>()
            .map(AttrValue::Float)
            .unwrap_or_else(|_| AttrValue::Str(raw.to_string())),
        Some(AttrValue::Bool(_)) => match raw {
            "true" => AttrValue::Bool(true),
            "false" => AttrValue::Bool(false),
            _ => AttrValue::Str(raw.to_string()),
        },
        _ => AttrValue::Str(raw.to_string()),
    }
}

fn apply_op(
    obj: &mut StoredObject,
    op: &PatchOp,
    required_collections: &[String],
    id: &str,
) -> Result<()> {
    let (attr, member) = split_wire_path(op.path())?;

    match (op.kind(), member) {
        (PatchOpKind::Replace, None) => {
            let raw = op.value().unwrap_or_default();
            let value = retype(obj.attributes.get(attr), raw);
            obj.attributes.set(attr, value);
        }
        (PatchOpKind::Remove, None) => {
            obj.attributes.remove(attr);
        }
        (PatchOpKind::Add | PatchOpKind::Replace, Some(member)) => {
            let raw = op.value().unwrap_or_default().to_string();
            match obj.attributes.get(attr).cloned() {
                Some(AttrValue::StrSet(mut set)) => {
                    set.insert(member.to_string());
                    obj.attributes.set(attr, AttrValue::StrSet(set));
                }
                Some(AttrValue::StrMap(mut map)) => {
                    map.insert(member.to_string(), raw);
                    obj.attributes.set(attr, AttrValue::StrMap(map));
                }
                // New collection: a set when the value is the member
                // itself, otherwise a map entry.
                _ if raw == member => {
                    obj.attributes.set(attr, AttrValue::str_set([member]));
                }
                _ => {
                    obj.attributes
                        .set(attr, AttrValue::str_map([(member.to_string(), raw)]));
                }
            }
        }
        (PatchOpKind::Remove, Some(member)) => {
            match obj.attributes.get(attr).cloned() {
                Some(AttrValue::StrSet(mut set)) => {
                    set.remove(member);
                    if set.is_empty() && required_collections.iter().any(|c| c == attr) {
                        return Err(ConvergeError::Validation {
                            id: id.to_string(),
                            message: format!("collection {attr} must not be empty"),
                        });
                    }
                    obj.attributes.set(attr, AttrValue::StrSet(set));
                }
                Some(AttrValue::StrMap(mut map)) => {
                    map.remove(member);
                    if map.is_empty() && required_collections.iter().any(|c| c == attr) {
                        return Err(ConvergeError::Validation {
                            id: id.to_string(),
                            message: format!("collection {attr} must not be empty"),
                        });
                    }
                    obj.attributes.set(attr, AttrValue::StrMap(map));
                }
                _ => {
                    return Err(ConvergeError::Validation {
                        id: id.to_string(),
                        message: format!("no collection at {attr}"),
                    });
                }
            }
        }
        (PatchOpKind::Add, None) => {
            let raw = op.value().unwrap_or_default();
            let value = retype(obj.attributes.get(attr), raw);
            obj.attributes.set(attr, value);
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteApi for MemoryRemote {
    async fn fetch(&self, id: &ResourceId) -> Result<ObservedState> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        let inner = &mut *inner;
        pop_failure(inner, CallKind::Fetch, id.as_str())?;

        // Advance the status script before reading.
        if let Some(script) = inner.status_scripts.get_mut(id.as_str()) {
            if let Some(next) = script.pop_front() {
                if let Some(obj) = inner.objects.get_mut(id.as_str()) {
                    obj.status = next;
                }
            }
        }

        match inner.objects.get(id.as_str()) {
            Some(obj) => {
                let mut state = ObservedState::new(obj.attributes.clone(), obj.status.clone());
                state.status_message = obj.status_message.clone();
                Ok(state)
            }
            None => Err(ConvergeError::NotFound { id: id.to_string() }),
        }
    }

    async fn apply_patch(&self, id: &ResourceId, ops: &[PatchOp]) -> Result<ObservedState> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        pop_failure(&mut inner, CallKind::ApplyPatch, id.as_str())?;

        let required = inner.required_collections.clone();
        let obj = inner
            .objects
            .get_mut(id.as_str())
            .ok_or_else(|| ConvergeError::NotFound { id: id.to_string() })?;

        // Ops apply one at a time; a rejected op leaves earlier ops in
        // place, matching the partial-update semantics of real APIs.
        for op in ops {
            debug!(id = %id, op = %op.kind(), path = %op.path(), "Applying op");
            apply_op(obj, op, &required, id.as_str())?;
        }

        let mut state = ObservedState::new(obj.attributes.clone(), obj.status.clone());
        state.status_message = obj.status_message.clone();
        Ok(state)
    }

    async fn create(&self, desired: &AttributeSet) -> Result<(ResourceId, ObservedState)> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        pop_failure(&mut inner, CallKind::Create, "<new>")?;

        inner.next_id += 1;
        let id = format!("mem-{}", inner.next_id);
        let status = inner.create_status.clone();
        inner.objects.insert(
            id.clone(),
            StoredObject {
                attributes: desired.clone(),
                status: status.clone(),
                status_message: None,
            },
        );
        debug!(id = %id, "Created object");

        let state = ObservedState::new(desired.clone(), status);
        Ok((ResourceId::new(id), state))
    }

    async fn delete(&self, id: &ResourceId) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().await;
        pop_failure(&mut inner, CallKind::Delete, id.as_str())?;

        match inner.objects.remove(id.as_str()) {
            Some(_) => {
                debug!(id = %id, "Deleted object");
                Ok(())
            }
            None => Err(ConvergeError::NotFound { id: id.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_fetch() {
        let remote = MemoryRemote::new();
        let mut desired = AttributeSet::new();
        desired.insert("name", "api").unwrap();

        let (id, state) = remote.create(&desired).await.unwrap();
        assert_eq!(state.status.as_str(), "AVAILABLE");

        let fetched = remote.fetch(&id).await.unwrap();
        assert_eq!(fetched.attributes.get("name"), Some(&AttrValue::from("api")));
        assert_eq!(remote.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let remote = MemoryRemote::new();
        let err = remote.fetch(&ResourceId::from("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_replace_keeps_stored_type() {
        let remote = MemoryRemote::new();
        let mut desired = AttributeSet::new();
        desired.insert("burst_limit", -1i64).unwrap();
        let (id, _) = remote.create(&desired).await.unwrap();

        remote
            .apply_patch(&id, &[PatchOp::replace("/burst_limit", "500")])
            .await
            .unwrap();

        let attrs = remote.attributes(id.as_str()).await.unwrap();
        assert_eq!(attrs.get("burst_limit"), Some(&AttrValue::Int(500)));
    }

    #[tokio::test]
    async fn test_set_member_add_remove() {
        let remote = MemoryRemote::new();
        let mut desired = AttributeSet::new();
        desired
            .insert("providers", AttrValue::str_set(["a", "b"]))
            .unwrap();
        let (id, _) = remote.create(&desired).await.unwrap();

        remote
            .apply_patch(
                &id,
                &[
                    PatchOp::add("/providers/c", "c"),
                    PatchOp::remove("/providers/a"),
                ],
            )
            .await
            .unwrap();

        let attrs = remote.attributes(id.as_str()).await.unwrap();
        assert_eq!(
            attrs.get("providers"),
            Some(&AttrValue::str_set(["b", "c"]))
        );
    }

    #[tokio::test]
    async fn test_emptying_required_collection_rejected() {
        let remote = MemoryRemote::new();
        remote.require_non_empty("providers").await;
        let mut desired = AttributeSet::new();
        desired
            .insert("providers", AttrValue::str_set(["a"]))
            .unwrap();
        let (id, _) = remote.create(&desired).await.unwrap();

        let err = remote
            .apply_patch(&id, &[PatchOp::remove("/providers/a")])
            .await
            .unwrap_err();
        assert!(matches!(err, ConvergeError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_scripted_statuses_advance_per_fetch() {
        let remote = MemoryRemote::new();
        remote
            .put_object("srv", AttributeSet::new(), "CREATING")
            .await;
        remote
            .script_statuses("srv", ["CREATING", "AVAILABLE"])
            .await;

        let id = ResourceId::from("srv");
        assert_eq!(remote.fetch(&id).await.unwrap().status.as_str(), "CREATING");
        assert_eq!(
            remote.fetch(&id).await.unwrap().status.as_str(),
            "AVAILABLE"
        );
        // Script exhausted: last status sticks.
        assert_eq!(
            remote.fetch(&id).await.unwrap().status.as_str(),
            "AVAILABLE"
        );
    }

    #[tokio::test]
    async fn test_scripted_failures_consumed_in_order() {
        let remote = MemoryRemote::new();
        let mut desired = AttributeSet::new();
        desired.insert("name", "x").unwrap();
        remote
            .script_failures(
                CallKind::Create,
                [ScriptedFailure::transient("Conflict", "grant pending")],
            )
            .await;

        let err = remote.create(&desired).await.unwrap_err();
        assert!(err.is_transient());
        // Script exhausted: next create succeeds.
        remote.create(&desired).await.unwrap();
        assert_eq!(remote.create_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_names_target_resource() {
        let remote = MemoryRemote::new();
        let (id, _) = remote.create(&AttributeSet::new()).await.unwrap();
        remote
            .script_failures(
                CallKind::ApplyPatch,
                [ScriptedFailure::transient("Conflict", "grant pending")],
            )
            .await;

        let err = remote
            .apply_patch(&id, &[PatchOp::replace("/name", "api")])
            .await
            .unwrap_err();
        match err {
            ConvergeError::Transient {
                id: failed_id,
                code,
                ..
            } => {
                assert_eq!(failed_id, id.as_str());
                assert_eq!(code, "Conflict");
            }
            other => panic!("expected transient error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let remote = MemoryRemote::new();
        let (id, _) = remote.create(&AttributeSet::new()).await.unwrap();

        remote.delete(&id).await.unwrap();
        let err = remote.delete(&id).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
