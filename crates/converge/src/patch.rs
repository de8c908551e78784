//! Patch builder
//!
//! Converts an ordered change sequence into the partial-update
//! operations the remote API consumes, honoring per-attribute wire
//! addressing and the add-before-remove ordering rule for collections
//! the API refuses to see empty.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::attr::AttrValue;
use crate::diff::{AttributeChange, ChangeKind};
use crate::error::{ConvergeError, Result};

/// JSON-Patch-like operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
}

impl std::fmt::Display for PatchOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatchOpKind::Add => write!(f, "add"),
            PatchOpKind::Remove => write!(f, "remove"),
            PatchOpKind::Replace => write!(f, "replace"),
        }
    }
}

/// One partial-update instruction against the remote object.
///
/// `Remove` never carries a value; `Add` and `Replace` always do. The
/// fields are private and the constructors are the only way to build
/// one, which keeps that invariant out of reach of callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    op: PatchOpKind,
    path: String,
    value: Option<String>,
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Add,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Remove,
            path: path.into(),
            value: None,
        }
    }

    pub fn replace(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            op: PatchOpKind::Replace,
            path: path.into(),
            value: Some(value.into()),
        }
    }

    pub fn kind(&self) -> PatchOpKind {
        self.op
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

/// Wire-addressing traits of one attribute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressTraits {
    /// The remote API rejects any patch to this attribute; mutation
    /// requires resource replacement.
    #[serde(default)]
    pub immutable: bool,
    /// The remote API rejects an update that would leave this
    /// collection empty, even transiently.
    #[serde(default)]
    pub non_empty_required: bool,
}

/// Per-resource-type mapping from attribute path to wire path.
///
/// Collection members address as `<wire path>/<member key>`. Built once
/// per resource type and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressingScheme {
    addresses: HashMap<String, (String, AddressTraits)>,
}

impl AddressingScheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a patchable attribute.
    pub fn route(mut self, attr_path: impl Into<String>, wire_path: impl Into<String>) -> Self {
        self.addresses
            .insert(attr_path.into(), (wire_path.into(), AddressTraits::default()));
        self
    }

    /// Register an attribute that can only be set at creation.
    pub fn immutable(mut self, attr_path: impl Into<String>) -> Self {
        self.addresses.insert(
            attr_path.into(),
            (
                String::new(),
                AddressTraits {
                    immutable: true,
                    non_empty_required: false,
                },
            ),
        );
        self
    }

    /// Register a collection the API refuses to see empty.
    pub fn route_non_empty(
        mut self,
        attr_path: impl Into<String>,
        wire_path: impl Into<String>,
    ) -> Self {
        self.addresses.insert(
            attr_path.into(),
            (
                wire_path.into(),
                AddressTraits {
                    immutable: false,
                    non_empty_required: true,
                },
            ),
        );
        self
    }

    fn lookup(&self, attr_path: &str) -> Result<(&str, &AddressTraits)> {
        match self.addresses.get(attr_path) {
            None => Err(ConvergeError::Unaddressable {
                path: attr_path.to_string(),
            }),
            Some((_, traits)) if traits.immutable => Err(ConvergeError::ImmutableAttribute {
                path: attr_path.to_string(),
            }),
            Some((wire, traits)) => Ok((wire.as_str(), traits)),
        }
    }

    /// Whether the collection at `attr_path` may never be observed
    /// empty.
    pub fn is_non_empty_required(&self, attr_path: &str) -> bool {
        self.addresses
            .get(attr_path)
            .map(|(_, t)| t.non_empty_required)
            .unwrap_or(false)
    }
}

/// Render one attribute value in the remote wire representation.
///
/// Booleans render as literal `"true"`/`"false"`; floats use fixed
/// six-decimal, non-exponential formatting so sentinel values like `-1`
/// round-trip exactly and no locale-dependent formatting can leak in.
pub fn encode_value(path: &str, value: &AttrValue) -> Result<String> {
    match value {
        AttrValue::Str(s) => Ok(s.clone()),
        AttrValue::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        AttrValue::Int(i) => Ok(i.to_string()),
        AttrValue::Float(f) => Ok(format!("{f:.6}")),
        AttrValue::StrSet(_) | AttrValue::StrMap(_) => Err(ConvergeError::Unencodable {
            path: path.to_string(),
        }),
    }
}

/// Build the ordered op sequence for a change set.
///
/// Fails fast on immutable or unaddressed paths rather than emitting an
/// op the API would reject with an opaque error. For every collection
/// registered `non_empty_required`, all `Add` ops precede all `Remove`
/// ops for that collection so its membership is never empty
/// mid-application.
pub fn build(changes: &[AttributeChange], scheme: &AddressingScheme) -> Result<Vec<PatchOp>> {
    let mut ops: Vec<(Option<String>, PatchOp)> = Vec::with_capacity(changes.len());

    for change in changes {
        match &change.collection {
            Some(collection) => {
                let (wire, _) = scheme.lookup(collection)?;
                let member = change
                    .path
                    .strip_prefix(&format!("{collection}."))
                    .unwrap_or(&change.path);
                let member_path = format!("{wire}/{member}");
                let op = match change.kind {
                    ChangeKind::Added => {
                        let value = change.new_value.as_ref().ok_or_else(|| {
                            ConvergeError::Unencodable {
                                path: change.path.clone(),
                            }
                        })?;
                        PatchOp::add(member_path, encode_value(&change.path, value)?)
                    }
                    ChangeKind::Changed => {
                        let value = change.new_value.as_ref().ok_or_else(|| {
                            ConvergeError::Unencodable {
                                path: change.path.clone(),
                            }
                        })?;
                        PatchOp::replace(member_path, encode_value(&change.path, value)?)
                    }
                    ChangeKind::Removed => PatchOp::remove(member_path),
                };
                ops.push((Some(collection.clone()), op));
            }
            None => {
                let (wire, _) = scheme.lookup(&change.path)?;
                let op = match change.kind {
                    ChangeKind::Added | ChangeKind::Changed => {
                        let value = change.new_value.as_ref().ok_or_else(|| {
                            ConvergeError::Unencodable {
                                path: change.path.clone(),
                            }
                        })?;
                        PatchOp::replace(wire, encode_value(&change.path, value)?)
                    }
                    ChangeKind::Removed => PatchOp::remove(wire),
                };
                ops.push((None, op));
            }
        }
    }

    reorder_for_non_empty(&mut ops, scheme);
    Ok(ops.into_iter().map(|(_, op)| op).collect())
}

/// Within the op positions belonging to one non-empty-required
/// collection, move its `Add` ops ahead of everything else, keeping
/// relative order stable. Ops of other attributes keep their slots.
fn reorder_for_non_empty(ops: &mut [(Option<String>, PatchOp)], scheme: &AddressingScheme) {
    let mut collections: Vec<String> = ops
        .iter()
        .filter_map(|(c, _)| c.clone())
        .filter(|c| scheme.is_non_empty_required(c))
        .collect();
    collections.dedup();

    for collection in collections {
        let slots: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, (c, _))| c.as_deref() == Some(collection.as_str()))
            .map(|(i, _)| i)
            .collect();

        let mut reordered: Vec<PatchOp> = Vec::with_capacity(slots.len());
        for &i in &slots {
            if ops[i].1.op == PatchOpKind::Add {
                reordered.push(ops[i].1.clone());
            }
        }
        for &i in &slots {
            if ops[i].1.op != PatchOpKind::Add {
                reordered.push(ops[i].1.clone());
            }
        }
        for (slot, op) in slots.into_iter().zip(reordered) {
            ops[slot].1 = op;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttributeSet;
    use crate::diff::diff;

    fn throttling_scheme() -> AddressingScheme {
        AddressingScheme::new()
            .route("burst_limit", "/throttling/burstLimit")
            .route("rate_limit", "/throttling/rateLimit")
    }

    #[test]
    fn test_scalar_replace_encoding() {
        let mut observed = AttributeSet::new();
        observed.insert("burst_limit", -1i64).unwrap();
        observed.insert("rate_limit", -1i64).unwrap();
        let mut desired = AttributeSet::new();
        desired.insert("burst_limit", 500i64).unwrap();
        desired.insert("rate_limit", 1000.0f64).unwrap();

        let changes = diff(&observed, &desired);
        let ops = build(&changes, &throttling_scheme()).unwrap();

        assert_eq!(
            ops,
            vec![
                PatchOp::replace("/throttling/burstLimit", "500"),
                PatchOp::replace("/throttling/rateLimit", "1000.000000"),
            ]
        );
    }

    #[test]
    fn test_bool_encoding_is_literal() {
        assert_eq!(encode_value("x", &AttrValue::Bool(true)).unwrap(), "true");
        assert_eq!(encode_value("x", &AttrValue::Bool(false)).unwrap(), "false");
    }

    #[test]
    fn test_sentinel_int_round_trips() {
        assert_eq!(encode_value("x", &AttrValue::Int(-1)).unwrap(), "-1");
    }

    #[test]
    fn test_float_is_fixed_format() {
        // Large floats must not fall into exponential notation.
        assert_eq!(
            encode_value("x", &AttrValue::Float(10000.5)).unwrap(),
            "10000.500000"
        );
    }

    #[test]
    fn test_adds_precede_removes_for_required_collection() {
        let scheme = AddressingScheme::new().route_non_empty("providers", "/providerARNs");

        let mut observed = AttributeSet::new();
        observed
            .insert("providers", AttrValue::str_set(["a", "b"]))
            .unwrap();
        let mut desired = AttributeSet::new();
        desired
            .insert("providers", AttrValue::str_set(["b", "c"]))
            .unwrap();

        let changes = diff(&observed, &desired);
        let ops = build(&changes, &scheme).unwrap();

        assert_eq!(
            ops,
            vec![
                PatchOp::add("/providerARNs/c", "c"),
                PatchOp::remove("/providerARNs/a"),
            ]
        );
    }

    #[test]
    fn test_full_replacement_of_required_set_orders_all_adds_first() {
        let scheme = AddressingScheme::new().route_non_empty("providers", "/providerARNs");

        let mut observed = AttributeSet::new();
        observed
            .insert("providers", AttrValue::str_set(["a", "b"]))
            .unwrap();
        let mut desired = AttributeSet::new();
        desired
            .insert("providers", AttrValue::str_set(["c", "d"]))
            .unwrap();

        let changes = diff(&observed, &desired);
        let ops = build(&changes, &scheme).unwrap();

        let add_count = ops
            .iter()
            .take_while(|op| op.kind() == PatchOpKind::Add)
            .count();
        assert_eq!(add_count, 2);
        assert!(ops[2..].iter().all(|op| op.kind() == PatchOpKind::Remove));
    }

    #[test]
    fn test_unflagged_collection_keeps_change_order() {
        let scheme = AddressingScheme::new().route("audiences", "/audiences");

        let mut observed = AttributeSet::new();
        observed
            .insert("audiences", AttrValue::str_set(["a", "b"]))
            .unwrap();
        let mut desired = AttributeSet::new();
        desired
            .insert("audiences", AttrValue::str_set(["b", "c"]))
            .unwrap();

        let changes = diff(&observed, &desired);
        let ops = build(&changes, &scheme).unwrap();

        // Diff order (adds then removes per symmetric difference) is
        // preserved untouched.
        assert_eq!(ops[0], PatchOp::add("/audiences/c", "c"));
        assert_eq!(ops[1], PatchOp::remove("/audiences/a"));
    }

    #[test]
    fn test_immutable_attribute_fails_fast() {
        let scheme = AddressingScheme::new().immutable("endpoint_type");

        let mut observed = AttributeSet::new();
        observed.insert("endpoint_type", "REGIONAL").unwrap();
        let mut desired = AttributeSet::new();
        desired.insert("endpoint_type", "EDGE").unwrap();

        let changes = diff(&observed, &desired);
        let err = build(&changes, &scheme).unwrap_err();
        assert!(matches!(err, ConvergeError::ImmutableAttribute { .. }));
    }

    #[test]
    fn test_unaddressed_path_fails_fast() {
        let mut observed = AttributeSet::new();
        observed.insert("mystery", 1i64).unwrap();
        let mut desired = AttributeSet::new();
        desired.insert("mystery", 2i64).unwrap();

        let changes = diff(&observed, &desired);
        let err = build(&changes, &AddressingScheme::new()).unwrap_err();
        assert!(matches!(err, ConvergeError::Unaddressable { .. }));
    }

    #[test]
    fn test_remove_never_carries_value() {
        let op = PatchOp::remove("/x");
        assert_eq!(op.kind(), PatchOpKind::Remove);
        assert!(op.value().is_none());
        assert_eq!(PatchOp::add("/x", "1").value(), Some("1"));
        assert_eq!(PatchOp::replace("/x", "1").value(), Some("1"));
        assert_eq!(op.path(), "/x");
    }

    #[test]
    fn test_map_changes_become_member_replaces() {
        let scheme = AddressingScheme::new().route("tags", "/tags");

        let mut observed = AttributeSet::new();
        observed
            .insert("tags", AttrValue::str_map([("env", "dev")]))
            .unwrap();
        let mut desired = AttributeSet::new();
        desired
            .insert("tags", AttrValue::str_map([("env", "prod")]))
            .unwrap();

        let changes = diff(&observed, &desired);
        let ops = build(&changes, &scheme).unwrap();
        assert_eq!(ops, vec![PatchOp::replace("/tags/env", "prod")]);
    }
}
