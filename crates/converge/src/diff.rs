//! Attribute-level diff engine
//!
//! Compares a desired attribute set against the last observed set and
//! emits the minimal ordered change sequence. Output order follows the
//! desired set's declaration order, with collection members expanded in
//! ascending key order, so identical inputs always produce identical
//! output.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::attr::{AttrValue, AttributeSet};

/// Kind of change detected for one attribute path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Changed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Changed => write!(f, "changed"),
        }
    }
}

/// One detected difference between observed and desired state.
///
/// For scalar attributes `path` is the attribute path itself. For
/// collection members `path` is `<attribute path>.<member key>` and
/// `collection` names the owning attribute so the patch builder can
/// apply per-collection ordering rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeChange {
    pub path: String,
    pub kind: ChangeKind,
    pub old_value: Option<AttrValue>,
    pub new_value: Option<AttrValue>,
    /// Owning collection attribute path, when this change is a
    /// collection-member change.
    pub collection: Option<String>,
}

impl AttributeChange {
    fn scalar(
        path: &str,
        kind: ChangeKind,
        old_value: Option<AttrValue>,
        new_value: Option<AttrValue>,
    ) -> Self {
        Self {
            path: path.to_string(),
            kind,
            old_value,
            new_value,
            collection: None,
        }
    }

    fn member(
        collection: &str,
        key: &str,
        kind: ChangeKind,
        old_value: Option<AttrValue>,
        new_value: Option<AttrValue>,
    ) -> Self {
        Self {
            path: format!("{collection}.{key}"),
            kind,
            old_value,
            new_value,
            collection: Some(collection.to_string()),
        }
    }
}

/// Compute the ordered change sequence that converges `observed` to
/// `desired`.
///
/// Rules:
/// - A path absent from desired is "no opinion" and yields nothing,
///   unless the observed entry is flagged `user_managed`, in which case
///   absence means unset and yields `Removed`.
/// - Observed entries flagged `computed_only` never yield changes.
/// - Scalars compare by value equality.
/// - Sets and maps diff by symmetric difference, member-by-member.
pub fn diff(observed: &AttributeSet, desired: &AttributeSet) -> Vec<AttributeChange> {
    let mut changes = Vec::new();

    for entry in desired.iter() {
        if entry.flags.computed_only {
            continue;
        }
        match observed.entry(&entry.path) {
            None => emit_added(&mut changes, &entry.path, &entry.value),
            Some(old) => {
                if old.flags.computed_only {
                    continue;
                }
                if old.value != entry.value {
                    emit_changed(&mut changes, &entry.path, &old.value, &entry.value);
                }
            }
        }
    }

    // Managed attributes absent from desired are unset remotely.
    // Walk in observed declaration order for determinism.
    for entry in observed.iter() {
        if entry.flags.computed_only || !entry.flags.user_managed {
            continue;
        }
        if !desired.contains(&entry.path) {
            emit_removed(&mut changes, &entry.path, &entry.value);
        }
    }

    changes
}

fn emit_added(changes: &mut Vec<AttributeChange>, path: &str, value: &AttrValue) {
    match value {
        AttrValue::StrSet(members) => {
            for m in members {
                changes.push(AttributeChange::member(
                    path,
                    m,
                    ChangeKind::Added,
                    None,
                    Some(AttrValue::Str(m.clone())),
                ));
            }
        }
        AttrValue::StrMap(map) => {
            for (k, v) in map {
                changes.push(AttributeChange::member(
                    path,
                    k,
                    ChangeKind::Added,
                    None,
                    Some(AttrValue::Str(v.clone())),
                ));
            }
        }
        scalar => changes.push(AttributeChange::scalar(
            path,
            ChangeKind::Added,
            None,
            Some(scalar.clone()),
        )),
    }
}

fn emit_removed(changes: &mut Vec<AttributeChange>, path: &str, value: &AttrValue) {
    match value {
        AttrValue::StrSet(members) => {
            for m in members {
                changes.push(AttributeChange::member(
                    path,
                    m,
                    ChangeKind::Removed,
                    Some(AttrValue::Str(m.clone())),
                    None,
                ));
            }
        }
        AttrValue::StrMap(map) => {
            for (k, v) in map {
                changes.push(AttributeChange::member(
                    path,
                    k,
                    ChangeKind::Removed,
                    Some(AttrValue::Str(v.clone())),
                    None,
                ));
            }
        }
        scalar => changes.push(AttributeChange::scalar(
            path,
            ChangeKind::Removed,
            Some(scalar.clone()),
            None,
        )),
    }
}

fn emit_changed(changes: &mut Vec<AttributeChange>, path: &str, old: &AttrValue, new: &AttrValue) {
    match (old, new) {
        (AttrValue::StrSet(old_set), AttrValue::StrSet(new_set)) => {
            diff_set(changes, path, old_set, new_set);
        }
        (AttrValue::StrMap(old_map), AttrValue::StrMap(new_map)) => {
            diff_map(changes, path, old_map, new_map);
        }
        // Type changed, or scalar value changed: whole-value replace.
        _ => changes.push(AttributeChange::scalar(
            path,
            ChangeKind::Changed,
            Some(old.clone()),
            Some(new.clone()),
        )),
    }
}

fn diff_set(
    changes: &mut Vec<AttributeChange>,
    path: &str,
    old: &BTreeSet<String>,
    new: &BTreeSet<String>,
) {
    for m in new.difference(old) {
        changes.push(AttributeChange::member(
            path,
            m,
            ChangeKind::Added,
            None,
            Some(AttrValue::Str(m.clone())),
        ));
    }
    for m in old.difference(new) {
        changes.push(AttributeChange::member(
            path,
            m,
            ChangeKind::Removed,
            Some(AttrValue::Str(m.clone())),
            None,
        ));
    }
}

fn diff_map(
    changes: &mut Vec<AttributeChange>,
    path: &str,
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) {
    for (k, v) in new {
        match old.get(k) {
            None => changes.push(AttributeChange::member(
                path,
                k,
                ChangeKind::Added,
                None,
                Some(AttrValue::Str(v.clone())),
            )),
            Some(old_v) if old_v != v => changes.push(AttributeChange::member(
                path,
                k,
                ChangeKind::Changed,
                Some(AttrValue::Str(old_v.clone())),
                Some(AttrValue::Str(v.clone())),
            )),
            Some(_) => {}
        }
    }
    for (k, v) in old {
        if !new.contains_key(k) {
            changes.push(AttributeChange::member(
                path,
                k,
                ChangeKind::Removed,
                Some(AttrValue::Str(v.clone())),
                None,
            ));
        }
    }
}
