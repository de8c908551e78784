//! Typed attribute sets for desired and observed resource state
//!
//! An [`AttributeSet`] is an insertion-ordered, unique mapping from an
//! attribute path (dot-delimited, e.g. `settings.throttling_burst_limit`)
//! to a typed value plus per-attribute capability flags. Desired sets
//! are owned by the caller's configuration; observed sets are owned by
//! the reconciler and refreshed on every read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{ConvergeError, Result};

/// Identifier of a remote resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Remote status value. Status vocabularies are provider-defined, so
/// the core keeps them open-ended rather than a closed enum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub String);

impl Status {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A typed attribute value.
///
/// Collections use ordered containers so member iteration is ascending
/// by key, which keeps diff output deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    StrSet(BTreeSet<String>),
    StrMap(BTreeMap<String, String>),
}

impl AttrValue {
    /// Whether this value is a collection (set or map).
    pub fn is_collection(&self) -> bool {
        matches!(self, AttrValue::StrSet(_) | AttrValue::StrMap(_))
    }

    pub fn str_set(members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        AttrValue::StrSet(members.into_iter().map(Into::into).collect())
    }

    pub fn str_map(
        entries: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        AttrValue::StrMap(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Bool(b)
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        AttrValue::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(f: f64) -> Self {
        AttrValue::Float(f)
    }
}

/// Per-attribute capability flags.
///
/// `user_managed` marks an attribute whose absence from the desired set
/// means "unset it remotely". `computed_only` marks an attribute the
/// remote system populates on its own; it never participates in diffs.
/// The two are disjoint by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrFlags {
    #[serde(default)]
    pub user_managed: bool,
    #[serde(default)]
    pub computed_only: bool,
}

impl AttrFlags {
    /// No opinion tracking: absence from desired is simply ignored.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn user_managed() -> Self {
        Self {
            user_managed: true,
            computed_only: false,
        }
    }

    pub fn computed_only() -> Self {
        Self {
            user_managed: false,
            computed_only: true,
        }
    }
}

/// One attribute entry: path, value, flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrEntry {
    pub path: String,
    pub value: AttrValue,
    #[serde(default)]
    pub flags: AttrFlags,
}

/// Insertion-ordered mapping from attribute path to typed value.
///
/// Paths are unique within one set; inserting a duplicate is an error.
/// Iteration yields declaration order, which is the order the diff
/// engine walks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    entries: Vec<AttrEntry>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute with default flags.
    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<AttrValue>) -> Result<()> {
        self.insert_with_flags(path, value, AttrFlags::none())
    }

    /// Insert an attribute with explicit flags.
    pub fn insert_with_flags(
        &mut self,
        path: impl Into<String>,
        value: impl Into<AttrValue>,
        flags: AttrFlags,
    ) -> Result<()> {
        let path = path.into();
        if flags.user_managed && flags.computed_only {
            return Err(ConvergeError::ConflictingFlags { path });
        }
        if self.index.contains_key(&path) {
            return Err(ConvergeError::DuplicateAttribute { path });
        }
        self.index.insert(path.clone(), self.entries.len());
        self.entries.push(AttrEntry {
            path,
            value: value.into(),
            flags,
        });
        Ok(())
    }

    /// Replace the value at an existing path, or insert it if absent.
    pub fn set(&mut self, path: impl Into<String>, value: impl Into<AttrValue>) {
        let path = path.into();
        match self.index.get(&path) {
            Some(&i) => self.entries[i].value = value.into(),
            None => {
                self.index.insert(path.clone(), self.entries.len());
                self.entries.push(AttrEntry {
                    path,
                    value: value.into(),
                    flags: AttrFlags::none(),
                });
            }
        }
    }

    /// Remove an attribute, returning its entry if present.
    pub fn remove(&mut self, path: &str) -> Option<AttrEntry> {
        let i = self.index.remove(path)?;
        let entry = self.entries.remove(i);
        for e in self.entries.iter().skip(i) {
            if let Some(slot) = self.index.get_mut(&e.path) {
                *slot -= 1;
            }
        }
        Some(entry)
    }

    pub fn get(&self, path: &str) -> Option<&AttrValue> {
        self.index.get(path).map(|&i| &self.entries[i].value)
    }

    pub fn entry(&self, path: &str) -> Option<&AttrEntry> {
        self.index.get(path).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &AttrEntry> {
        self.entries.iter()
    }

    /// Rebuild the path index after deserialization.
    ///
    /// Serde skips the index field; a set that crossed a serialization
    /// boundary must be re-indexed before lookups work.
    pub fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.path.clone(), i))
            .collect();
    }
}

impl FromIterator<(String, AttrValue)> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        let mut set = AttributeSet::new();
        for (path, value) in iter {
            // Last write wins on duplicates, matching map semantics.
            set.set(path, value);
        }
        set
    }
}

/// A snapshot of remote resource state: attributes plus the remote
/// status at fetch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservedState {
    pub attributes: AttributeSet,
    pub status: Status,
    pub status_message: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl ObservedState {
    pub fn new(attributes: AttributeSet, status: impl Into<Status>) -> Self {
        Self {
            attributes,
            status: status.into(),
            status_message: None,
            fetched_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_preserves_declaration_order() {
        let mut set = AttributeSet::new();
        set.insert("b", 1i64).unwrap();
        set.insert("a", 2i64).unwrap();
        set.insert("c", 3i64).unwrap();

        let paths: Vec<&str> = set.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let mut set = AttributeSet::new();
        set.insert("name", "x").unwrap();
        let err = set.insert("name", "y").unwrap_err();
        assert!(matches!(err, ConvergeError::DuplicateAttribute { .. }));
    }

    #[test]
    fn test_conflicting_flags_rejected() {
        let mut set = AttributeSet::new();
        let err = set
            .insert_with_flags(
                "x",
                true,
                AttrFlags {
                    user_managed: true,
                    computed_only: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConvergeError::ConflictingFlags { .. }));
    }

    #[test]
    fn test_remove_keeps_index_consistent() {
        let mut set = AttributeSet::new();
        set.insert("a", 1i64).unwrap();
        set.insert("b", 2i64).unwrap();
        set.insert("c", 3i64).unwrap();

        set.remove("a");
        assert_eq!(set.get("b"), Some(&AttrValue::Int(2)));
        assert_eq!(set.get("c"), Some(&AttrValue::Int(3)));
        assert!(!set.contains("a"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut set = AttributeSet::new();
        set.insert("a", 1i64).unwrap();
        set.insert("b", 2i64).unwrap();
        set.set("a", 10i64);

        assert_eq!(set.get("a"), Some(&AttrValue::Int(10)));
        let paths: Vec<&str> = set.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b"]);
    }

    #[test]
    fn test_reindex_after_roundtrip() {
        let mut set = AttributeSet::new();
        set.insert("a", AttrValue::str_set(["x", "y"])).unwrap();
        set.insert("b", false).unwrap();

        let json = serde_json::to_string(&set).unwrap();
        let mut restored: AttributeSet = serde_json::from_str(&json).unwrap();
        restored.reindex();

        assert_eq!(restored.get("b"), Some(&AttrValue::Bool(false)));
        assert_eq!(restored, set);
    }

    #[test]
    fn test_str_set_orders_members() {
        let v = AttrValue::str_set(["zeta", "alpha", "mid"]);
        if let AttrValue::StrSet(members) = v {
            let ordered: Vec<&str> = members.iter().map(String::as_str).collect();
            assert_eq!(ordered, vec!["alpha", "mid", "zeta"]);
        } else {
            panic!("expected StrSet");
        }
    }
}
