//! Dynamic value model
//!
//! The reactive runtime tracks plain data containers owned by the host
//! program. `Value` is the closed set of shapes it understands: primitives,
//! objects with named fields, and ordered lists.
//!
//! # Sharing
//!
//! `Object` and `List` are cheap cloneable handles over shared storage
//! (`Arc` + `RwLock`). Cloning a handle aliases the same container, which is
//! what makes transparent tracking possible: the wrapper attached to a
//! container is visible through every handle to it.
//!
//! # Identity vs. equality
//!
//! Change detection uses [`Value::same`]: value equality for primitives
//! (with `NaN == NaN` treated as "no change") and pointer identity for
//! containers. Internal mutation of a container is invisible to identity
//! comparison, which is why watchers re-deliver container-typed results
//! (see the watcher module).
//!
//! # Untracked access
//!
//! Methods suffixed `_untracked` read or write the raw storage without
//! touching dependency state. They are the construction-time API; once a
//! container is observed, mutations must go through the tracked operations
//! or notifications will be missed.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use crate::reactive::Observer;

/// A key addressing one slot of a container: a named field or a list index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Named field of an object.
    Field(String),
    /// Position in an ordered list.
    Index(usize),
}

impl From<&str> for Key {
    fn from(key: &str) -> Self {
        Key::Field(key.to_string())
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key::Field(key)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Field(name) => write!(f, "{name}"),
            Key::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A dynamically typed value tracked by the runtime.
///
/// The tag set is closed on purpose: "is a container" is decided by the
/// `Object`/`List` tags, never by a capability probe, so opaque host handles
/// smuggled in as primitives are never re-delivered spuriously.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent / no value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Object with named fields (shared handle).
    Object(Object),
    /// Ordered list (shared handle).
    List(List),
}

impl Value {
    /// Whether this value is a container (`Object` or `List`).
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Object(_) | Value::List(_))
    }

    /// Whether this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The observer attached to this value, if it is a wrapped container.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        match self {
            Value::Object(object) => object.observer(),
            Value::List(list) => list.observer(),
            _ => None,
        }
    }

    /// Change-detection comparison.
    ///
    /// Primitives compare by value; `Int` and `Float` compare numerically.
    /// Two `NaN`s count as equal so that re-assigning `NaN` over `NaN` does
    /// not notify. Containers compare by pointer identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                int_float_same(*a, *b)
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Short tag name, used in warnings.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::List(_) => "list",
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric payload widened to `f64`, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// String payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Object handle, if any.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// List handle, if any.
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Build a value tree from a `serde_json` value.
    ///
    /// Containers come back untracked; call `observe` to wrap them.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::List(List::from_values(items.into_iter().map(Value::from_json)))
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_entries(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))),
            )),
        }
    }

    /// Convert this value tree to a `serde_json` value.
    ///
    /// Reads the raw storage (no dependency registration). Cyclic container
    /// graphs are out of contract here and will not terminate.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(n) => serde_json::Value::from(*n),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Object(object) => serde_json::Value::Object(
                object
                    .entries_untracked()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json()))
                    .collect(),
            ),
            Value::List(list) => serde_json::Value::Array(
                list.items_untracked().iter().map(Value::to_json).collect(),
            ),
        }
    }
}

/// Exact cross-tag numeric comparison. Casting `i64` to `f64` rounds above
/// 2^53, so equality must hold through the round trip in both directions;
/// the range guard keeps the float-to-int cast from saturating.
fn int_float_same(int: i64, float: f64) -> bool {
    float >= -9_223_372_036_854_775_808.0
        && float < 9_223_372_036_854_775_808.0
        && float as i64 == int
        && int as f64 == float
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Value::List(list)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Float(n) => write!(f, "Float({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Object(object) => object.fmt(f),
            Value::List(list) => list.fmt(f),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(n) => serializer.serialize_i64(*n),
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Object(object) => object.serialize(serializer),
            Value::List(list) => list.serialize(serializer),
        }
    }
}

struct ObjectInner {
    entries: IndexMap<String, Value>,
    observer: Option<Arc<Observer>>,
    /// Opt-out marker: runtime-internal bookkeeping containers that must
    /// never become reactive set this and are skipped by `observe`.
    opaque: bool,
}

/// Shared handle to an object container with named fields.
#[derive(Clone)]
pub struct Object {
    inner: Arc<RwLock<ObjectInner>>,
}

impl Object {
    /// Create an empty object.
    pub fn new() -> Self {
        Self::from_entries(std::iter::empty())
    }

    /// Create an object from `(key, value)` pairs, preserving order.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ObjectInner {
                entries: entries.into_iter().collect(),
                observer: None,
                opaque: false,
            })),
        }
    }

    /// Whether two handles alias the same container.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity of the underlying container.
    pub fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Mark this container as runtime-internal; `observe` will skip it.
    pub fn mark_opaque(&self) {
        self.inner.write().opaque = true;
    }

    /// Whether this container opted out of observation.
    pub fn is_opaque(&self) -> bool {
        self.inner.read().opaque
    }

    /// The attached observer, if this container has been wrapped.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.read().observer.clone()
    }

    pub(crate) fn set_observer(&self, observer: Arc<Observer>) {
        self.inner.write().observer = Some(observer);
    }

    /// Read a field without registering a dependency.
    pub fn get_untracked(&self, key: &str) -> Value {
        self.inner
            .read()
            .entries
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Store a field without notifying anyone. Construction-time API.
    pub fn insert_untracked(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.write().entries.insert(key.into(), value.into());
    }

    /// Remove a field without notifying anyone.
    pub fn remove_untracked(&self, key: &str) -> Option<Value> {
        self.inner.write().entries.shift_remove(key)
    }

    /// Whether the container has an own field named `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.read().entries.contains_key(key)
    }

    /// Field names in insertion order, without registering a dependency.
    pub fn keys_untracked(&self) -> Vec<String> {
        self.inner.read().entries.keys().cloned().collect()
    }

    /// Field count, without registering a dependency.
    pub fn len_untracked(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Snapshot of all entries, without registering a dependency.
    pub fn entries_untracked(&self) -> Vec<(String, Value)> {
        self.inner
            .read()
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Object")
            .field("len", &inner.entries.len())
            .field("observed", &inner.observer.is_some())
            .finish()
    }
}

impl Serialize for Object {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.entries_untracked();
        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in &entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

struct ListInner {
    items: Vec<Value>,
    observer: Option<Arc<Observer>>,
    opaque: bool,
}

/// Shared handle to an ordered list container.
#[derive(Clone)]
pub struct List {
    inner: Arc<RwLock<ListInner>>,
}

impl List {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::from_values(std::iter::empty())
    }

    /// Create a list from values, preserving order.
    pub fn from_values(items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ListInner {
                items: items.into_iter().collect(),
                observer: None,
                opaque: false,
            })),
        }
    }

    /// Whether two handles alias the same container.
    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identity of the underlying container.
    pub fn ptr_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    /// Mark this container as runtime-internal; `observe` will skip it.
    pub fn mark_opaque(&self) {
        self.inner.write().opaque = true;
    }

    /// Whether this container opted out of observation.
    pub fn is_opaque(&self) -> bool {
        self.inner.read().opaque
    }

    /// The attached observer, if this container has been wrapped.
    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.read().observer.clone()
    }

    pub(crate) fn set_observer(&self, observer: Arc<Observer>) {
        self.inner.write().observer = Some(observer);
    }

    /// Read an element without registering a dependency.
    pub fn get_untracked(&self, index: usize) -> Option<Value> {
        self.inner.read().items.get(index).cloned()
    }

    /// Append an element without notifying anyone. Construction-time API.
    pub fn push_untracked(&self, value: impl Into<Value>) {
        self.inner.write().items.push(value.into());
    }

    /// Element count, without registering a dependency.
    pub fn len_untracked(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Snapshot of all elements, without registering a dependency.
    pub fn items_untracked(&self) -> Vec<Value> {
        self.inner.read().items.clone()
    }

    /// Run `f` with mutable access to the raw element storage.
    ///
    /// Used by the interception layer; the lock is released before any
    /// notification fires.
    pub(crate) fn with_items_mut<R>(&self, f: impl FnOnce(&mut Vec<Value>) -> R) -> R {
        f(&mut self.inner.write().items)
    }
}

impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("List")
            .field("len", &inner.items.len())
            .field("observed", &inner.observer.is_some())
            .finish()
    }
}

impl Serialize for List {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let items = self.items_untracked();
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in &items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}
