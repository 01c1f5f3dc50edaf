//! Observable wrappers
//!
//! An `Observer` is the tracking metadata attached to one container. Once
//! attached, reads of the container's fields register the currently
//! evaluating watcher and writes dispatch notifications; callers keep
//! mutating plain data and never subscribe by hand.
//!
//! # Structure
//!
//! Per wrapped object the observer holds a side-table mapping each field to
//! its own `Dep` plus the cached observer of the field's value (when that
//! value is itself a container). Wrapped lists carry no side-table; a
//! single container-level `Dep` fires on any structural mutation (see the
//! list interception module). The container-level `Dep` of an object fires
//! on shape changes: dynamic field addition and removal.
//!
//! # Wrapping rules
//!
//! `observe` is idempotent (one observer per container, ever), recursive
//! (nested containers are wrapped along the way), and skips primitives,
//! containers marked opaque, and everything while the tracking toggle is
//! off. `observe_root` additionally counts the container as a protected
//! root: dynamic field addition/removal on it is refused with a warning.
//!
//! # The dynamic operations
//!
//! Plain field assignment cannot create tracking state for a field that
//! did not exist at wrap time, so addition and removal are explicit
//! operations ([`set`] and [`del`]) with a fail-soft decision ladder
//! mirroring the write protocol.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::value::{Key, List, Object, Value};

use super::dep::{self, Dep};
use super::runtime;

/// Hook invoked before an accepted write to a tracked field. Used by hosts
/// for misuse diagnostics (e.g. warning on direct writes to derived state).
pub type WriteHook = Arc<dyn Fn() + Send + Sync>;

struct FieldMeta {
    dep: Arc<Dep>,
    /// Observer of the field's current value, when that value is a
    /// container. Refreshed on every tracked write.
    child: Option<Arc<Observer>>,
    on_write: Option<WriteHook>,
}

/// Tracking metadata attached to a wrapped container.
pub struct Observer {
    /// Container-level dep: shape/existence changes for objects,
    /// structural mutations for lists.
    dep: Arc<Dep>,
    /// Number of usages of this container as a protected root.
    root_count: AtomicUsize,
    /// Field side-table; empty for lists.
    fields: Mutex<IndexMap<String, FieldMeta>>,
}

impl Observer {
    fn attach() -> Arc<Observer> {
        Arc::new(Observer {
            dep: Dep::new(),
            root_count: AtomicUsize::new(0),
            fields: Mutex::new(IndexMap::new()),
        })
    }

    /// The container-level dep.
    pub fn dep(&self) -> &Arc<Dep> {
        &self.dep
    }

    /// How many times this container is used as a protected root.
    pub fn root_count(&self) -> usize {
        self.root_count.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_root(&self) {
        self.root_count.fetch_add(1, Ordering::SeqCst);
    }

    fn field_meta(&self, key: &str) -> Option<(Arc<Dep>, Option<Arc<Observer>>)> {
        self.fields
            .lock()
            .get(key)
            .map(|meta| (meta.dep.clone(), meta.child.clone()))
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep.id())
            .field("root_count", &self.root_count())
            .field("fields", &self.fields.lock().len())
            .finish()
    }
}

/// Wrap a container for tracking.
///
/// Idempotent: a container that already has an observer returns it
/// unchanged. Primitives, opaque containers, and anything encountered
/// while tracking is disabled return `None`.
pub fn observe(value: &Value) -> Option<Arc<Observer>> {
    match value {
        Value::Object(object) => observe_object(object),
        Value::List(list) => observe_list(list),
        _ => None,
    }
}

/// Wrap a container and mark it as a protected root.
pub fn observe_root(value: &Value) -> Option<Arc<Observer>> {
    let observer = observe(value)?;
    observer.mark_root();
    Some(observer)
}

fn observe_object(object: &Object) -> Option<Arc<Observer>> {
    if let Some(existing) = object.observer() {
        return Some(existing);
    }
    if !runtime::tracking_enabled() || object.is_opaque() {
        return None;
    }
    let observer = Observer::attach();
    // Attach before walking so self-referential structures terminate.
    object.set_observer(observer.clone());
    for (key, value) in object.entries_untracked() {
        let child = observe(&value);
        observer.fields.lock().insert(
            key,
            FieldMeta {
                dep: Dep::new(),
                child,
                on_write: None,
            },
        );
    }
    Some(observer)
}

fn observe_list(list: &List) -> Option<Arc<Observer>> {
    if let Some(existing) = list.observer() {
        return Some(existing);
    }
    if !runtime::tracking_enabled() || list.is_opaque() {
        return None;
    }
    let observer = Observer::attach();
    list.set_observer(observer.clone());
    for item in list.items_untracked() {
        observe(&item);
    }
    Some(observer)
}

/// Install a tracked field on `object`, wrapping the value and wiring an
/// optional write hook. Wraps the object first if needed; on an untracked
/// object (tracking disabled or opaque) this degrades to a plain store.
pub fn define_reactive(
    object: &Object,
    key: &str,
    value: impl Into<Value>,
    on_write: Option<WriteHook>,
) {
    let value = value.into();
    let observer = match observe(&Value::Object(object.clone())) {
        Some(observer) => observer,
        None => {
            object.insert_untracked(key, value);
            return;
        }
    };
    let child = observe(&value);
    object.insert_untracked(key, value);
    observer.fields.lock().insert(
        key.to_string(),
        FieldMeta {
            dep: Dep::new(),
            child,
            on_write,
        },
    );
}

/// Register the active watcher against every wrapped element of a list,
/// recursively.
///
/// Element deps cannot be discovered through access interception alone, so
/// this pass runs whenever a tracked read returns a list.
pub(crate) fn depend_list(list: &List) {
    for item in list.items_untracked() {
        if let Some(observer) = item.observer() {
            observer.dep.depend();
        }
        if let Value::List(inner) = &item {
            depend_list(inner);
        }
    }
}

impl Object {
    /// Tracked field read.
    ///
    /// Registers the active watcher with the field's dep; if the value is a
    /// wrapped container, with that container's dep as well (so replacing
    /// the *contents* of a nested container also triggers dependents); and
    /// if the value is a list, with every wrapped element. Missing fields
    /// read as `Null`.
    pub fn get(&self, key: &str) -> Value {
        let value = self.get_untracked(key);
        if dep::has_target() {
            if let Some(observer) = self.observer() {
                if let Some((field_dep, child)) = observer.field_meta(key) {
                    field_dep.depend();
                    if let Some(child) = child {
                        child.dep.depend();
                    }
                    if let Value::List(list) = &value {
                        depend_list(list);
                    }
                }
            }
        }
        value
    }

    /// Tracked field write; delegates to [`set`].
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        set(
            &Value::Object(self.clone()),
            Key::Field(key.to_string()),
            value,
        );
    }

    /// Field names in insertion order; registers the active watcher with
    /// the container-level dep, so shape changes re-run it.
    pub fn keys(&self) -> Vec<String> {
        self.depend_shape();
        self.keys_untracked()
    }

    /// Tracked field count.
    pub fn len(&self) -> usize {
        self.depend_shape();
        self.len_untracked()
    }

    /// Tracked emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn depend_shape(&self) {
        if dep::has_target() {
            if let Some(observer) = self.observer() {
                observer.dep.depend();
            }
        }
    }
}

/// Tracked read of one slot of a container. Wrong-kind keys read as `Null`.
pub fn get(target: &Value, key: impl Into<Key>) -> Value {
    match (target, key.into()) {
        (Value::Object(object), Key::Field(name)) => object.get(&name),
        (Value::List(list), Key::Index(index)) => list.get(index),
        _ => Value::Null,
    }
}

/// Set a slot of a container, creating tracking state for new fields.
///
/// Decision ladder:
/// - list + valid index: grow if needed and splice-replace (the
///   interception layer notifies),
/// - existing own field: assign through the tracked write path,
/// - protected root: warn and refuse,
/// - untracked container: plain store, no notification,
/// - otherwise: define a new tracked field and notify the container dep.
///
/// Never errors; misuse reports through the warning sink.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) {
    let key = key.into();
    let value = value.into();
    match (target, &key) {
        (Value::List(list), Key::Index(index)) => list.set(*index, value),
        (Value::Object(object), Key::Field(name)) => set_field(object, name, value),
        (Value::Object(_), Key::Index(_)) | (Value::List(_), Key::Field(_)) => {
            runtime::warn(&format!(
                "cannot set key {key} on a {} value",
                target.type_name()
            ));
        }
        _ => {
            runtime::warn(&format!(
                "cannot set a reactive key on a {} value",
                target.type_name()
            ));
        }
    }
}

fn set_field(object: &Object, key: &str, value: Value) {
    let observer = object.observer();

    if object.contains_key(key) {
        match &observer {
            Some(observer) if observer.field_meta(key).is_some() => {
                assign_tracked(object, observer, key, value);
            }
            _ => object.insert_untracked(key, value),
        }
        return;
    }

    match observer {
        None => object.insert_untracked(key, value),
        Some(observer) if observer.root_count() > 0 => {
            runtime::warn(&format!(
                "avoid adding field {key:?} to a protected root at runtime; declare it upfront"
            ));
        }
        Some(observer) => {
            define_reactive(object, key, value, None);
            observer.dep.notify();
        }
    }
}

/// Write to an existing tracked field: short-circuit on unchanged values
/// (with `NaN == NaN` counting as unchanged), fire the write hook, store,
/// re-wrap, then notify. No container lock is held across the
/// notification.
fn assign_tracked(object: &Object, observer: &Arc<Observer>, key: &str, value: Value) {
    let old = object.get_untracked(key);
    if old.same(&value) {
        return;
    }
    let (field_dep, on_write) = {
        let fields = observer.fields.lock();
        match fields.get(key) {
            Some(meta) => (meta.dep.clone(), meta.on_write.clone()),
            None => return,
        }
    };
    if let Some(hook) = on_write {
        hook();
    }
    object.insert_untracked(key, value.clone());
    let child = observe(&value);
    if let Some(meta) = observer.fields.lock().get_mut(key) {
        meta.child = child;
    }
    field_dep.notify();
}

/// Remove a slot from a container.
///
/// List indices reuse splice interception. Field removal on protected
/// roots is refused with a warning; removing a missing field is a no-op;
/// otherwise the field (and its tracking state) is dropped and the
/// container dep notifies.
pub fn del(target: &Value, key: impl Into<Key>) {
    match (target, key.into()) {
        (Value::List(list), Key::Index(index)) => {
            list.splice(index, 1, Vec::new());
        }
        (Value::Object(object), Key::Field(name)) => del_field(object, &name),
        (Value::Object(_), Key::Index(_)) | (Value::List(_), Key::Field(_)) => {
            runtime::warn(&format!(
                "cannot delete that key kind from a {} value",
                target.type_name()
            ));
        }
        _ => {
            runtime::warn(&format!(
                "cannot delete a reactive key from a {} value",
                target.type_name()
            ));
        }
    }
}

fn del_field(object: &Object, key: &str) {
    let observer = object.observer();
    if let Some(observer) = &observer {
        if observer.root_count() > 0 {
            runtime::warn(&format!(
                "avoid deleting field {key:?} from a protected root; set it to null instead"
            ));
            return;
        }
    }
    if !object.contains_key(key) {
        return;
    }
    object.remove_untracked(key);
    if let Some(observer) = observer {
        observer.fields.lock().shift_remove(key);
        observer.dep.notify();
    }
}
