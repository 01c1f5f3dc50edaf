//! List interception
//!
//! Index assignment on a plain vector cannot be observed, so all mutation
//! of tracked lists flows through this explicit method set: `push`, `pop`,
//! `shift`, `unshift`, `splice`, `sort_by`, `reverse`, and index `set`.
//! Each one performs the underlying edit, wraps any inserted values, and
//! fires the list's container-level dep exactly once. In-place reorderings
//! (`sort_by`, `reverse`) notify without inserting anything.
//!
//! On a list that was never wrapped the same methods degrade to plain
//! edits with no tracking side effects.
//!
//! Reads (`get`, `len`, `is_empty`, `snapshot`) register the active
//! watcher with the container-level dep, so any structural mutation
//! re-runs it. The container lock is always released before wrapping or
//! notification happens.

use crate::value::{List, Value};

use super::dep;
use super::observer::{depend_list, observe};

impl List {
    /// Tracked element read. Out-of-range indices read as `Null`.
    pub fn get(&self, index: usize) -> Value {
        self.depend_structure();
        let value = self.get_untracked(index).unwrap_or(Value::Null);
        if dep::has_target() {
            if let Some(observer) = value.observer() {
                observer.dep().depend();
            }
            if let Value::List(inner) = &value {
                depend_list(inner);
            }
        }
        value
    }

    /// Tracked length.
    pub fn len(&self) -> usize {
        self.depend_structure();
        self.len_untracked()
    }

    /// Tracked emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracked copy of the current elements.
    pub fn snapshot(&self) -> Vec<Value> {
        self.depend_structure();
        let items = self.items_untracked();
        if dep::has_target() {
            depend_list(self);
        }
        items
    }

    /// Append one element.
    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.with_items_mut(|items| items.push(value.clone()));
        self.after_mutation(std::slice::from_ref(&value));
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        let removed = self.with_items_mut(|items| items.pop());
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        let removed = self.with_items_mut(|items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        });
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Insert one element at the front.
    pub fn unshift(&self, value: impl Into<Value>) {
        let value = value.into();
        self.with_items_mut(|items| items.insert(0, value.clone()));
        self.after_mutation(std::slice::from_ref(&value));
    }

    /// Remove `delete_count` elements starting at `start`, inserting
    /// `inserted` in their place. Returns the removed elements. Ranges are
    /// clamped to the current length.
    pub fn splice(&self, start: usize, delete_count: usize, inserted: Vec<Value>) -> Vec<Value> {
        let removed = self.with_items_mut(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            items.splice(start..end, inserted.iter().cloned()).collect()
        });
        self.after_mutation(&inserted);
        removed
    }

    /// Replace the element at `index`, growing the list with `Null`
    /// padding when the index is past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        if index >= self.len_untracked() {
            // Pad silently; the splice below carries the notification.
            self.with_items_mut(|items| {
                if items.len() < index {
                    items.resize(index, Value::Null);
                }
            });
        }
        self.splice(index, 1, vec![value]);
    }

    /// Sort in place by a comparator and notify.
    pub fn sort_by(&self, compare: impl FnMut(&Value, &Value) -> std::cmp::Ordering) {
        self.with_items_mut(|items| items.sort_by(compare));
        self.after_mutation(&[]);
    }

    /// Reverse in place and notify.
    pub fn reverse(&self) {
        self.with_items_mut(|items| items.reverse());
        self.after_mutation(&[]);
    }

    fn depend_structure(&self) {
        if dep::has_target() {
            if let Some(observer) = self.observer() {
                observer.dep().depend();
            }
        }
    }

    /// Wrap inserted values and fire the structural dep. Skipped entirely
    /// on untracked lists.
    fn after_mutation(&self, inserted: &[Value]) {
        if let Some(observer) = self.observer() {
            for value in inserted {
                observe(value);
            }
            observer.dep().notify();
        }
    }
}
