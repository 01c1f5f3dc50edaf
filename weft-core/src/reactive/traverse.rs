//! Deep dependency collection
//!
//! A deep watcher must re-run when anything inside its value changes, not
//! just the top-level slots its getter touched. `traverse` walks the whole
//! value through tracked reads while the watcher is still the active
//! target, registering it with every dep along the way.

use std::collections::HashSet;

use crate::value::Value;

use super::dep::DepId;

/// Recursively visit every slot of `value` through tracked reads.
///
/// Wrapped containers already seen (by their structural dep id) are
/// skipped, so cyclic structures terminate. Opaque containers are not
/// entered.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<DepId>) {
    match value {
        Value::Object(object) => {
            if object.is_opaque() {
                return;
            }
            if let Some(observer) = object.observer() {
                if !seen.insert(observer.dep().id()) {
                    return;
                }
            }
            for key in object.keys_untracked() {
                walk(&object.get(&key), seen);
            }
        }
        Value::List(list) => {
            if list.is_opaque() {
                return;
            }
            if let Some(observer) = list.observer() {
                if !seen.insert(observer.dep().id()) {
                    return;
                }
            }
            for index in 0..list.len_untracked() {
                walk(&list.get(index), seen);
            }
        }
        _ => {}
    }
}
