//! Deep traversal for `deep` watchers.
//!
//! Reading every nested property while a watcher is the current target
//! subscribes it to the whole structure. Containers are visited once per
//! traversal, so cyclic graphs terminate.

use std::collections::HashSet;

use crate::observer::Value;

pub(crate) fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    walk(value, &mut seen);
}

fn walk(value: &Value, seen: &mut HashSet<usize>) {
    let Some(address) = value.container_address() else {
        return;
    };
    if !seen.insert(address) {
        return;
    }

    match value {
        Value::Object(object) => {
            for key in object.keys() {
                walk(&object.get(&key), seen);
            }
        }
        Value::Array(array) => {
            for item in array.to_vec() {
                walk(&item, seen);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{observe, Object};
    use crate::reactive::{Owner, Watcher, WatcherOptions};

    #[test]
    fn traversal_subscribes_to_nested_properties() {
        let leaf: Object = [("c", Value::from(1))].into_iter().collect();
        let middle: Object = [("b", Value::Object(leaf))].into_iter().collect();
        let root: Object = [("a", Value::Object(middle))].into_iter().collect();
        observe(&Value::Object(root.clone()));

        let owner = Owner::new("traverse");
        let read = root.clone();
        let shallow = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("a")),
            None,
            WatcherOptions { lazy: true, ..Default::default() },
        )
        .unwrap();
        shallow.recompute().unwrap();

        let read = root.clone();
        let deep = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("a")),
            None,
            WatcherOptions { lazy: true, deep: true, ..Default::default() },
        )
        .unwrap();
        deep.recompute().unwrap();

        // a, a's container, b, b's container, c
        assert_eq!(shallow.dependency_count(), 2);
        assert_eq!(deep.dependency_count(), 5);
    }

    #[test]
    fn cycles_terminate() {
        let object = Object::new();
        object.set("me", Value::Object(object.clone()));
        observe(&Value::Object(object.clone()));

        traverse(&Value::Object(object));
    }
}
