//! Reactive add and delete.
//!
//! Plain [`Object::set`] on an unknown key stores a non-reactive value and
//! tells nobody. [`set`] instead installs a reactive property and notifies
//! the container node, so watchers that enumerate the object learn about
//! the new key even though nobody reads it yet. [`delete`] is the inverse.

use std::fmt;

use super::{Array, Object, Value};
use crate::config;
use crate::error::Diagnostic;

/// Property key accepted by [`set`] and [`delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl Key {
    /// Array index this key denotes, if any. Names that spell a
    /// non-negative integer count as indices.
    fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(name) => name.parse().ok(),
        }
    }

    fn into_name(self) -> String {
        match self {
            Key::Index(index) => index.to_string(),
            Key::Name(name) => name,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(index) => write!(f, "{index}"),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

/// Set a property on a container, adding it reactively if it is new.
/// Returns the value that was set.
///
/// - Arrays take index keys up to [`Array::MAX_INDEX`]; the write goes
///   through [`Array::splice`] so the container node fires.
/// - Existing keys are assigned directly.
/// - New keys on an observed object become reactive properties and the
///   container node fires.
/// - New keys on an unobserved object are stored as plain data.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) -> Value {
    let key = key.into();
    let value = value.into();

    match target {
        Value::Array(array) => {
            match key.as_index() {
                Some(index) => {
                    if index <= Array::MAX_INDEX && array.pad_to(index) {
                        array.splice(index, 1, vec![value.clone()]);
                    } else {
                        config::warn(&Diagnostic::ArrayIndexTooLarge(index), None);
                    }
                }
                None => config::warn(&Diagnostic::NonIndexArrayKey(key.to_string()), None),
            }
            value
        }
        Value::Object(object) => {
            set_on_object(object, key.into_name(), value.clone());
            value
        }
        _ => {
            config::warn(&Diagnostic::SetOnPrimitive(target.to_string()), None);
            value
        }
    }
}

fn set_on_object(object: &Object, key: String, value: Value) {
    if object.contains_key(&key) {
        object.set(key, value);
        return;
    }

    let observer = object.observer();
    if object.is_managed() || observer.as_ref().is_some_and(|o| o.root_count() > 0) {
        config::warn(&Diagnostic::AddToRoot, None);
        return;
    }

    match observer {
        None => object.set(key, value),
        Some(observer) => {
            object.define_reactive(&key, Some(value), false);
            observer.dep().notify();
        }
    }
}

/// Delete a property from a container, notifying the container node.
///
/// Deleting a key that does not exist on an object does nothing.
pub fn delete(target: &Value, key: impl Into<Key>) {
    let key = key.into();

    match target {
        Value::Array(array) => match key.as_index() {
            Some(index) => {
                array.splice(index, 1, Vec::new());
            }
            None => config::warn(&Diagnostic::NonIndexArrayKey(key.to_string()), None),
        },
        Value::Object(object) => {
            let observer = object.observer();
            if object.is_managed() || observer.as_ref().is_some_and(|o| o.root_count() > 0) {
                config::warn(&Diagnostic::DeleteFromRoot, None);
                return;
            }
            let key = key.into_name();
            if !object.contains_key(&key) {
                return;
            }
            object.remove(&key);
            if let Some(observer) = observer {
                observer.dep().notify();
            }
        }
        _ => config::warn(&Diagnostic::DeleteOnPrimitive(target.to_string()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::observer::{observe, observe_root, Array};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn capture_warnings() -> Arc<Mutex<Vec<Diagnostic>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        config::set(Config::default().with_warn_handler(move |d, _| sink.lock().push(d.clone())));
        seen
    }

    #[test]
    fn new_key_on_observed_object_is_reactive() {
        let object = Object::new();
        let target = Value::Object(object.clone());
        observe(&target);

        set(&target, "added", 1);
        assert!(object.is_reactive("added"));
        assert_eq!(object.get("added"), Value::from(1));
    }

    #[test]
    fn new_key_on_plain_object_stays_plain() {
        let object = Object::new();
        set(&Value::Object(object.clone()), "added", 1);
        assert!(!object.is_reactive("added"));
        assert_eq!(object.get("added"), Value::from(1));
    }

    #[test]
    fn array_index_set_extends() {
        let array: Array = [1].into_iter().collect();
        let target = Value::Array(array.clone());

        set(&target, 3_usize, "d");
        assert_eq!(
            array.to_vec(),
            vec![Value::from(1), Value::Null, Value::Null, Value::from("d")]
        );

        set(&target, "0", 9);
        assert_eq!(array.get(0), Some(Value::from(9)));

        delete(&target, 1_usize);
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn oversized_array_index_is_refused() {
        let seen = capture_warnings();
        let array: Array = [1].into_iter().collect();
        let target = Value::Array(array.clone());
        observe(&target);

        let huge = usize::MAX / 2;
        set(&target, huge, 1);
        set(&target, Array::MAX_INDEX + 1, 1);

        assert_eq!(array.to_vec(), vec![Value::from(1)]);
        assert_eq!(
            *seen.lock(),
            vec![
                Diagnostic::ArrayIndexTooLarge(huge),
                Diagnostic::ArrayIndexTooLarge(Array::MAX_INDEX + 1),
            ]
        );
        config::reset();
    }

    #[test]
    fn misuse_is_reported() {
        let seen = capture_warnings();

        set(&Value::from(1), "x", 2);
        delete(&Value::Null, "x");
        set(&Value::Array(Array::new()), "length", 2);

        let root = Value::Object(Object::new());
        observe_root(&root);
        set(&root, "late", 1);
        delete(&root, "late");

        assert_eq!(
            *seen.lock(),
            vec![
                Diagnostic::SetOnPrimitive("1".into()),
                Diagnostic::DeleteOnPrimitive("null".into()),
                Diagnostic::NonIndexArrayKey("length".into()),
                Diagnostic::AddToRoot,
                Diagnostic::DeleteFromRoot,
            ]
        );
        config::reset();
    }

    #[test]
    fn delete_of_missing_key_is_silent() {
        let seen = capture_warnings();
        let object = Object::new();
        delete(&Value::Object(object), "nope");
        assert!(seen.lock().is_empty());
        config::reset();
    }
}
