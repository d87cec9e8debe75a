//! Observation
//!
//! Converts plain values into observable graphs.
//!
//! # Observers
//!
//! An [`Observer`] is attached to a container the first time it is
//! observed and reused afterwards. It owns the container-level dependency
//! node that fires on shape changes: keys added or removed through
//! [`set`]/[`delete`], and every [`Array`] mutator call.
//!
//! # Reactive properties
//!
//! Observing an object instruments each of its enumerable, configurable
//! properties with a dependency node of its own. [`Object::get`] is the
//! tracked read and [`Object::set`] the notifying write. Values held by
//! instrumented properties are observed recursively unless the property
//! is shallow.

mod array;
mod dynamic;
mod object;
mod value;

pub use array::Array;
pub use dynamic::{delete, set, Key};
pub use object::{Object, PropertyFlags, PropertyGetter, PropertySetter};
pub use value::Value;

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::config;
use crate::reactive::Dep;

use array::ArrayInner;
use object::ObjectInner;

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Enable or disable creation of new observers on this thread. Values that
/// are already observed stay observed.
pub fn toggle_observing(enabled: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(enabled));
}

pub fn is_observing() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

enum WeakContainer {
    Object(Weak<ObjectInner>),
    Array(Weak<ArrayInner>),
}

/// Observation state attached to a container.
pub struct Observer {
    dep: Dep,
    value: WeakContainer,
    root_count: AtomicUsize,
}

impl Observer {
    fn new(value: WeakContainer) -> Self {
        Self {
            dep: Dep::new(),
            value,
            root_count: AtomicUsize::new(0),
        }
    }

    /// Container-level dependency node.
    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    /// The observed container, while it is still alive.
    pub fn value(&self) -> Option<Value> {
        match &self.value {
            WeakContainer::Object(weak) => weak.upgrade().map(|inner| Value::Object(Object::from_inner(inner))),
            WeakContainer::Array(weak) => weak.upgrade().map(|inner| Value::Array(Array::from_inner(inner))),
        }
    }

    /// Number of owners using this container as their root data.
    pub fn root_count(&self) -> usize {
        self.root_count.load(Ordering::Relaxed)
    }

    fn retain_root(&self) {
        self.root_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn release_root(&self) {
        // Saturating: releasing an unregistered root is a no-op.
        let _ = self
            .root_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep.id())
            .field("root_count", &self.root_count())
            .finish()
    }
}

/// Observe a value, returning its observer.
///
/// Returns the existing observer if the container already has one.
/// Otherwise a new observer is created for extensible, unmanaged
/// containers while observation is enabled. Primitives are never observed.
pub fn observe(value: &Value) -> Option<Arc<Observer>> {
    match value {
        Value::Object(object) => {
            if let Some(existing) = object.observer() {
                return Some(existing);
            }
            if !can_observe(object.is_extensible()) || object.is_managed() {
                return None;
            }
            let observer = object.attach_observer(Arc::new(Observer::new(WeakContainer::Object(
                object.downgrade(),
            ))));
            for key in object.keys() {
                object.define_reactive(&key, None, false);
            }
            tracing::trace!(dep = observer.dep().id().raw(), "observed object");
            Some(observer)
        }
        Value::Array(array) => {
            if let Some(existing) = array.observer() {
                return Some(existing);
            }
            if !can_observe(array.is_extensible()) {
                return None;
            }
            let observer = array.attach_observer(Arc::new(Observer::new(WeakContainer::Array(
                array.downgrade(),
            ))));
            for item in array.to_vec() {
                observe(&item);
            }
            tracing::trace!(dep = observer.dep().id().raw(), "observed array");
            Some(observer)
        }
        _ => None,
    }
}

fn can_observe(extensible: bool) -> bool {
    extensible && is_observing() && !config::server_rendering()
}

/// Observe `value` as the root data of an owner.
pub fn observe_root(value: &Value) -> Option<Arc<Observer>> {
    let observer = observe(value)?;
    observer.retain_root();
    Some(observer)
}

/// Install a reactive property on `object`, replacing any plain value held
/// under `key`. A shallow property does not observe the value it holds.
pub fn define_reactive(object: &Object, key: &str, value: impl Into<Value>, shallow: bool) {
    object.define_reactive(key, Some(value.into()), shallow);
}

/// Make the current target depend on the container node of every element,
/// recursing through nested arrays.
pub(crate) fn depend_array(array: &Array) {
    fn walk(array: &Array, seen: &mut HashSet<usize>) {
        if !seen.insert(array.address()) {
            return;
        }
        for item in array.to_vec() {
            if let Some(observer) = item.observer() {
                observer.dep().depend();
            }
            if let Value::Array(nested) = &item {
                walk(nested, seen);
            }
        }
    }
    walk(array, &mut HashSet::new());
}
