//! Object containers.
//!
//! An `Object` is an ordered map of own properties. A property is either a
//! data slot or an accessor pair, and carries `enumerable`/`configurable`
//! flags. Once the object is observed, each enumerable configurable
//! property is instrumented with its own dependency node: reads through
//! [`Object::get`] register with the current target and assignments
//! through [`Object::set`] notify.
//!
//! Keys added with plain [`Object::set`] after observation are not
//! reactive; use [`crate::observer::set`] for that.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::{depend_array, observe, Observer, Value};
use crate::reactive::{untracked, Dep, ReactiveContext};

/// Getter half of an accessor property.
pub type PropertyGetter = Arc<dyn Fn() -> Value + Send + Sync>;

/// Setter half of an accessor property.
pub type PropertySetter = Arc<dyn Fn(Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyFlags {
    /// Listed by [`Object::keys`] and instrumented on observation.
    pub enumerable: bool,
    /// May be redefined or removed. Non-configurable properties are never
    /// instrumented.
    pub configurable: bool,
}

impl Default for PropertyFlags {
    fn default() -> Self {
        Self {
            enumerable: true,
            configurable: true,
        }
    }
}

#[derive(Clone)]
enum Slot {
    Data(Value),
    Accessor {
        get: PropertyGetter,
        set: Option<PropertySetter>,
    },
}

/// Per-property bookkeeping installed by observation.
struct Instrumentation {
    dep: Dep,
    /// Observer of the held value, whose shape changes readers also track.
    child: Option<Arc<Observer>>,
    shallow: bool,
}

struct Property {
    slot: Slot,
    reactive: Option<Instrumentation>,
    flags: PropertyFlags,
}

impl Property {
    fn data(value: Value) -> Self {
        Self {
            slot: Slot::Data(value),
            reactive: None,
            flags: PropertyFlags::default(),
        }
    }
}

struct ObjectState {
    props: IndexMap<String, Property>,
    observer: Option<Arc<Observer>>,
    extensible: bool,
    managed: bool,
}

pub(crate) struct ObjectInner {
    state: Mutex<ObjectState>,
}

/// Shared handle to an object container.
#[derive(Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

/// What a read has to do once the lock is released.
enum Read {
    Value(Value),
    Getter(PropertyGetter),
}

impl Read {
    fn resolve(self) -> Value {
        match self {
            Read::Value(value) => value,
            Read::Getter(get) => get(),
        }
    }
}

impl Object {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                state: Mutex::new(ObjectState {
                    props: IndexMap::new(),
                    observer: None,
                    extensible: true,
                    managed: false,
                }),
            }),
        }
    }

    /// Read a property, registering the read with the current target.
    ///
    /// Missing keys read as `Null`.
    pub fn get(&self, key: &str) -> Value {
        let Some((read, tracking)) = self.snapshot(key) else {
            return Value::Null;
        };
        let value = read.resolve();

        if let Some((dep, child)) = tracking {
            if ReactiveContext::has_target() {
                dep.depend();
                if let Some(child) = child {
                    child.dep().depend();
                    if let Value::Array(array) = &value {
                        depend_array(array);
                    }
                }
            }
        }
        value
    }

    /// Read a property without registering a dependency.
    pub fn get_untracked(&self, key: &str) -> Value {
        match self.snapshot(key) {
            Some((read, _)) => untracked(|| read.resolve()),
            None => Value::Null,
        }
    }

    #[allow(clippy::type_complexity)]
    fn snapshot(&self, key: &str) -> Option<(Read, Option<(Dep, Option<Arc<Observer>>)>)> {
        let state = self.inner.state.lock();
        let property = state.props.get(key)?;
        let read = match &property.slot {
            Slot::Data(value) => Read::Value(value.clone()),
            Slot::Accessor { get, .. } => Read::Getter(get.clone()),
        };
        let tracking = property
            .reactive
            .as_ref()
            .map(|r| (r.dep.clone(), r.child.clone()));
        Some((read, tracking))
    }

    /// Assign a property.
    ///
    /// Instrumented properties notify their readers unless the new value is
    /// the same as the old one. Unknown keys are added as plain,
    /// non-reactive data; a non-extensible object ignores them.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();

        enum Plan {
            Setter(Option<PropertySetter>),
            Reactive { dep: Dep, shallow: bool, slot: Slot },
        }

        let plan = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if !state.props.contains_key(&key) {
                if state.extensible {
                    state.props.insert(key, Property::data(value));
                }
                return;
            }
            let Some(property) = state.props.get_mut(&key) else {
                return;
            };
            match (&mut property.slot, &property.reactive) {
                (Slot::Data(held), None) => {
                    *held = value;
                    return;
                }
                (Slot::Accessor { set, .. }, None) => Plan::Setter(set.clone()),
                (slot, Some(meta)) => Plan::Reactive {
                    dep: meta.dep.clone(),
                    shallow: meta.shallow,
                    slot: slot.clone(),
                },
            }
        };

        match plan {
            Plan::Setter(Some(set)) => set(value),
            Plan::Setter(None) => {}
            Plan::Reactive { dep, shallow, slot } => {
                let (old, setter, read_only) = match slot {
                    Slot::Data(held) => (held, None, false),
                    Slot::Accessor { get, set } => {
                        let read_only = set.is_none();
                        (get(), set, read_only)
                    }
                };
                if value.is_same(&old) || read_only {
                    return;
                }

                match setter {
                    Some(set) => set(value.clone()),
                    None => self.store(&key, value.clone()),
                }
                let child = if shallow { None } else { observe(&value) };
                self.replace_child(&key, child);
                dep.notify();
            }
        }
    }

    fn store(&self, key: &str, value: Value) {
        if let Some(property) = self.inner.state.lock().props.get_mut(key) {
            property.slot = Slot::Data(value);
        }
    }

    fn replace_child(&self, key: &str, child: Option<Arc<Observer>>) {
        if let Some(meta) = self
            .inner
            .state
            .lock()
            .props
            .get_mut(key)
            .and_then(|p| p.reactive.as_mut())
        {
            meta.child = child;
        }
    }

    /// Remove an own property without notifying anyone. Non-configurable
    /// properties stay put. Returns the removed data value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.state.lock();
        let configurable = state.props.get(key)?.flags.configurable;
        if !configurable {
            return None;
        }
        match state.props.shift_remove(key)?.slot {
            Slot::Data(value) => Some(value),
            Slot::Accessor { .. } => Some(Value::Null),
        }
    }

    /// Install an accessor pair. A later observation wraps it rather than
    /// replacing it. Returns false if an existing property is not
    /// configurable or the key is new on a non-extensible object.
    pub fn define_accessor(
        &self,
        key: impl Into<String>,
        get: PropertyGetter,
        set: Option<PropertySetter>,
    ) -> bool {
        self.define(key.into(), Slot::Accessor { get, set }, PropertyFlags::default())
    }

    /// Install a data property with explicit flags.
    pub fn define_property(
        &self,
        key: impl Into<String>,
        value: impl Into<Value>,
        flags: PropertyFlags,
    ) -> bool {
        self.define(key.into(), Slot::Data(value.into()), flags)
    }

    fn define(&self, key: String, slot: Slot, flags: PropertyFlags) -> bool {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        match state.props.get_mut(&key) {
            Some(property) if !property.flags.configurable => false,
            Some(property) => {
                *property = Property { slot, reactive: None, flags };
                true
            }
            None if !state.extensible => false,
            None => {
                state.props.insert(key, Property { slot, reactive: None, flags });
                true
            }
        }
    }

    /// Instrument `key` with its own dependency node.
    ///
    /// `value` replaces the held data when given; otherwise the current
    /// value is kept. Accessor pairs are wrapped. Non-configurable
    /// properties are left alone.
    pub(crate) fn define_reactive(&self, key: &str, value: Option<Value>, shallow: bool) {
        let existing = {
            let state = self.inner.state.lock();
            match state.props.get(key) {
                Some(property) if !property.flags.configurable => return,
                Some(property) => Some(property.slot.clone()),
                None if !state.extensible => return,
                None => None,
            }
        };

        let held = match (value, &existing) {
            (Some(value), _) => value,
            (None, Some(Slot::Data(value))) => value.clone(),
            (None, Some(Slot::Accessor { get, set: Some(_) })) => get(),
            _ => Value::Null,
        };
        let child = if shallow { None } else { observe(&held) };
        let meta = Instrumentation {
            dep: Dep::new(),
            child,
            shallow,
        };

        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        match state.props.get_mut(key) {
            Some(property) => {
                if let Slot::Data(slot) = &mut property.slot {
                    *slot = held;
                }
                property.reactive = Some(meta);
                property.flags = PropertyFlags::default();
            }
            None => {
                state.props.insert(
                    key.to_string(),
                    Property {
                        slot: Slot::Data(held),
                        reactive: Some(meta),
                        flags: PropertyFlags::default(),
                    },
                );
            }
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().props.contains_key(key)
    }

    /// Whether `key` has been instrumented by observation.
    pub fn is_reactive(&self, key: &str) -> bool {
        self.inner
            .state
            .lock()
            .props
            .get(key)
            .is_some_and(|p| p.reactive.is_some())
    }

    /// Enumerable own keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner
            .state
            .lock()
            .props
            .iter()
            .filter(|(_, p)| p.flags.enumerable)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn prevent_extensions(&self) {
        self.inner.state.lock().extensible = false;
    }

    pub fn is_extensible(&self) -> bool {
        self.inner.state.lock().extensible
    }

    /// Tag this object as a framework-managed instance. Managed objects are
    /// never observed and reject dynamic key changes.
    pub fn mark_managed(&self) {
        self.inner.state.lock().managed = true;
    }

    pub fn is_managed(&self) -> bool {
        self.inner.state.lock().managed
    }

    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.state.lock().observer.clone()
    }

    /// Attach `observer` unless one is already attached; returns whichever
    /// ends up attached.
    pub(crate) fn attach_observer(&self, observer: Arc<Observer>) -> Arc<Observer> {
        self.inner
            .state
            .lock()
            .observer
            .get_or_insert(observer)
            .clone()
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ObjectInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ObjectInner>) -> Self {
        Self { inner }
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut state = object.inner.state.lock();
            for (key, value) in iter {
                state.props.insert(key.into(), Property::data(value.into()));
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let keys: Vec<&String> = state.props.keys().collect();
        f.debug_struct("Object")
            .field("keys", &keys)
            .field("observed", &state.observer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn plain_object_behaves_like_a_map() {
        let object = Object::new();
        object.set("a", 1);
        object.set("b", "two");

        assert_eq!(object.get("a"), Value::from(1));
        assert_eq!(object.get("b"), Value::from("two"));
        assert_eq!(object.get("missing"), Value::Null);
        assert_eq!(object.keys(), vec!["a", "b"]);

        assert_eq!(object.remove("a"), Some(Value::from(1)));
        assert!(!object.contains_key("a"));
    }

    #[test]
    fn non_extensible_object_ignores_new_keys() {
        let object = Object::new();
        object.set("a", 1);
        object.prevent_extensions();
        object.set("b", 2);
        object.set("a", 3);

        assert!(!object.contains_key("b"));
        assert_eq!(object.get("a"), Value::from(3));
    }

    #[test]
    fn observation_wraps_existing_accessor() {
        let backing = Arc::new(Mutex::new(Value::from(1)));
        let sets = Arc::new(AtomicUsize::new(0));

        let object = Object::new();
        let read = backing.clone();
        let write = backing.clone();
        let counter = sets.clone();
        object.define_accessor(
            "x",
            Arc::new(move || read.lock().clone()),
            Some(Arc::new(move |value| {
                counter.fetch_add(1, Ordering::SeqCst);
                *write.lock() = value;
            })),
        );
        observe(&Value::Object(object.clone()));

        assert!(object.is_reactive("x"));
        assert_eq!(object.get("x"), Value::from(1));

        object.set("x", 1);
        assert_eq!(sets.load(Ordering::SeqCst), 0);

        object.set("x", 5);
        assert_eq!(sets.load(Ordering::SeqCst), 1);
        assert_eq!(*backing.lock(), Value::from(5));
        assert_eq!(object.get("x"), Value::from(5));
    }

    #[test]
    fn non_configurable_and_hidden_properties_stay_plain() {
        let object = Object::new();
        object.define_property(
            "fixed",
            1,
            PropertyFlags { enumerable: true, configurable: false },
        );
        object.define_property(
            "hidden",
            2,
            PropertyFlags { enumerable: false, configurable: true },
        );
        object.set("open", 3);
        observe(&Value::Object(object.clone()));

        assert!(!object.is_reactive("fixed"));
        assert!(!object.is_reactive("hidden"));
        assert!(object.is_reactive("open"));
        assert_eq!(object.keys(), vec!["fixed", "open"]);
        assert_eq!(object.remove("fixed"), None);
    }
}
