//! Array containers.
//!
//! Index reads and writes on an `Array` are not intercepted. Change
//! tracking for arrays happens at the container level: the mutators below
//! observe what they insert and notify the container's dependency node
//! once per call, provided the array is observed.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{observe, Observer, Value};

struct ArrayState {
    items: Vec<Value>,
    observer: Option<Arc<Observer>>,
    extensible: bool,
}

pub(crate) struct ArrayInner {
    state: Mutex<ArrayState>,
}

/// Shared handle to an array container.
#[derive(Clone)]
pub struct Array {
    inner: Arc<ArrayInner>,
}

impl Array {
    /// Largest index an array accepts. Arrays hold at most `u32::MAX` items.
    pub const MAX_INDEX: usize = u32::MAX as usize - 1;

    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            inner: Arc::new(ArrayInner {
                state: Mutex::new(ArrayState {
                    items,
                    observer: None,
                    extensible: true,
                }),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw index read. Not tracked.
    pub fn get(&self, index: usize) -> Option<Value> {
        self.inner.state.lock().items.get(index).cloned()
    }

    /// Snapshot of the items.
    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.state.lock().items.clone()
    }

    /// Raw index write, padding with `Null` past the end. Nobody is
    /// notified; use [`crate::observer::set`] for a reactive replacement.
    ///
    /// Returns `false` and leaves the array untouched when `index` is above
    /// [`Array::MAX_INDEX`] or the padding cannot be allocated.
    pub fn assign(&self, index: usize, value: impl Into<Value>) -> bool {
        if index > Self::MAX_INDEX {
            return false;
        }
        let mut state = self.inner.state.lock();
        if !grow(&mut state.items, index + 1) {
            return false;
        }
        state.items[index] = value.into();
        true
    }

    /// Grow to at least `len` items, padding with `Null`. Returns `false`
    /// when the storage cannot be allocated.
    pub(crate) fn pad_to(&self, len: usize) -> bool {
        grow(&mut self.inner.state.lock().items, len)
    }

    /// Run a mutation under the lock, then observe what it inserted and
    /// notify the container dependency outside of it.
    fn mutate<R>(&self, op: impl FnOnce(&mut Vec<Value>) -> (R, Vec<Value>)) -> R {
        let (result, inserted, observer) = {
            let mut state = self.inner.state.lock();
            let (result, inserted) = op(&mut state.items);
            (result, inserted, state.observer.clone())
        };

        if let Some(observer) = observer {
            for value in &inserted {
                observe(value);
            }
            observer.dep().notify();
        }
        result
    }

    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.mutate(|items| {
            items.push(value.clone());
            (items.len(), vec![value])
        })
    }

    /// Append several items as one mutation.
    pub fn extend<I>(&self, values: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.mutate(|items| {
            items.extend(values.iter().cloned());
            (items.len(), values)
        })
    }

    pub fn pop(&self) -> Option<Value> {
        self.mutate(|items| (items.pop(), Vec::new()))
    }

    pub fn shift(&self) -> Option<Value> {
        self.mutate(|items| {
            let first = if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            };
            (first, Vec::new())
        })
    }

    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.mutate(|items| {
            items.insert(0, value.clone());
            (items.len(), vec![value])
        })
    }

    /// Remove `delete_count` items at `start` and insert `insert` in their
    /// place. Both bounds are clamped. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, insert: Vec<Value>) -> Vec<Value> {
        self.mutate(|items| {
            let start = start.min(items.len());
            let end = start.saturating_add(delete_count).min(items.len());
            let removed: Vec<Value> = items.splice(start..end, insert.iter().cloned()).collect();
            (removed, insert)
        })
    }

    /// Sort with the default value ordering.
    pub fn sort(&self) {
        self.sort_by(Value::sort_cmp);
    }

    /// Sort with a caller comparator. The comparator runs without the lock
    /// held, so it may read the array.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let mut items = self.to_vec();
        items.sort_by(compare);
        self.mutate(|slot| {
            *slot = items;
            ((), Vec::new())
        })
    }

    pub fn reverse(&self) {
        self.mutate(|items| {
            items.reverse();
            ((), Vec::new())
        })
    }

    pub fn prevent_extensions(&self) {
        self.inner.state.lock().extensible = false;
    }

    pub fn is_extensible(&self) -> bool {
        self.inner.state.lock().extensible
    }

    pub fn observer(&self) -> Option<Arc<Observer>> {
        self.inner.state.lock().observer.clone()
    }

    pub(crate) fn attach_observer(&self, observer: Arc<Observer>) -> Arc<Observer> {
        self.inner
            .state
            .lock()
            .observer
            .get_or_insert(observer)
            .clone()
    }

    pub(crate) fn downgrade(&self) -> Weak<ArrayInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Arc<ArrayInner>) -> Self {
        Self { inner }
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

fn grow(items: &mut Vec<Value>, len: usize) -> bool {
    let missing = len.saturating_sub(items.len());
    if missing == 0 {
        return true;
    }
    if items.try_reserve(missing).is_err() {
        return false;
    }
    items.resize(len, Value::Null);
    true
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Array")
            .field("len", &state.items.len())
            .field("observed", &state.observer.is_some())
            .finish()
    }
}
