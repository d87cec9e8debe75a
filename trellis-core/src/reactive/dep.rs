//! Dependency Node
//!
//! A `Dep` is a publish point for one piece of observable state: one per
//! reactive property, plus one per observed container for shape changes.
//!
//! # Subscribers
//!
//! Subscribers are watchers, held weakly: a node never keeps a watcher
//! alive. The set is ordered by insertion and keyed by watcher id, so
//! adding the same watcher twice is a no-op.
//!
//! # Registration
//!
//! [`Dep::depend`] does not subscribe directly. It hands itself to the
//! current target, which decides whether it still needs to subscribe. That
//! indirection is what lets a watcher dedup reads within one evaluation and
//! across consecutive evaluations.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::id::{DepId, WatcherId};
use super::watcher::{WeakWatcher, Watcher};
use crate::config;

struct DepInner {
    id: DepId,
    subscribers: Mutex<IndexMap<WatcherId, WeakWatcher>>,
}

/// A publish/subscribe point for one piece of observable state.
#[derive(Clone)]
pub struct Dep {
    inner: Arc<DepInner>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DepInner {
                id: DepId::next(),
                subscribers: Mutex::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    pub fn add_subscriber(&self, watcher: &Watcher) {
        self.inner
            .subscribers
            .lock()
            .entry(watcher.id())
            .or_insert_with(|| watcher.downgrade());
    }

    pub fn remove_subscriber(&self, watcher: &Watcher) {
        self.inner.subscribers.lock().shift_remove(&watcher.id());
    }

    /// Register this node with the currently evaluating watcher, if any.
    pub fn depend(&self) {
        if let Some(target) = ReactiveContext::current_target() {
            target.add_dep(self);
        }
    }

    /// Deliver a change to every subscriber.
    ///
    /// Delivery iterates a snapshot: subscribers added or removed by a
    /// handler during delivery do not affect this round.
    pub fn notify(&self) {
        let mut subscribers: Vec<Watcher> = {
            let mut subscribers = self.inner.subscribers.lock();
            subscribers.retain(|_, weak| weak.is_alive());
            subscribers.values().filter_map(WeakWatcher::upgrade).collect()
        };

        if !config::async_flush() {
            // The scheduler sorts when flushing asynchronously; in
            // synchronous mode nothing else re-orders delivery.
            subscribers.sort_by_key(Watcher::id);
        }

        tracing::trace!(dep = self.id().raw(), count = subscribers.len(), "notify");
        for watcher in subscribers {
            watcher.update();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .values()
            .filter(|weak| weak.is_alive())
            .count()
    }

    pub fn has_subscriber(&self, watcher: &Watcher) -> bool {
        self.inner.subscribers.lock().contains_key(&watcher.id())
    }

    pub fn ptr_eq(&self, other: &Dep) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Value;
    use crate::reactive::{Owner, WatcherOptions};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sync_watcher(owner: &Owner, dep: &Dep, runs: Arc<AtomicUsize>) -> Watcher {
        let dep = dep.clone();
        Watcher::new(
            owner,
            move |_: &Owner| {
                dep.depend();
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            },
            None,
            WatcherOptions { sync: true, ..Default::default() },
        )
        .unwrap()
    }

    #[test]
    fn dep_ids_are_unique() {
        let d1 = Dep::new();
        let d2 = Dep::new();
        assert_ne!(d1.id(), d2.id());
        assert!(d1.id() < d2.id());
    }

    #[test]
    fn depend_without_target_is_noop() {
        let dep = Dep::new();
        dep.depend();
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn subscriber_set_is_idempotent() {
        let owner = Owner::new("dep");
        let dep = Dep::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let watcher = sync_watcher(&owner, &dep, runs);

        assert_eq!(dep.subscriber_count(), 1);
        dep.add_subscriber(&watcher);
        dep.add_subscriber(&watcher);
        assert_eq!(dep.subscriber_count(), 1);

        dep.remove_subscriber(&watcher);
        dep.remove_subscriber(&watcher);
        assert_eq!(dep.subscriber_count(), 0);
    }

    #[test]
    fn notify_reaches_subscribers() {
        let owner = Owner::new("dep");
        let dep = Dep::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let _watcher = sync_watcher(&owner, &dep, runs.clone());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        dep.notify();
        dep.notify();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn destroyed_owner_unsubscribes() {
        let dep = Dep::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let owner = Owner::new("short-lived");
        let watcher = sync_watcher(&owner, &dep, runs.clone());
        assert!(dep.has_subscriber(&watcher));

        owner.destroy();
        assert!(!dep.has_subscriber(&watcher));

        dep.notify();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
