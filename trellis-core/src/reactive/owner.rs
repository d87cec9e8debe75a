//! Owning Units
//!
//! An `Owner` stands for the unit a watcher belongs to, typically a
//! component instance managed by the host framework. The reactive core only
//! needs a handful of facts about it: which watchers it holds, which one is
//! its primary (render) computation, and whether it is mounted, destroyed,
//! or parked in an inactive subtree. Lifecycle hooks are dispatched to the
//! host by name through [`crate::config::Config::hook_dispatcher`].

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::id::{OwnerId, WatcherId};
use super::watcher::{Callback, Watcher, WatcherOptions};
use crate::config;
use crate::error::{BoxError, ReactiveError, Result};
use crate::observer::{observe_root, Object, Value};

/// Lifecycle hooks the core asks the host to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// The primary computation is about to re-run.
    BeforeUpdate,
    /// The primary computation re-ran during the last flush.
    Updated,
    /// A retained subtree re-entered the active state.
    Activated,
}

impl Hook {
    pub fn name(&self) -> &'static str {
        match self {
            Hook::BeforeUpdate => "beforeUpdate",
            Hook::Updated => "updated",
            Hook::Activated => "activated",
        }
    }
}

/// Options for [`Owner::watch`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    pub deep: bool,
    pub sync: bool,
    /// Invoke the callback once with the initial value.
    pub immediate: bool,
}

#[derive(Default)]
struct OwnerState {
    watchers: Vec<Watcher>,
    render_watcher: Option<WatcherId>,
    mounted: bool,
    destroyed: bool,
    being_destroyed: bool,
    inactive: bool,
}

struct OwnerInner {
    id: OwnerId,
    name: String,
    data: Option<Object>,
    state: Mutex<OwnerState>,
}

/// Handle to an owning unit. Clones refer to the same unit.
///
/// The owner keeps its watchers alive; watchers refer back to it weakly.
/// Dropping the last handle without [`Owner::destroy`] frees watchers
/// nobody else holds, and tears down the rest at their next evaluation.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

#[derive(Clone)]
pub(crate) struct WeakOwner(Weak<OwnerInner>);

impl WeakOwner {
    pub(crate) fn upgrade(&self) -> Option<Owner> {
        self.0.upgrade().map(|inner| Owner { inner })
    }
}

impl Owner {
    /// An owner without root data.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// An owner whose root data is `data`. The data is observed and
    /// registered as a root, which forbids adding or deleting keys on it
    /// through [`crate::observer::set`] and [`crate::observer::delete`].
    pub fn with_data(name: impl Into<String>, data: Object) -> Self {
        observe_root(&Value::Object(data.clone()));
        Self::build(name.into(), Some(data))
    }

    fn build(name: String, data: Option<Object>) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OwnerId::next(),
                name,
                data,
                state: Mutex::new(OwnerState::default()),
            }),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn data(&self) -> Option<Object> {
        self.inner.data.clone()
    }

    /// Watch a function of reactive state as application code.
    pub fn watch<F, C>(&self, evaluator: F, callback: C, options: WatchOptions) -> Result<Watcher>
    where
        F: Fn(&Owner) -> Result<Value, BoxError> + Send + Sync + 'static,
        C: Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let watcher = Watcher::new(self, evaluator, Some(callback.clone()), user_options(options))?;
        self.fire_immediate(&watcher, &callback, options);
        Ok(watcher)
    }

    /// Watch a dot-delimited path into this owner's data.
    pub fn watch_path<C>(&self, path: &str, callback: C, options: WatchOptions) -> Result<Watcher>
    where
        C: Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        let watcher = Watcher::with_path(self, path, Some(callback.clone()), user_options(options))?;
        self.fire_immediate(&watcher, &callback, options);
        Ok(watcher)
    }

    fn fire_immediate(&self, watcher: &Watcher, callback: &Callback, options: WatchOptions) {
        if !options.immediate {
            return;
        }
        if let Err(source) = callback(&watcher.value(), &Value::Null) {
            let err = ReactiveError::Callback {
                expression: watcher.expression().to_string(),
                source,
            };
            config::report_error(&err, Some(self), "immediate watcher callback");
        }
    }

    pub fn render_watcher(&self) -> Option<Watcher> {
        let state = self.inner.state.lock();
        let id = state.render_watcher?;
        state.watchers.iter().find(|w| w.id() == id).cloned()
    }

    pub(crate) fn is_render_watcher(&self, watcher: &Watcher) -> bool {
        self.inner.state.lock().render_watcher == Some(watcher.id())
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.state.lock().watchers.len()
    }

    pub fn set_mounted(&self, mounted: bool) {
        self.inner.state.lock().mounted = mounted;
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.state.lock().mounted
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.inner.state.lock().being_destroyed
    }

    pub fn set_inactive(&self, inactive: bool) {
        self.inner.state.lock().inactive = inactive;
    }

    pub fn is_inactive(&self) -> bool {
        self.inner.state.lock().inactive
    }

    /// Tear down every watcher and mark the unit destroyed. Idempotent.
    pub fn destroy(&self) {
        let watchers = {
            let mut state = self.inner.state.lock();
            if state.destroyed || state.being_destroyed {
                return;
            }
            state.being_destroyed = true;
            mem::take(&mut state.watchers)
        };

        for watcher in &watchers {
            watcher.teardown();
        }
        if let Some(observer) = self.inner.data.as_ref().and_then(Object::observer) {
            observer.release_root();
        }

        let mut state = self.inner.state.lock();
        state.destroyed = true;
        state.mounted = false;
        tracing::debug!(owner = %self.inner.name, "owner destroyed");
    }

    pub(crate) fn downgrade(&self) -> WeakOwner {
        WeakOwner(Arc::downgrade(&self.inner))
    }

    pub(crate) fn push_watcher(&self, watcher: Watcher) {
        self.inner.state.lock().watchers.push(watcher);
    }

    pub(crate) fn remove_watcher(&self, id: WatcherId) {
        self.inner.state.lock().watchers.retain(|w| w.id() != id);
    }

    pub(crate) fn set_render_watcher(&self, id: WatcherId) {
        self.inner.state.lock().render_watcher = Some(id);
    }

    pub fn ptr_eq(&self, other: &Owner) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

fn user_options(options: WatchOptions) -> WatcherOptions {
    WatcherOptions {
        deep: options.deep,
        sync: options.sync,
        user: true,
        ..Default::default()
    }
}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("watchers", &state.watchers.len())
            .field("mounted", &state.mounted)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
