//! Watcher Implementation
//!
//! A Watcher is a tracked computation. It evaluates a function with itself
//! as the current target, subscribes to every dependency node read along
//! the way, and reacts when one of them notifies.
//!
//! # How Watchers Work
//!
//! 1. Evaluation pushes the watcher onto the reactive context, runs the
//!    evaluator, then pops it and reconciles dependencies: nodes read last
//!    time but not this time are unsubscribed.
//!
//! 2. A notified watcher either marks itself dirty (lazy), recomputes on
//!    the spot (sync), or enqueues itself with the scheduler (default).
//!
//! 3. Running recomputes the value and fires the callback when the value
//!    changed, is a container (it may have been mutated in place), or the
//!    watcher is deep.
//!
//! # States
//!
//! ```text
//! Active --notify--> Dirty (lazy) | Queued (async) | Recomputed (sync) --> Active
//! Active --teardown--> TornDown (terminal)
//! ```

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::context::ReactiveContext;
use super::dep::Dep;
use super::id::{DepId, WatcherId};
use super::owner::{Hook, Owner, WeakOwner};
use super::traverse::traverse;
use crate::config;
use crate::error::{BoxError, Diagnostic, ReactiveError, Result};
use crate::observer::Value;
use crate::scheduler;

/// Evaluator of a watcher: reads reactive state and produces a value.
pub type Evaluator = Arc<dyn Fn(&Owner) -> Result<Value, BoxError> + Send + Sync>;

/// Change callback, invoked with the new and the previous value.
pub type Callback = Arc<dyn Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync>;

/// Hook run by the scheduler right before a queued watcher runs.
pub type BeforeHook = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a watcher [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Value, &Value) -> Result<(), BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Construction options for a [`Watcher`].
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Read the whole result recursively so nested changes are observed.
    pub deep: bool,
    /// Defined by application code: evaluator errors are reported rather
    /// than returned.
    pub user: bool,
    /// Do not evaluate on construction or on notify; only mark dirty.
    pub lazy: bool,
    /// Recompute immediately on notify instead of queueing.
    pub sync: bool,
    /// Run by the scheduler before each queued run.
    pub before: Option<BeforeHook>,
}

impl fmt::Debug for WatcherOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherOptions")
            .field("deep", &self.deep)
            .field("user", &self.user)
            .field("lazy", &self.lazy)
            .field("sync", &self.sync)
            .field("before", &self.before.is_some())
            .finish()
    }
}

enum Getter {
    Function(Evaluator),
    Path(SmallVec<[String; 4]>),
    Noop,
}

impl Getter {
    fn call(&self, owner: &Owner) -> Result<Value, BoxError> {
        match self {
            Getter::Function(f) => f(owner),
            Getter::Path(segments) => Ok(resolve_path(owner, segments)),
            Getter::Noop => Ok(Value::Null),
        }
    }
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    deps: IndexMap<DepId, Dep>,
    new_deps: IndexMap<DepId, Dep>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    owner: WeakOwner,
    getter: Getter,
    callback: Option<Callback>,
    expression: String,
    deep: bool,
    user: bool,
    lazy: bool,
    sync: bool,
    before: Option<BeforeHook>,
    state: Mutex<WatcherState>,
}

/// A tracked computation that re-runs when the state it read changes.
///
/// `Watcher` is a cheap handle; clones refer to the same computation.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

/// Non-owning reference held by dependency nodes.
#[derive(Clone)]
pub(crate) struct WeakWatcher(Weak<WatcherInner>);

impl WeakWatcher {
    pub(crate) fn upgrade(&self) -> Option<Watcher> {
        self.0.upgrade().map(|inner| Watcher { inner })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Watcher {
    /// Create a watcher over an evaluator function.
    ///
    /// Unless `lazy` is set the evaluator runs once right away to collect
    /// the initial dependencies; a failure there is returned for non-user
    /// watchers.
    pub fn new<F>(
        owner: &Owner,
        evaluator: F,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self>
    where
        F: Fn(&Owner) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self::build(
            owner,
            Getter::Function(Arc::new(evaluator)),
            "function".to_string(),
            callback,
            options,
            false,
        )
    }

    /// Create a watcher over a dot-delimited path into the owner's data,
    /// e.g. `"user.address.city"`.
    pub fn with_path(
        owner: &Owner,
        path: &str,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Result<Self> {
        let getter = match parse_path(path) {
            Some(segments) => Getter::Path(segments),
            None => {
                config::warn(&Diagnostic::InvalidPath(path.to_string()), Some(owner));
                Getter::Noop
            }
        };
        Self::build(owner, getter, path.to_string(), callback, options, false)
    }

    /// Create the owner's primary computation.
    ///
    /// The evaluator is typically supplied by the renderer. Before each
    /// queued re-run the owner receives [`Hook::BeforeUpdate`] while it is
    /// mounted and not destroyed.
    pub fn render<F>(owner: &Owner, evaluator: F) -> Result<Self>
    where
        F: Fn(&Owner) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let hook_owner = owner.downgrade();
        let before: BeforeHook = Arc::new(move || {
            if let Some(owner) = hook_owner.upgrade() {
                if owner.is_mounted() && !owner.is_destroyed() {
                    config::dispatch_hook(&owner, Hook::BeforeUpdate);
                }
            }
        });
        Self::build(
            owner,
            Getter::Function(Arc::new(evaluator)),
            "render".to_string(),
            None,
            WatcherOptions { before: Some(before), ..Default::default() },
            true,
        )
    }

    fn build(
        owner: &Owner,
        getter: Getter,
        expression: String,
        callback: Option<Callback>,
        options: WatcherOptions,
        is_render: bool,
    ) -> Result<Self> {
        let watcher = Self {
            inner: Arc::new(WatcherInner {
                id: WatcherId::next(),
                owner: owner.downgrade(),
                getter,
                callback,
                expression,
                deep: options.deep,
                user: options.user,
                lazy: options.lazy,
                sync: options.sync,
                before: options.before,
                state: Mutex::new(WatcherState {
                    value: Value::Null,
                    dirty: options.lazy,
                    active: true,
                    deps: IndexMap::new(),
                    new_deps: IndexMap::new(),
                }),
            }),
        };

        if is_render {
            owner.set_render_watcher(watcher.id());
        }
        owner.push_watcher(watcher.clone());

        if !watcher.inner.lazy {
            let value = watcher.evaluate()?;
            watcher.inner.state.lock().value = value;
        }

        tracing::trace!(id = watcher.id().raw(), expression = %watcher.inner.expression, "watcher created");
        Ok(watcher)
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    /// The owning unit, while it is still alive.
    pub fn owner(&self) -> Option<Owner> {
        self.inner.owner.upgrade()
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn is_user(&self) -> bool {
        self.inner.user
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    pub fn is_deep(&self) -> bool {
        self.inner.deep
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    /// The last value produced by the evaluator.
    pub fn value(&self) -> Value {
        self.inner.state.lock().value.clone()
    }

    /// Number of dependency nodes held from the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.inner.state.lock().deps.len()
    }

    pub(crate) fn before_hook(&self) -> Option<BeforeHook> {
        self.inner.before.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakWatcher {
        WeakWatcher(Arc::downgrade(&self.inner))
    }

    /// Evaluate and re-collect dependencies.
    ///
    /// Dependency reconciliation runs on every exit path, including an
    /// evaluator error or panic. A torn-down watcher returns its last value
    /// and collects nothing.
    pub fn evaluate(&self) -> Result<Value> {
        if !self.is_active() {
            return Ok(self.value());
        }
        let Some(owner) = self.owner() else {
            // The owner was dropped without being destroyed.
            self.teardown();
            return Ok(self.value());
        };
        let evaluation = Evaluation::begin(self);

        let value = match self.inner.getter.call(&owner) {
            Ok(value) => value,
            Err(source) => {
                let err = ReactiveError::Evaluation {
                    expression: self.inner.expression.clone(),
                    source,
                };
                if !self.inner.user {
                    return Err(err);
                }
                config::report_error(&err, Some(&owner), "watcher getter");
                Value::Null
            }
        };

        if self.inner.deep {
            // Touch every nested property while still the current target.
            traverse(&value);
        }

        drop(evaluation);
        Ok(value)
    }

    /// Record a dependency read during the current evaluation.
    pub fn add_dep(&self, dep: &Dep) {
        let id = dep.id();
        let subscribe = {
            let mut state = self.inner.state.lock();
            if !state.active || state.new_deps.contains_key(&id) {
                false
            } else {
                state.new_deps.insert(id, dep.clone());
                !state.deps.contains_key(&id)
            }
        };
        if subscribe {
            dep.add_subscriber(self);
        }
    }

    /// Swap in the dependencies collected by the last evaluation and drop
    /// subscriptions that were not renewed.
    fn cleanup_deps(&self) {
        let stale: Vec<Dep> = {
            let mut state = self.inner.state.lock();
            let state = &mut *state;
            if !state.active {
                // Torn down mid-evaluation: release whatever was collected.
                mem::take(&mut state.new_deps).into_values().collect()
            } else {
                let stale: Vec<Dep> = state
                    .deps
                    .iter()
                    .filter(|(id, _)| !state.new_deps.contains_key(*id))
                    .map(|(_, dep)| dep.clone())
                    .collect();
                state.deps = mem::take(&mut state.new_deps);
                stale
            }
        };
        for dep in stale {
            dep.remove_subscriber(self);
        }
    }

    /// React to a dependency change.
    pub fn update(&self) {
        if !self.is_active() {
            return;
        }
        if self.inner.lazy {
            self.inner.state.lock().dirty = true;
        } else if self.inner.sync {
            // Nobody above a setter can receive the error.
            if let Err(err) = self.run() {
                config::report_error(&err, self.owner().as_ref(), "sync watcher");
            }
        } else {
            scheduler::queue_watcher(self.clone());
        }
    }

    /// Recompute and fire the callback if the result warrants it.
    ///
    /// Callback errors are reported, never returned. A torn-down watcher
    /// does nothing.
    pub fn run(&self) -> Result<()> {
        if !self.is_active() {
            return Ok(());
        }

        let value = self.evaluate()?;
        let (fire, old) = {
            let mut state = self.inner.state.lock();
            let fire = !value.is_same(&state.value) || value.is_container() || self.inner.deep;
            let old = if fire {
                mem::replace(&mut state.value, value.clone())
            } else {
                Value::Null
            };
            (fire, old)
        };

        if fire {
            if let Some(callback) = &self.inner.callback {
                if let Err(source) = callback(&value, &old) {
                    let err = ReactiveError::Callback {
                        expression: self.inner.expression.clone(),
                        source,
                    };
                    config::report_error(&err, self.owner().as_ref(), "watcher callback");
                }
            }
        }
        Ok(())
    }

    /// Evaluate a lazy watcher and clear its dirty flag.
    pub fn recompute(&self) -> Result<()> {
        let value = self.evaluate()?;
        let mut state = self.inner.state.lock();
        state.value = value;
        state.dirty = false;
        Ok(())
    }

    /// Make the current target depend on everything this watcher holds.
    pub fn depend(&self) {
        let deps: Vec<Dep> = self.inner.state.lock().deps.values().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every held node and deactivate. Idempotent.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            mem::take(&mut state.deps)
        };

        // Owners being destroyed drop their whole list at once.
        if let Some(owner) = self.owner() {
            if !owner.is_being_destroyed() {
                owner.remove_watcher(self.id());
            }
        }
        for dep in deps.values() {
            dep.remove_subscriber(self);
        }
        tracing::trace!(id = self.id().raw(), "watcher torn down");
    }

    /// Description used in runaway-update diagnostics.
    pub(crate) fn describe(&self) -> String {
        if self.inner.user {
            format!("in watcher with expression \"{}\"", self.inner.expression)
        } else {
            "in a component render function".to_string()
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("expression", &self.inner.expression)
            .field("active", &state.active)
            .field("dirty", &state.dirty)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

/// Keeps the watcher on the context stack for the duration of an
/// evaluation, then pops it and reconciles dependencies.
struct Evaluation<'a> {
    watcher: &'a Watcher,
    context: Option<ReactiveContext>,
}

impl<'a> Evaluation<'a> {
    fn begin(watcher: &'a Watcher) -> Self {
        Self {
            watcher,
            context: Some(ReactiveContext::enter(Some(watcher.clone()))),
        }
    }
}

impl Drop for Evaluation<'_> {
    fn drop(&mut self) {
        drop(self.context.take());
        self.watcher.cleanup_deps();
    }
}

/// Split a watch path into segments. Only word characters, `$` and `.`
/// are accepted.
fn parse_path(path: &str) -> Option<SmallVec<[String; 4]>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return None;
    }
    Some(path.split('.').map(str::to_string).collect())
}

fn resolve_path(owner: &Owner, segments: &[String]) -> Value {
    let mut current = match owner.data() {
        Some(data) => Value::Object(data),
        None => return Value::Null,
    };
    for segment in segments {
        current = match &current {
            Value::Object(object) => object.get(segment),
            Value::Array(array) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| array.get(index))
                .unwrap_or(Value::Null),
            _ => return Value::Null,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{observe, Object};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reactive_object(pairs: &[(&str, i64)]) -> Object {
        let object: Object = pairs.iter().map(|(k, v)| (*k, Value::from(*v))).collect();
        observe(&Value::Object(object.clone()));
        object
    }

    #[test]
    fn evaluation_collects_read_properties_only() {
        let owner = Owner::new("watcher");
        let state = reactive_object(&[("a", 1), ("b", 2)]);

        let read = state.clone();
        let watcher = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("a")),
            None,
            WatcherOptions { sync: true, ..Default::default() },
        )
        .unwrap();

        assert_eq!(watcher.value(), Value::from(1));
        assert_eq!(watcher.dependency_count(), 1);
    }

    #[test]
    fn repeated_reads_subscribe_once() {
        let owner = Owner::new("watcher");
        let state = reactive_object(&[("a", 1)]);

        let read = state.clone();
        let watcher = Watcher::new(
            &owner,
            move |_: &Owner| {
                read.get("a");
                read.get("a");
                Ok(read.get("a"))
            },
            None,
            WatcherOptions { sync: true, ..Default::default() },
        )
        .unwrap();

        assert_eq!(watcher.dependency_count(), 1);
        state.set("a", 5);
        state.set("a", 6);
        assert_eq!(watcher.dependency_count(), 1);
        assert_eq!(watcher.value(), Value::from(6));
    }

    #[test]
    fn abandoned_branch_is_unsubscribed() {
        let owner = Owner::new("watcher");
        let state = reactive_object(&[("flag", 1), ("left", 10), ("right", 20)]);
        let runs = Arc::new(AtomicUsize::new(0));

        let read = state.clone();
        let counter = runs.clone();
        let _watcher = Watcher::new(
            &owner,
            move |_: &Owner| {
                counter.fetch_add(1, Ordering::SeqCst);
                if read.get("flag") == Value::from(1) {
                    Ok(read.get("left"))
                } else {
                    Ok(read.get("right"))
                }
            },
            None,
            WatcherOptions { sync: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        state.set("flag", 0);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // `left` is no longer read, so changing it is ignored.
        state.set("left", 11);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        state.set("right", 21);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn lazy_watcher_only_marks_dirty() {
        let owner = Owner::new("watcher");
        let state = reactive_object(&[("a", 1)]);
        let runs = Arc::new(AtomicUsize::new(0));

        let read = state.clone();
        let counter = runs.clone();
        let watcher = Watcher::new(
            &owner,
            move |_: &Owner| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(read.get("a"))
            },
            None,
            WatcherOptions { lazy: true, ..Default::default() },
        )
        .unwrap();

        assert!(watcher.is_dirty());
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        watcher.recompute().unwrap();
        assert!(!watcher.is_dirty());
        assert_eq!(watcher.value(), Value::from(1));

        state.set("a", 2);
        assert!(watcher.is_dirty());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn evaluation_error_is_returned_for_internal_watchers() {
        let owner = Owner::new("watcher");
        let result = Watcher::new(
            &owner,
            |_: &Owner| Err("broken getter".into()),
            None,
            WatcherOptions::default(),
        );

        match result {
            Err(ReactiveError::Evaluation { expression, .. }) => assert_eq!(expression, "function"),
            other => panic!("expected evaluation error, got {other:?}"),
        }
        assert_eq!(ReactiveContext::depth(), 0);
    }

    #[test]
    fn teardown_is_idempotent() {
        let owner = Owner::new("watcher");
        let state = reactive_object(&[("a", 1)]);

        let read = state.clone();
        let watcher = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("a")),
            None,
            WatcherOptions { sync: true, ..Default::default() },
        )
        .unwrap();
        assert_eq!(owner.watcher_count(), 1);

        watcher.teardown();
        watcher.teardown();

        assert!(!watcher.is_active());
        assert_eq!(watcher.dependency_count(), 0);
        assert_eq!(owner.watcher_count(), 0);
    }

    #[test]
    fn path_parsing() {
        assert_eq!(parse_path("a.b.c").unwrap().as_slice(), ["a", "b", "c"]);
        assert_eq!(parse_path("$data.x_1").unwrap().as_slice(), ["$data", "x_1"]);
        assert!(parse_path("a[0]").is_none());
        assert!(parse_path("a + b").is_none());
    }
}
