//! Watcher Queue
//!
//! Watchers notified outside of a flush are batched here and run together
//! at the next tick.
//!
//! # Algorithm
//!
//! 1. A watcher is enqueued at most once per batch. The first enqueue of a
//!    batch requests a flush from the tick scheduler, or flushes right away
//!    when `async_flush` is off.
//!
//! 2. The flush sorts the batch by watcher id. Ids follow creation order,
//!    so a parent runs before its children and an owner's own watchers run
//!    before its render watcher.
//!
//! 3. The batch is walked with a live cursor. A watcher enqueued while the
//!    flush runs is inserted by id after the cursor and still runs in this
//!    pass.
//!
//! 4. A watcher that keeps re-enqueueing itself is abandoned for the rest
//!    of the flush after [`MAX_UPDATE_COUNT`] re-queues, with a warning.
//!
//! 5. After the walk the batch state is reset, then `activated` and
//!    `updated` hooks are dispatched.
//!
//! An evaluator error does not end the walk early. The first one is
//! returned from [`flush_scheduler_queue`] after the hooks have run.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::mem;

use super::tick;
use crate::config;
use crate::error::{BoxError, Diagnostic, Result};
use crate::reactive::{Hook, Owner, Watcher, WatcherId};

/// Re-queues of one watcher tolerated within a single flush.
pub const MAX_UPDATE_COUNT: usize = 100;

#[derive(Default)]
struct SchedulerState {
    queue: Vec<Watcher>,
    has: HashSet<WatcherId>,
    circular: HashMap<WatcherId, usize>,
    aborted: HashSet<WatcherId>,
    activated: Vec<Owner>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

impl SchedulerState {
    fn reset(&mut self) {
        self.queue.clear();
        self.has.clear();
        self.circular.clear();
        self.aborted.clear();
        self.activated.clear();
        self.waiting = false;
        self.flushing = false;
        self.index = 0;
    }
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Add a watcher to the pending batch.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();
    let schedule = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        if !state.has.insert(id) {
            return false;
        }

        if state.flushing {
            // Keep the unprocessed tail sorted by id.
            let mut at = state.queue.len();
            while at > state.index + 1 && state.queue[at - 1].id() > id {
                at -= 1;
            }
            state.queue.insert(at, watcher);
        } else {
            state.queue.push(watcher);
        }

        if state.waiting {
            return false;
        }
        state.waiting = true;
        true
    });

    if !schedule {
        return;
    }

    if !config::async_flush() {
        if let Err(err) = flush_scheduler_queue() {
            config::report_error(&err, None, "scheduler flush");
        }
        return;
    }

    tick::next_tick(|| flush_scheduler_queue().map_err(|err| Box::new(err) as BoxError));
}

/// Queue a retained owner that re-entered the active state. Its
/// `activated` hook fires after the current (or next) flush.
pub fn queue_activated_component(owner: &Owner) {
    owner.set_inactive(false);
    SCHEDULER.with(|state| state.borrow_mut().activated.push(owner.clone()));
}

pub fn is_flushing() -> bool {
    SCHEDULER.with(|state| state.borrow().flushing)
}

/// Number of watchers in the pending batch.
pub fn queued_len() -> usize {
    SCHEDULER.with(|state| state.borrow().queue.len())
}

/// Resets the batch if a flush exits early.
struct FlushGuard {
    armed: bool,
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        if self.armed {
            SCHEDULER.with(|state| state.borrow_mut().reset());
        }
    }
}

enum Step {
    Run(Watcher),
    Skip,
    Done,
}

/// Run every queued watcher.
///
/// An evaluation error from a non-user watcher does not stop the batch.
/// The first one is returned once the flush completes, later ones go to
/// the error handler, and failed watchers get no `updated` hook.
pub fn flush_scheduler_queue() -> Result<()> {
    let mut guard = FlushGuard { armed: true };
    let mut first_error = None;
    let mut failed = HashSet::new();
    let queued = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        state.flushing = true;
        state.queue.sort_by_key(Watcher::id);
        state.queue.len()
    });
    tracing::debug!(queued, "flush start");

    let mut index = 0;
    loop {
        let step = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            state.index = index;
            match state.queue.get(index).cloned() {
                None => Step::Done,
                Some(watcher) if state.aborted.contains(&watcher.id()) => {
                    state.has.remove(&watcher.id());
                    Step::Skip
                }
                Some(watcher) => Step::Run(watcher),
            }
        });

        let watcher = match step {
            Step::Done => break,
            Step::Skip => {
                index += 1;
                continue;
            }
            Step::Run(watcher) => watcher,
        };
        let id = watcher.id();

        if let Some(before) = watcher.before_hook() {
            before();
        }
        SCHEDULER.with(|state| state.borrow_mut().has.remove(&id));
        if let Err(err) = watcher.run() {
            failed.insert(id);
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                config::report_error(&err, watcher.owner().as_ref(), "scheduler flush");
            }
        }

        let runaway = SCHEDULER.with(|state| {
            let mut state = state.borrow_mut();
            if !state.has.contains(&id) {
                return false;
            }
            let count = state.circular.entry(id).or_insert(0);
            *count += 1;
            if *count > MAX_UPDATE_COUNT {
                state.aborted.insert(id);
                true
            } else {
                false
            }
        });
        if runaway {
            config::warn(&Diagnostic::InfiniteUpdate(watcher.describe()), watcher.owner().as_ref());
        }

        index += 1;
    }

    let (activated, updated) = SCHEDULER.with(|state| {
        let mut state = state.borrow_mut();
        let activated = mem::take(&mut state.activated);
        let updated = mem::take(&mut state.queue);
        state.reset();
        (activated, updated)
    });
    guard.armed = false;
    tracing::debug!(ran = updated.len(), "flush end");

    call_activated_hooks(activated);
    call_updated_hooks(&updated, &failed);
    first_error.map_or(Ok(()), Err)
}

fn call_activated_hooks(owners: Vec<Owner>) {
    for owner in owners {
        owner.set_inactive(false);
        config::dispatch_hook(&owner, Hook::Activated);
    }
}

fn call_updated_hooks(queue: &[Watcher], failed: &HashSet<WatcherId>) {
    let mut seen = HashSet::new();
    for watcher in queue.iter().rev() {
        if failed.contains(&watcher.id()) || !seen.insert(watcher.id()) {
            continue;
        }
        let Some(owner) = watcher.owner() else {
            continue;
        };
        if owner.is_render_watcher(watcher) && owner.is_mounted() && !owner.is_destroyed() {
            config::dispatch_hook(&owner, Hook::Updated);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::observer::{observe, Object, Value};
    use crate::reactive::WatcherOptions;
    use crate::scheduler::EventLoop;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn state(pairs: &[(&str, i64)]) -> Object {
        let object: Object = pairs.iter().map(|(k, v)| (*k, Value::from(*v))).collect();
        observe(&Value::Object(object.clone()));
        object
    }

    #[test]
    fn batch_is_deduplicated_and_flushed_at_next_tick() {
        let owner = Owner::new("queue");
        let data = state(&[("n", 0)]);
        let runs = Arc::new(Mutex::new(Vec::new()));

        let read = data.clone();
        let sink = runs.clone();
        let _watcher = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("n")),
            Some(crate::reactive::callback(move |new, _| {
                sink.lock().push(new.clone());
                Ok(())
            })),
            WatcherOptions::default(),
        )
        .unwrap();

        data.set("n", 1);
        data.set("n", 2);
        data.set("n", 3);
        assert_eq!(queued_len(), 1);
        assert!(runs.lock().is_empty());

        EventLoop::current().run_until_idle();
        assert_eq!(*runs.lock(), vec![Value::from(3)]);
        assert_eq!(queued_len(), 0);
    }

    #[test]
    fn flush_runs_in_id_order() {
        let owner = Owner::new("queue");
        let data = state(&[("n", 0)]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut watchers = Vec::new();
        for label in ["first", "second", "third"] {
            let read = data.clone();
            let sink = order.clone();
            watchers.push(
                Watcher::new(
                    &owner,
                    move |_: &Owner| Ok(read.get("n")),
                    Some(crate::reactive::callback(move |_, _| {
                        sink.lock().push(label);
                        Ok(())
                    })),
                    WatcherOptions::default(),
                )
                .unwrap(),
            );
        }

        // Enqueue out of creation order.
        queue_watcher(watchers[2].clone());
        queue_watcher(watchers[0].clone());
        queue_watcher(watchers[1].clone());
        data.set("n", 1);
        flush_scheduler_queue().unwrap();

        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        EventLoop::current().run_until_idle();
    }

    #[test]
    fn runaway_watcher_is_abandoned() {
        let warnings = Arc::new(Mutex::new(Vec::new()));
        let sink = warnings.clone();
        config::set(Config::default().with_warn_handler(move |d, _| sink.lock().push(d.clone())));

        let owner = Owner::new("queue");
        let data = state(&[("n", 0)]);
        let calls = Arc::new(Mutex::new(0_usize));

        let read = data.clone();
        let write = data.clone();
        let counter = calls.clone();
        let _watcher = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("n")),
            Some(crate::reactive::callback(move |new, _| {
                *counter.lock() += 1;
                write.set("n", new.as_f64().unwrap_or(0.0) + 1.0);
                Ok(())
            })),
            WatcherOptions { user: true, ..Default::default() },
        )
        .unwrap();

        data.set("n", 1);
        EventLoop::current().run_until_idle();

        assert_eq!(*calls.lock(), MAX_UPDATE_COUNT + 1);
        assert_eq!(
            *warnings.lock(),
            vec![Diagnostic::InfiniteUpdate("in watcher with expression \"function\"".into())]
        );
        assert!(!is_flushing());
        config::reset();
    }

    #[test]
    fn evaluation_error_does_not_drop_the_rest_of_the_batch() {
        let owner = Owner::new("queue");
        let data = state(&[("n", 0)]);

        let read = data.clone();
        let _failing = Watcher::new(
            &owner,
            move |_: &Owner| {
                if read.get("n") == Value::from(1) {
                    Err("bad state".into())
                } else {
                    Ok(Value::Null)
                }
            },
            None,
            WatcherOptions::default(),
        )
        .unwrap();

        let ran = Arc::new(Mutex::new(0_usize));
        let read = data.clone();
        let sink = ran.clone();
        let _healthy = Watcher::new(
            &owner,
            move |_: &Owner| Ok(read.get("n")),
            Some(crate::reactive::callback(move |_, _| {
                *sink.lock() += 1;
                Ok(())
            })),
            WatcherOptions::default(),
        )
        .unwrap();

        data.set("n", 1);
        assert!(matches!(
            flush_scheduler_queue(),
            Err(crate::error::ReactiveError::Evaluation { .. })
        ));
        assert_eq!(*ran.lock(), 1);
        assert!(!is_flushing());
        assert_eq!(queued_len(), 0);

        // A later batch still schedules normally.
        data.set("n", 2);
        assert_eq!(queued_len(), 2);
        EventLoop::current().run_until_idle();
    }

    #[test]
    fn activated_hooks_fire_after_flush() {
        let hooks = Arc::new(Mutex::new(Vec::new()));
        let sink = hooks.clone();
        config::set(Config::default().with_hook_dispatcher(move |owner, hook| {
            sink.lock().push((owner.name().to_string(), hook));
        }));

        let owner = Owner::new("kept-alive");
        owner.set_inactive(true);
        queue_activated_component(&owner);
        assert!(!owner.is_inactive());
        assert!(hooks.lock().is_empty());

        flush_scheduler_queue().unwrap();
        assert_eq!(*hooks.lock(), vec![("kept-alive".to_string(), Hook::Activated)]);
        config::reset();
    }
}
