//! Tick Scheduler
//!
//! Defers callbacks to the next safe point of the host. Callbacks deferred
//! in the same synchronous turn are batched: the first one asks the host
//! for a flush, the rest ride along. A flush drains a snapshot of the
//! pending list, so callbacks deferred while it runs form the next batch.
//!
//! Each callback is isolated. An error or panic is reported through the
//! configured error handler and the remaining callbacks still run.

use std::cell::RefCell;
use std::future::Future;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::host::{EventLoop, Host, Job};
use crate::config;
use crate::error::{panic_message, BoxError, ReactiveError};

/// A callback deferred to the next tick.
pub type TickCallback = Box<dyn FnOnce() -> Result<(), BoxError>>;

/// Timing class used to schedule a tick flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TickStrategy {
    /// After the current synchronous work, before the host yields.
    #[default]
    Microtask,
    /// After the host yields at least once.
    Macrotask,
}

#[derive(Default)]
struct TickState {
    callbacks: Vec<TickCallback>,
    pending: bool,
    macro_depth: usize,
    host: Option<Rc<dyn Host>>,
}

impl TickState {
    fn strategy(&self) -> TickStrategy {
        if self.macro_depth > 0 {
            TickStrategy::Macrotask
        } else {
            TickStrategy::Microtask
        }
    }

    fn host(&self) -> Rc<dyn Host> {
        match &self.host {
            Some(host) => host.clone(),
            None => Rc::new(EventLoop::current()),
        }
    }
}

thread_local! {
    static TICK: RefCell<TickState> = RefCell::new(TickState::default());
}

/// Run `callback` at the next tick.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() -> Result<(), BoxError> + 'static,
{
    let schedule = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.callbacks.push(Box::new(callback));
        if tick.pending {
            return None;
        }
        tick.pending = true;
        Some((tick.strategy(), tick.host()))
    });

    if let Some((strategy, host)) = schedule {
        let job: Job = Box::new(flush_callbacks);
        match strategy {
            TickStrategy::Microtask => host.queue_microtask(job),
            TickStrategy::Macrotask => host.queue_macrotask(job),
        }
    }
}

/// A future that resolves once the next tick has flushed.
///
/// Obtained from [`next_tick_future`].
#[derive(Debug)]
pub struct NextTick {
    rx: oneshot::Receiver<()>,
}

impl Future for NextTick {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A dropped sender means the batch was discarded; resolve anyway.
        Pin::new(&mut self.rx).poll(cx).map(|_| ())
    }
}

/// Defer nothing but the completion signal: the returned future resolves
/// after every callback queued before it has run.
pub fn next_tick_future() -> NextTick {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
        Ok(())
    });
    NextTick { rx }
}

/// Run `f` with the macrotask strategy in effect: a tick flush first
/// requested inside `f` is scheduled as a macrotask.
pub fn with_macro_task<R>(f: impl FnOnce() -> R) -> R {
    struct MacroScope;

    impl Drop for MacroScope {
        fn drop(&mut self) {
            TICK.with(|tick| {
                let mut tick = tick.borrow_mut();
                tick.macro_depth = tick.macro_depth.saturating_sub(1);
            });
        }
    }

    TICK.with(|tick| tick.borrow_mut().macro_depth += 1);
    let _scope = MacroScope;
    f()
}

/// The strategy a flush requested right now would use.
pub fn current_strategy() -> TickStrategy {
    TICK.with(|tick| tick.borrow().strategy())
}

/// Route this thread's tick flushes to `host`. Returns the previous host.
pub fn install_host(host: Rc<dyn Host>) -> Option<Rc<dyn Host>> {
    TICK.with(|tick| tick.borrow_mut().host.replace(host))
}

/// Go back to the thread's default [`EventLoop`].
pub fn uninstall_host() -> Option<Rc<dyn Host>> {
    TICK.with(|tick| tick.borrow_mut().host.take())
}

/// Whether a tick flush has been requested and not yet run.
pub fn is_pending() -> bool {
    TICK.with(|tick| tick.borrow().pending)
}

fn flush_callbacks() {
    let batch = TICK.with(|tick| {
        let mut tick = tick.borrow_mut();
        tick.pending = false;
        mem::take(&mut tick.callbacks)
    });
    tracing::trace!(count = batch.len(), "tick flush");

    for callback in batch {
        let err = match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => ReactiveError::Deferred(source),
            Err(payload) => ReactiveError::Panicked {
                context: "next-tick callback",
                message: panic_message(payload.as_ref()),
            },
        };
        config::report_error(&err, None, "nextTick");
    }
}
