//! Host Timing
//!
//! The tick scheduler does not know how the host runs deferred work. It
//! hands jobs to a [`Host`] under one of two timing classes:
//!
//! - **microtask**: after the current synchronous work drains, before the
//!   host yields to rendering or I/O.
//! - **macrotask**: after the host has yielded at least once.
//!
//! Two adapters are provided. [`EventLoop`] is a deterministic in-process
//! loop and the default host of every thread. [`TokioHost`] maps both
//! classes onto `tokio::task::spawn_local` and must be used from inside a
//! `tokio::task::LocalSet`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce()>;

/// Deferred-execution primitives offered by the host.
pub trait Host {
    fn queue_microtask(&self, job: Job);
    fn queue_macrotask(&self, job: Job);
}

#[derive(Default)]
struct LoopState {
    microtasks: VecDeque<Job>,
    macrotasks: VecDeque<Job>,
    turns: usize,
}

thread_local! {
    static CURRENT_LOOP: EventLoop = EventLoop::new();
}

/// A single-threaded event loop driven explicitly by the caller.
///
/// The microtask queue is drained completely before every macrotask and
/// after it. Each macrotask counts as one host yield ("turn").
#[derive(Clone, Default)]
pub struct EventLoop {
    inner: Rc<RefCell<LoopState>>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// This thread's default loop, used when no other host is installed.
    pub fn current() -> Self {
        CURRENT_LOOP.with(Clone::clone)
    }

    /// Run microtasks until none remain, including ones queued meanwhile.
    /// Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.inner.borrow_mut().microtasks.pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Drain microtasks, then run one macrotask and drain again. Returns
    /// false if there was no macrotask to run.
    pub fn run_once(&self) -> bool {
        self.run_microtasks();
        let job = {
            let mut state = self.inner.borrow_mut();
            let job = state.macrotasks.pop_front();
            if job.is_some() {
                state.turns += 1;
            }
            job
        };
        match job {
            Some(job) => {
                job();
                self.run_microtasks();
                true
            }
            None => false,
        }
    }

    /// Run until both queues are empty. Returns the number of turns taken.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        self.run_microtasks();
        while self.run_once() {
            turns += 1;
        }
        turns
    }

    /// Total macrotasks run so far.
    pub fn turns(&self) -> usize {
        self.inner.borrow().turns
    }

    pub fn pending_microtasks(&self) -> usize {
        self.inner.borrow().microtasks.len()
    }

    pub fn pending_macrotasks(&self) -> usize {
        self.inner.borrow().macrotasks.len()
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.borrow();
        state.microtasks.is_empty() && state.macrotasks.is_empty()
    }
}

impl Host for EventLoop {
    fn queue_microtask(&self, job: Job) {
        self.inner.borrow_mut().microtasks.push_back(job);
    }

    fn queue_macrotask(&self, job: Job) {
        self.inner.borrow_mut().macrotasks.push_back(job);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        f.debug_struct("EventLoop")
            .field("microtasks", &state.microtasks.len())
            .field("macrotasks", &state.macrotasks.len())
            .field("turns", &state.turns)
            .finish()
    }
}

/// Host backed by the current tokio `LocalSet`.
///
/// Microtasks are spawned as local tasks; macrotasks additionally yield
/// once to the runtime before running.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioHost;

impl Host for TokioHost {
    fn queue_microtask(&self, job: Job) {
        tokio::task::spawn_local(async move { job() });
    }

    fn queue_macrotask(&self, job: Job) {
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            job()
        });
    }
}
