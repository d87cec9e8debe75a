//! Scheduling
//!
//! Two layers decide when queued work runs:
//!
//! - [`queue`](queue_watcher): deduplicated, id-ordered batches of
//!   watchers drained in one flush.
//! - [`tick`](next_tick): deferral of arbitrary callbacks to the next safe
//!   point of the host, under a microtask or macrotask policy.
//!
//! The host itself is pluggable through [`Host`].

mod host;
mod queue;
mod tick;

pub use host::{EventLoop, Host, Job, TokioHost};
pub use queue::{
    flush_scheduler_queue, is_flushing, queue_activated_component, queue_watcher, queued_len,
    MAX_UPDATE_COUNT,
};
pub use tick::{
    current_strategy, install_host, is_pending, next_tick, next_tick_future, uninstall_host,
    with_macro_task, NextTick, TickCallback, TickStrategy,
};
