//! Reactive Primitives
//!
//! This module implements dependency tracking: dependency nodes, the
//! active-computation context, and watchers.
//!
//! # Concepts
//!
//! ## Dependency nodes
//!
//! A [`Dep`] is a publish point for one piece of observable state. The
//! observer layer creates one per reactive property and one per observed
//! container.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a tracked computation. While it evaluates it is the
//! current target of the [`ReactiveContext`]; every dependency node read
//! in that window subscribes it. When one of those nodes notifies, the
//! watcher marks itself dirty, recomputes, or enqueues with the scheduler.
//!
//! ## Computed values
//!
//! A [`Computed`] is a lazy watcher read like a value: it caches until one
//! of its inputs changes.
//!
//! # Implementation Notes
//!
//! The context is a thread-local stack, so reads are tracked without
//! threading a context argument through user code. Dependency nodes hold
//! watchers weakly; watchers hold their nodes strongly and release them on
//! teardown.

mod computed;
mod context;
mod dep;
mod id;
mod owner;
mod traverse;
mod watcher;

pub use computed::Computed;
pub use context::{untracked, ReactiveContext};
pub use dep::Dep;
pub use id::{DepId, OwnerId, WatcherId};
pub use owner::{Hook, Owner, WatchOptions};
pub use watcher::{callback, BeforeHook, Callback, Evaluator, Watcher, WatcherOptions};
