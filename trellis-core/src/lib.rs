//! Trellis Core
//!
//! This crate provides the reactive core of the Trellis UI framework.
//! It implements:
//!
//! - Observable data graphs (objects and arrays whose reads and writes are
//!   tracked)
//! - Dependency tracking through an implicit active-computation context
//! - Watchers, computed values and owning units
//! - A deduplicated, id-ordered update queue flushed at the next tick
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `observer`: the value model and observation of plain data
//! - `reactive`: dependency nodes, the reactive context, watchers
//! - `scheduler`: the watcher queue, the tick scheduler and host adapters
//! - `config`: per-thread runtime knobs and reporting handlers
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use trellis_core::observer::{Object, Value};
//! use trellis_core::reactive::{Owner, WatchOptions};
//! use trellis_core::scheduler::EventLoop;
//!
//! let data: Object = [("count", Value::from(1))].into_iter().collect();
//! let owner = Owner::with_data("counter", data.clone());
//!
//! let runs = Arc::new(AtomicUsize::new(0));
//! let seen = runs.clone();
//! owner
//!     .watch_path(
//!         "count",
//!         move |_, _| {
//!             seen.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         },
//!         WatchOptions::default(),
//!     )
//!     .unwrap();
//!
//! // Writes are batched until the next tick.
//! data.set("count", 2);
//! data.set("count", 3);
//! assert_eq!(runs.load(Ordering::SeqCst), 0);
//!
//! EventLoop::current().run_until_idle();
//! assert_eq!(runs.load(Ordering::SeqCst), 1);
//! ```

pub mod config;
pub mod error;
pub mod observer;
pub mod reactive;
pub mod scheduler;

pub use error::{BoxError, Diagnostic, ReactiveError, Result};
pub use observer::{delete, observe, set, Array, Object, Value};
pub use reactive::{Computed, Dep, Owner, Watcher, WatcherOptions};
pub use scheduler::{next_tick, next_tick_future};
