//! Computed Values
//!
//! A Computed is a cached derived value backed by a lazy watcher.
//!
//! # How Computed Values Work
//!
//! 1. Nothing runs at creation. The first read evaluates and caches.
//!
//! 2. When a dependency changes, the lazy watcher only marks itself dirty.
//!
//! 3. The next read recomputes. Reads while clean return the cache.
//!
//! 4. When read inside another computation, the reader is made to depend
//!    on every node the computed value depends on, so the reader is
//!    notified directly by the underlying state.

use std::fmt;

use super::context::ReactiveContext;
use super::owner::Owner;
use super::watcher::{Watcher, WatcherOptions};
use crate::error::{BoxError, Result};
use crate::observer::Value;

/// A cached derived value that recomputes only after its inputs change.
#[derive(Clone)]
pub struct Computed {
    watcher: Watcher,
}

impl Computed {
    /// Create a computed value. The getter is not run until first read.
    pub fn new<F>(owner: &Owner, getter: F) -> Result<Self>
    where
        F: Fn(&Owner) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        let watcher = Watcher::new(
            owner,
            getter,
            None,
            WatcherOptions { lazy: true, ..Default::default() },
        )?;
        Ok(Self { watcher })
    }

    /// Current value, recomputing if a dependency changed since last read.
    pub fn get(&self) -> Result<Value> {
        if self.watcher.is_dirty() {
            self.watcher.recompute()?;
        }
        if ReactiveContext::has_target() {
            self.watcher.depend();
        }
        Ok(self.watcher.value())
    }

    pub fn is_dirty(&self) -> bool {
        self.watcher.is_dirty()
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.watcher.id())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
