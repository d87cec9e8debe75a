//! Reactive Context
//!
//! The reactive context tracks which watcher is currently evaluating.
//! This is what lets a property read subscribe without an explicit call:
//! the read asks the context for the current target and registers with it.
//!
//! # Implementation
//!
//! We use a thread-local stack. Evaluation nests (a computed value read
//! while a render evaluates), so a single slot is not enough; the top of
//! the stack is the only entry visible as the current target.
//!
//! An entry may be empty. Pushing an empty entry suspends tracking for a
//! region of code, e.g. while invoking lifecycle hooks.

use std::cell::RefCell;

use super::watcher::Watcher;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the context when dropped.
///
/// This ensures the target stack is properly maintained even if the
/// evaluation panics.
pub struct ReactiveContext {
    depth: usize,
}

impl ReactiveContext {
    /// Push `target` as the current computation.
    ///
    /// The context is exited when the returned guard is dropped.
    pub fn enter(target: Option<Watcher>) -> Self {
        let depth = TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(target);
            stack.len()
        });

        Self { depth }
    }

    /// Suspend dependency tracking until the guard is dropped.
    pub fn untracked() -> Self {
        Self::enter(None)
    }

    /// The watcher currently collecting dependencies, if any.
    pub fn current_target() -> Option<Watcher> {
        TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
    }

    /// Whether a read right now would register a dependency.
    pub fn has_target() -> bool {
        TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
    }

    /// Number of nested evaluations on this thread.
    pub fn depth() -> usize {
        TARGET_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        TARGET_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            // Guards must be dropped in reverse order of creation.
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop();
        });
    }
}

/// Run `f` with dependency tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::untracked();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Owner, Watcher, WatcherOptions};
    use crate::observer::Value;

    fn lazy_watcher() -> Watcher {
        let owner = Owner::new("context");
        Watcher::new(
            &owner,
            |_: &Owner| Ok(Value::Null),
            None,
            WatcherOptions { lazy: true, ..Default::default() },
        )
        .unwrap()
    }

    #[test]
    fn context_tracks_target() {
        let watcher = lazy_watcher();

        assert!(!ReactiveContext::has_target());
        assert!(ReactiveContext::current_target().is_none());

        {
            let _ctx = ReactiveContext::enter(Some(watcher.clone()));

            assert!(ReactiveContext::has_target());
            assert_eq!(
                ReactiveContext::current_target().map(|w| w.id()),
                Some(watcher.id())
            );
        }

        // Context should be cleaned up after drop
        assert!(!ReactiveContext::has_target());
        assert_eq!(ReactiveContext::depth(), 0);
    }

    #[test]
    fn nested_contexts() {
        let outer = lazy_watcher();
        let inner = lazy_watcher();

        {
            let _ctx1 = ReactiveContext::enter(Some(outer.clone()));
            assert_eq!(ReactiveContext::current_target().map(|w| w.id()), Some(outer.id()));

            {
                let _ctx2 = ReactiveContext::enter(Some(inner.clone()));
                assert_eq!(ReactiveContext::current_target().map(|w| w.id()), Some(inner.id()));
            }

            // After inner context drops, outer should be current
            assert_eq!(ReactiveContext::current_target().map(|w| w.id()), Some(outer.id()));
        }

        assert!(ReactiveContext::current_target().is_none());
    }

    #[test]
    fn empty_entry_hides_outer_target() {
        let outer = lazy_watcher();
        let _ctx = ReactiveContext::enter(Some(outer));

        untracked(|| {
            assert!(!ReactiveContext::has_target());
            assert_eq!(ReactiveContext::depth(), 2);
        });

        assert!(ReactiveContext::has_target());
    }
}
