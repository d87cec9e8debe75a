//! Runtime Configuration
//!
//! Knobs that change how the reactive core behaves, plus the
//! warning/error reporting pair and the lifecycle hook dispatcher supplied
//! by the host.
//!
//! Configuration is stored per thread. Every thread that drives reactive
//! state owns an independent runtime, so this is also the unit of
//! isolation between tests.
//!
//! The plain data knobs can be loaded from JSON:
//!
//! ```rust
//! use trellis_core::config::Config;
//!
//! let config = Config::from_json(r#"{ "async_flush": false, "silent": true }"#).unwrap();
//! assert!(!config.async_flush);
//! assert!(!config.server_rendering);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{Diagnostic, ReactiveError};
use crate::reactive::{Hook, Owner};

/// Receives errors that could not be returned to a caller.
///
/// Arguments are the error, the owning unit when known, and a short label
/// naming where the error happened.
pub type ErrorHandler = Arc<dyn Fn(&ReactiveError, Option<&Owner>, &str) + Send + Sync>;

/// Receives misuse diagnostics.
pub type WarnHandler = Arc<dyn Fn(&Diagnostic, Option<&Owner>) + Send + Sync>;

/// Invokes a named lifecycle hook on an owning unit.
pub type HookDispatcher = Arc<dyn Fn(&Owner, Hook) + Send + Sync>;

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Reactive runtime configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Suppress all warnings.
    pub silent: bool,

    /// Defer watcher flushes to the next tick. When false, every enqueue
    /// flushes immediately and notifications fire in ascending watcher id
    /// order. Intended for deterministic testing.
    pub async_flush: bool,

    /// Non-interactive rendering: no value is ever made observable.
    pub server_rendering: bool,

    #[serde(skip)]
    pub error_handler: Option<ErrorHandler>,

    #[serde(skip)]
    pub warn_handler: Option<WarnHandler>,

    #[serde(skip)]
    pub hook_dispatcher: Option<HookDispatcher>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            async_flush: true,
            server_rendering: false,
            error_handler: None,
            warn_handler: None,
            hook_dispatcher: None,
        }
    }
}

impl Config {
    /// Parse the data knobs from a JSON document. Handlers keep their
    /// defaults and must be installed programmatically.
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReactiveError, Option<&Owner>, &str) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_warn_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Diagnostic, Option<&Owner>) + Send + Sync + 'static,
    {
        self.warn_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_hook_dispatcher<F>(mut self, dispatcher: F) -> Self
    where
        F: Fn(&Owner, Hook) + Send + Sync + 'static,
    {
        self.hook_dispatcher = Some(Arc::new(dispatcher));
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("silent", &self.silent)
            .field("async_flush", &self.async_flush)
            .field("server_rendering", &self.server_rendering)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .field("hook_dispatcher", &self.hook_dispatcher.is_some())
            .finish()
    }
}

/// Snapshot of the current thread's configuration.
pub fn get() -> Config {
    CONFIG.with(|config| config.borrow().clone())
}

/// Replace the current thread's configuration.
pub fn set(config: Config) {
    CONFIG.with(|slot| *slot.borrow_mut() = config);
}

/// Modify the current thread's configuration in place.
pub fn update<F>(f: F)
where
    F: FnOnce(&mut Config),
{
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Restore the defaults.
pub fn reset() {
    set(Config::default());
}

pub(crate) fn async_flush() -> bool {
    CONFIG.with(|config| config.borrow().async_flush)
}

pub(crate) fn server_rendering() -> bool {
    CONFIG.with(|config| config.borrow().server_rendering)
}

/// Route an error to the host error handler, or log it.
pub(crate) fn report_error(err: &ReactiveError, owner: Option<&Owner>, info: &str) {
    // Cloned out so the handler may touch the configuration itself.
    let handler = CONFIG.with(|config| config.borrow().error_handler.clone());
    match handler {
        Some(handler) => handler(err, owner, info),
        None => tracing::error!(
            error = %err,
            owner = owner.map(Owner::name),
            info,
            "unhandled reactive error"
        ),
    }
}

/// Route a diagnostic to the host warning handler, or log it.
pub(crate) fn warn(diagnostic: &Diagnostic, owner: Option<&Owner>) {
    let (silent, handler) = CONFIG.with(|config| {
        let config = config.borrow();
        (config.silent, config.warn_handler.clone())
    });
    if silent {
        return;
    }
    match handler {
        Some(handler) => handler(diagnostic, owner),
        None => tracing::warn!(owner = owner.map(Owner::name), "{diagnostic}"),
    }
}

/// Invoke a lifecycle hook through the host dispatcher.
pub(crate) fn dispatch_hook(owner: &Owner, hook: Hook) {
    let dispatcher = CONFIG.with(|config| config.borrow().hook_dispatcher.clone());
    match dispatcher {
        Some(dispatcher) => dispatcher(owner, hook),
        None => tracing::trace!(owner = owner.name(), ?hook, "no hook dispatcher installed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn defaults_are_async_and_observing() {
        let config = Config::default();
        assert!(config.async_flush);
        assert!(!config.silent);
        assert!(!config.server_rendering);
    }

    #[test]
    fn json_overrides_only_named_knobs() {
        let config = Config::from_json(r#"{ "server_rendering": true }"#).unwrap();
        assert!(config.server_rendering);
        assert!(config.async_flush);
        assert!(config.warn_handler.is_none());
    }

    #[test]
    fn silent_suppresses_warnings() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set(Config::default().with_warn_handler(move |d, _| sink.lock().push(d.clone())));

        warn(&Diagnostic::AddToRoot, None);
        update(|c| c.silent = true);
        warn(&Diagnostic::DeleteFromRoot, None);

        assert_eq!(*seen.lock(), vec![Diagnostic::AddToRoot]);
        reset();
    }

    #[test]
    fn errors_reach_the_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        set(Config::default().with_error_handler(move |e, _, info| {
            sink.lock().push(format!("{info}: {e}"));
        }));

        report_error(&ReactiveError::Deferred("late".into()), None, "next tick");

        assert_eq!(*seen.lock(), vec!["next tick: error in next-tick callback: late"]);
        reset();
    }
}
