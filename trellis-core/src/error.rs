//! Error Types
//!
//! Two families of problems surface from the reactive core:
//!
//! - [`ReactiveError`]: something failed while evaluating or running a
//!   computation. These travel through `Result` or the configured error
//!   handler.
//! - [`Diagnostic`]: misuse of the API that the core can recover from.
//!   These are reported through the warning handler and never returned.

use thiserror::Error;

/// Error type returned by user-supplied evaluators and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors raised while evaluating watchers or draining deferred work.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// The evaluator of a watcher failed.
    #[error("error in getter for watcher \"{expression}\": {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: BoxError,
    },

    /// The change callback of a watcher failed.
    #[error("error in callback for watcher \"{expression}\": {source}")]
    Callback {
        expression: String,
        #[source]
        source: BoxError,
    },

    /// A callback deferred to the next tick failed.
    #[error("error in next-tick callback: {0}")]
    Deferred(#[source] BoxError),

    /// A callback panicked and the panic was contained.
    #[error("{context} panicked: {message}")]
    Panicked {
        context: &'static str,
        message: String,
    },
}

/// Recoverable misuse reported through the warning handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("cannot set reactive property on undefined, null, or primitive value: {0}")]
    SetOnPrimitive(String),

    #[error("cannot delete reactive property on undefined, null, or primitive value: {0}")]
    DeleteOnPrimitive(String),

    #[error(
        "avoid adding reactive properties to a managed instance or its root data at runtime; \
         declare it upfront instead"
    )]
    AddToRoot,

    #[error("avoid deleting properties on a managed instance or its root data; set it to null instead")]
    DeleteFromRoot,

    #[error("failed watching path \"{0}\": only simple dot-delimited paths are accepted")]
    InvalidPath(String),

    #[error("you may have an infinite update loop {0}")]
    InfiniteUpdate(String),

    #[error("array targets only accept index keys, got \"{0}\"")]
    NonIndexArrayKey(String),

    #[error("array index {0} is past the largest index an array can hold")]
    ArrayIndexTooLarge(usize),
}

/// Render a caught panic payload as text.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_error_names_expression() {
        let err = ReactiveError::Evaluation {
            expression: "user.name".into(),
            source: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "error in getter for watcher \"user.name\": boom"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
