use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::value::RawValue;

use crate::error::HubError;

/// A registered client-side method handler.
///
/// `expected_arity` substitutes for the source SignalR client's runtime
/// inspection of a handler's parameter types — Rust callbacks have no
/// reflectable parameter list, so only the count is checked up front; each
/// argument's type is validated lazily when the callback pulls it out of the
/// [`InvocationContext`].
struct HandlerEntry {
    expected_arity: usize,
    callback: Box<dyn Fn(InvocationContext) + Send + Sync>,
}

/// The arguments of one incoming `Invocation`, handed to a registered
/// callback. Each argument stays as raw JSON until [`InvocationContext::arg`]
/// deserializes it into the type the callback expects.
pub struct InvocationContext {
    arguments: Vec<Box<RawValue>>,
}

impl InvocationContext {
    pub(crate) fn new(arguments: Vec<Box<RawValue>>) -> Self {
        Self { arguments }
    }

    /// Number of arguments the server actually sent.
    pub fn arg_count(&self) -> usize {
        self.arguments.len()
    }

    /// Deserialize the argument at `index` into `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, serde_json::Error> {
        let raw = self
            .arguments
            .get(index)
            .ok_or_else(|| serde::de::Error::custom(format!("no argument at index {index}")))?;
        serde_json::from_str(raw.get())
    }
}

/// Registered client method handlers, one per method name: a method may
/// have at most one handler — registering a second is rejected rather than
/// silently replacing or stacking the first.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, HandlerEntry>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `method`, enforcing at most one handler per
    /// method name and recording how many arguments it expects.
    pub fn register<F>(&self, method: &str, expected_arity: usize, callback: F) -> Result<(), HubError>
    where
        F: Fn(InvocationContext) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().expect("handler table lock poisoned");
        if handlers.contains_key(method) {
            tracing::error!(method, "a handler is already registered for this method, keeping the first");
            return Err(HubError::DuplicateHandler(method.to_owned()));
        }
        handlers.insert(
            method.to_owned(),
            HandlerEntry {
                expected_arity,
                callback: Box::new(callback),
            },
        );
        Ok(())
    }

    /// Remove any handler registered for `method`.
    pub fn remove(&self, method: &str) {
        self.handlers
            .write()
            .expect("handler table lock poisoned")
            .remove(method);
    }

    /// Dispatch an incoming invocation. Unknown methods and arity mismatches
    /// are reported to the caller (who logs and drops) rather than treated
    /// as connection-fatal.
    pub fn dispatch(&self, target: &str, arguments: Vec<Box<RawValue>>) -> DispatchOutcome {
        let handlers = self.handlers.read().expect("handler table lock poisoned");
        let Some(entry) = handlers.get(target) else {
            return DispatchOutcome::NoHandler;
        };
        if arguments.len() != entry.expected_arity {
            return DispatchOutcome::ArityMismatch {
                expected: entry.expected_arity,
                actual: arguments.len(),
            };
        }
        (entry.callback)(InvocationContext::new(arguments));
        DispatchOutcome::Dispatched
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    NoHandler,
    ArityMismatch { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_invokes_registered_handler_with_decoded_arguments() {
        let table = HandlerTable::new();
        let sum = Arc::new(AtomicI64::new(0));
        let sum_clone = Arc::clone(&sum);
        table
            .register("Add", 2, move |ctx| {
                let a: i64 = ctx.arg(0).unwrap();
                let b: i64 = ctx.arg(1).unwrap();
                sum_clone.store(a + b, Ordering::SeqCst);
            })
            .unwrap();

        let args = vec![
            RawValue::from_string("2".to_owned()).unwrap(),
            RawValue::from_string("3".to_owned()).unwrap(),
        ];
        let outcome = table.dispatch("Add", args);
        assert_eq!(outcome, DispatchOutcome::Dispatched);
        assert_eq!(sum.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn dispatch_reports_missing_handler() {
        let table = HandlerTable::new();
        assert_eq!(table.dispatch("Missing", vec![]), DispatchOutcome::NoHandler);
    }

    #[test]
    fn dispatch_reports_arity_mismatch_without_invoking() {
        let table = HandlerTable::new();
        table.register("Ping", 0, |_ctx| panic!("should not run")).unwrap();
        let outcome = table.dispatch(
            "Ping",
            vec![RawValue::from_string("1".to_owned()).unwrap()],
        );
        assert_eq!(
            outcome,
            DispatchOutcome::ArityMismatch {
                expected: 0,
                actual: 1
            }
        );
    }

    #[test]
    fn registering_a_second_handler_for_the_same_method_is_rejected() {
        let table = HandlerTable::new();
        table.register("Foo", 0, |_| {}).unwrap();
        let err = table.register("Foo", 0, |_| {}).unwrap_err();
        assert!(matches!(err, HubError::DuplicateHandler(name) if name == "Foo"));
    }

    #[test]
    fn remove_clears_the_handler() {
        let table = HandlerTable::new();
        table.register("Foo", 0, |_| {}).unwrap();
        table.remove("Foo");
        assert_eq!(table.dispatch("Foo", vec![]), DispatchOutcome::NoHandler);
    }
}
