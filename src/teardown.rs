//! Process-wide teardown registry.
//!
//! Long-lived collaborators (the workspace provider and the LLM proxy own
//! subprocesses) register a named release hook here. The sweep driver runs
//! all hooks exactly once, in registration order, on every exit path:
//! normal completion, error, or Ctrl-C.

use futures::future::BoxFuture;
use tracing::info;

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// An explicit teardown context passed around by the sweep driver.
///
/// Consuming `run_hooks` guarantees each hook fires at most once.
#[derive(Default)]
pub struct Teardown {
    hooks: Vec<(String, Hook)>,
}

impl Teardown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a release hook. Hooks run in registration order.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .push((name.into(), Box::new(move || Box::pin(hook()))));
    }

    /// Runs all registered hooks in registration order.
    pub async fn run_hooks(self) {
        for (name, hook) in self.hooks {
            info!(hook = %name, "Running teardown hook");
            hook().await;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut teardown = Teardown::new();

        for name in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            teardown.register(name, move || async move {
                order.lock().unwrap().push(name);
            });
        }

        teardown.run_hooks().await;
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_hooks_run_exactly_once() {
        let count = Arc::new(Mutex::new(0));
        let mut teardown = Teardown::new();
        let counter = Arc::clone(&count);
        teardown.register("counter", move || async move {
            *counter.lock().unwrap() += 1;
        });

        // run_hooks consumes the registry, so a second invocation is a
        // compile error rather than a double-release.
        teardown.run_hooks().await;
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn test_empty_registry() {
        let teardown = Teardown::new();
        assert!(teardown.is_empty());
    }
}
