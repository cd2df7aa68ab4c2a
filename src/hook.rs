//! Hook registry for breaker events and executor teardown.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::TeardownError;
use crate::state::State;

type HookFn = Arc<dyn Fn() + Send + Sync + 'static>;
type TeardownFn = Arc<dyn Fn() -> Result<(), TeardownError> + Send + Sync + 'static>;

/// Builds the hook registry for a newly pooled breaker, given its domain.
pub type HookFactory = Arc<dyn Fn(&str) -> HookRegistry + Send + Sync + 'static>;

/// A registry for breaker event hooks.
///
/// Hooks run outside the breaker's state lock, on the thread that caused the
/// event.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_success: RwLock<Option<HookFn>>,
    on_failure: RwLock<Option<HookFn>>,
    on_teardown: RwLock<Option<TeardownFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("on_open", &self.on_open.read().is_some())
            .field("on_close", &self.on_close.read().is_some())
            .field("on_half_open", &self.on_half_open.read().is_some())
            .field("on_teardown", &self.on_teardown.read().is_some())
            .finish()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
            on_teardown: RwLock::new(None),
        }
    }

    /// Sets the hook to call when the circuit opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a recovery probe starts.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a guarded call succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a guarded call fails.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the pool evicts the breaker.
    pub fn set_on_teardown<F>(&self, f: F)
    where
        F: Fn() -> Result<(), TeardownError> + Send + Sync + 'static,
    {
        *self.on_teardown.write() = Some(Arc::new(f));
    }

    /// Executes the appropriate hook for a state transition.
    pub fn execute_state_transition_hook(&self, to: State) {
        let hook = match to {
            State::Open => self.on_open.read().clone(),
            State::Closed => self.on_close.read().clone(),
            State::HalfOpen => self.on_half_open.read().clone(),
        };
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Executes the success hook.
    pub fn execute_success_hook(&self) {
        if let Some(hook) = self.on_success.read().clone() {
            hook();
        }
    }

    /// Executes the failure hook.
    pub fn execute_failure_hook(&self) {
        if let Some(hook) = self.on_failure.read().clone() {
            hook();
        }
    }

    /// Executes the teardown hook, converting a panic into an error.
    pub fn execute_teardown_hook(&self) -> Result<(), TeardownError> {
        let hook = match self.on_teardown.read().clone() {
            Some(hook) => hook,
            None => return Ok(()),
        };
        panic::catch_unwind(AssertUnwindSafe(|| hook()))
            .unwrap_or_else(|_| Err(TeardownError("teardown hook panicked".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn transition_hooks_fire_for_matching_state() {
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let hooks = HookRegistry::new();
        {
            let opened = Arc::clone(&opened);
            hooks.set_on_open(move || {
                opened.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let closed = Arc::clone(&closed);
            hooks.set_on_close(move || {
                closed.fetch_add(1, Ordering::SeqCst);
            });
        }

        hooks.execute_state_transition_hook(State::Open);
        hooks.execute_state_transition_hook(State::Open);
        hooks.execute_state_transition_hook(State::HalfOpen);
        hooks.execute_state_transition_hook(State::Closed);

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_teardown_hook_is_ok() {
        assert_eq!(HookRegistry::new().execute_teardown_hook(), Ok(()));
    }

    #[test]
    fn teardown_errors_and_panics_are_returned() {
        let hooks = HookRegistry::new();
        hooks.set_on_teardown(|| Err(TeardownError("socket busy".into())));
        assert_eq!(
            hooks.execute_teardown_hook(),
            Err(TeardownError("socket busy".into()))
        );

        hooks.set_on_teardown(|| panic!("broken destructor"));
        let err = hooks.execute_teardown_hook().unwrap_err();
        assert!(err.0.contains("panicked"));
    }
}
