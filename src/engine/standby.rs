//! Standby Gate
//!
//! Conditional suspension built purely from state composition: a guard runs
//! the wrapped state and then checks the predicate; while the predicate holds
//! the standby state asks the sleep policy to wait and is retried unchanged.

use crate::engine::{Context, State, StateKind, StateRef, StateResult, Step};
use std::sync::Arc;
use std::time::Duration;

/// Standby condition, evaluated against the worker context.
pub type Predicate = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Runs the wrapped state, then decides whether to enter standby.
pub struct StandbyGuard {
    next: StateRef,
    predicate: Predicate,
    timeout: Option<Duration>,
}

impl StandbyGuard {
    pub fn new(next: StateRef, predicate: Predicate) -> Self {
        Self {
            next,
            predicate,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl State for StandbyGuard {
    fn invoke(&self, context: &Context) -> StateResult {
        // Sleep requests and errors from the wrapped state propagate as-is;
        // the guard is retried afterwards.
        let result = match self.next.invoke(context)? {
            Step::Next(state) => state,
            Step::Repeat => Arc::clone(&self.next),
            Step::Sleep(duration) => return Ok(Step::Sleep(duration)),
        };

        let next: StateRef = if (self.predicate)(context) {
            Arc::new(
                StandbyState::new(result, Arc::clone(&self.predicate)).with_timeout(self.timeout),
            )
        } else {
            Arc::new(
                StandbyGuard::new(result, Arc::clone(&self.predicate)).with_timeout(self.timeout),
            )
        };
        Ok(Step::Next(next))
    }

    fn name(&self) -> String {
        self.next.name()
    }

    fn kind(&self) -> StateKind {
        StateKind::StandbyGuard
    }

    fn inner(&self) -> Option<&StateRef> {
        Some(&self.next)
    }
}

/// Suspended: sleeps while the predicate holds, then resumes via a guard.
pub struct StandbyState {
    next: StateRef,
    predicate: Predicate,
    timeout: Option<Duration>,
}

impl StandbyState {
    pub fn new(next: StateRef, predicate: Predicate) -> Self {
        Self {
            next,
            predicate,
            timeout: None,
        }
    }

    /// Poll interval while in standby; `None` uses the sleep policy default.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl State for StandbyState {
    fn invoke(&self, context: &Context) -> StateResult {
        if (self.predicate)(context) {
            return Ok(Step::Sleep(self.timeout));
        }

        Ok(Step::Next(Arc::new(
            StandbyGuard::new(Arc::clone(&self.next), Arc::clone(&self.predicate))
                .with_timeout(self.timeout),
        )))
    }

    fn name(&self) -> String {
        "standby".to_string()
    }

    fn kind(&self) -> StateKind {
        StateKind::Standby
    }

    fn inner(&self) -> Option<&StateRef> {
        Some(&self.next)
    }
}

/// Wrap `initial` so the worker starts in standby and pauses whenever
/// `predicate` holds.
pub fn standby(initial: StateRef, predicate: Predicate, timeout: Option<Duration>) -> StateRef {
    Arc::new(StandbyState::new(initial, predicate).with_timeout(timeout))
}
