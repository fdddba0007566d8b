use crate::engine::Context;
use crate::error::StateError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shared handle to a state. Repeating a state keeps the same allocation.
pub type StateRef = Arc<dyn State>;

/// Outcome of invoking a state
pub enum Step {
    /// Transition to another state
    Next(StateRef),
    /// Run the current state again
    Repeat,
    /// Pause, then retry the current state. `None` uses the sleep policy default.
    Sleep(Option<Duration>),
}

impl Step {
    pub fn next(state: StateRef) -> Self {
        Step::Next(state)
    }

    pub fn sleep_for(duration: Duration) -> Self {
        Step::Sleep(Some(duration))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Next(state) => write!(f, "Next({})", state.name()),
            Step::Repeat => write!(f, "Repeat"),
            Step::Sleep(duration) => write!(f, "Sleep({:?})", duration),
        }
    }
}

pub type StateResult = Result<Step, StateError>;

/// Structural role of a state, used for logging and inspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Plain,
    StandbyGuard,
    Standby,
}

/// A unit of work invoked once per scheduler iteration.
pub trait State: Send + Sync {
    fn invoke(&self, context: &Context) -> StateResult;

    /// Label used in logs.
    fn name(&self) -> String {
        std::any::type_name::<Self>()
            .rsplit("::")
            .next()
            .unwrap_or("state")
            .to_string()
    }

    fn kind(&self) -> StateKind {
        StateKind::Plain
    }

    /// The state wrapped by a composite state, if any.
    fn inner(&self) -> Option<&StateRef> {
        None
    }
}

impl fmt::Debug for dyn State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

impl fmt::Display for dyn State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Plain state backed by a closure
struct FnState<F> {
    name: String,
    func: F,
}

impl<F> State for FnState<F>
where
    F: Fn(&Context) -> StateResult + Send + Sync,
{
    fn invoke(&self, context: &Context) -> StateResult {
        (self.func)(context)
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Wrap a closure as a named plain state.
pub fn state_fn<F>(name: impl Into<String>, func: F) -> StateRef
where
    F: Fn(&Context) -> StateResult + Send + Sync + 'static,
{
    Arc::new(FnState {
        name: name.into(),
        func,
    })
}
