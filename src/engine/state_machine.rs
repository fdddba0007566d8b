//! State Machine
//!
//! Invokes the current state once per iteration inside the error policy and
//! sleep policy scopes. There is no terminal state: the loop ends on a stop
//! request from the worker signal handler or on a fatal/exit error.

use crate::engine::{Context, ContextFactory, StateRef, Step};
use crate::error::StateError;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

pub struct StateMachine {
    context: Context,
    current: StateRef,
    reload: Option<ContextFactory>,
}

impl StateMachine {
    /// A machine that never reloads its context.
    pub fn new(context: Context, initial_state: StateRef) -> Self {
        Self {
            context,
            current: initial_state,
            reload: None,
        }
    }

    /// Rebuild the context through `factory` after every state transition.
    pub fn with_reload(mut self, factory: ContextFactory) -> Self {
        self.reload = Some(factory);
        self
    }

    pub fn never_reload(&self) -> bool {
        self.reload.is_none()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn current_state(&self) -> &StateRef {
        &self.current
    }

    /// Run one iteration and return the state the next iteration will use.
    pub fn step(&mut self) -> Result<StateRef, StateError> {
        let state = Arc::clone(&self.current);
        let context = &self.context;
        let step = context
            .error_policy()
            .scope(|| context.sleep_policy().scope(|| state.invoke(context)))?;

        match step {
            Step::Next(next) if !Arc::ptr_eq(&next, &self.current) => {
                // Standby wrappers re-wrap the same work state on every flip
                let transitioned = !Arc::ptr_eq(innermost(&next), innermost(&self.current));
                if transitioned {
                    debug!(from = %self.current, to = %next, "State transition");
                } else {
                    trace!(
                        from = ?self.current.kind(),
                        to = ?next.kind(),
                        state = %next,
                        "Wrapper change"
                    );
                }
                self.current = next;
                if transitioned {
                    self.maybe_reload();
                }
            }
            Step::Next(_) | Step::Repeat | Step::Sleep(_) => {}
        }

        Ok(Arc::clone(&self.current))
    }

    /// Alias of [`StateMachine::step`].
    pub fn advance(&mut self) -> Result<StateRef, StateError> {
        self.step()
    }

    /// Step until a stop is requested (`Ok`) or an error propagates.
    pub fn run(&mut self) -> Result<(), StateError> {
        info!(
            daemon = %self.context.name(),
            state = %self.current,
            "Starting state machine"
        );

        loop {
            if self.context.stop_flag().is_raised() {
                info!(daemon = %self.context.name(), "Stop requested, leaving state machine");
                return Ok(());
            }
            self.step()?;
        }
    }

    fn maybe_reload(&mut self) {
        let Some(factory) = &self.reload else {
            return;
        };

        match factory(&self.context) {
            Ok(context) => {
                debug!(daemon = %context.name(), "Context reloaded");
                self.context = context;
            }
            Err(e) => warn!("Context reload failed, keeping previous context: {}", e),
        }
    }
}

/// The state doing the work, with composite wrappers peeled off.
fn innermost(state: &StateRef) -> &StateRef {
    let mut current = state;
    while let Some(inner) = current.inner() {
        current = inner;
    }
    current
}
