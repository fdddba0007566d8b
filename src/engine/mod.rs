//! State Machine Engine
//!
//! The per-worker scheduler and the policies that scope each iteration:
//! - State / Step contract and the collaborator context
//! - Error policy (capture, strictness, health reporting cadence)
//! - Sleep policy (explicit pause requests)
//! - Standby gate (conditional suspension by state composition)

pub mod context;
pub mod error_policy;
pub mod sleep_policy;
pub mod standby;
pub mod state;
pub mod state_machine;

pub use context::{Context, ContextBuilder, ContextFactory, StopFlag};
pub use error_policy::{CapturedError, ErrorPolicy};
pub use sleep_policy::{SleepPolicy, Sleeper, ThreadSleeper};
pub use standby::{standby, Predicate, StandbyGuard, StandbyState};
pub use state::{state_fn, State, StateKind, StateRef, StateResult, Step};
pub use state_machine::StateMachine;
