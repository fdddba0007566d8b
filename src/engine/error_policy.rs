//! Error Policy
//!
//! Scopes one scheduler iteration: captures whatever the state raised,
//! decides whether it propagates, and reports health when it changes or when
//! the report interval elapses.

use crate::config::ErrorPolicyConfig;
use crate::engine::{StateResult, Step};
use crate::error::{ErrorKind, StateError};
use crate::health::{HealthCode, HealthReport, ReportHealth};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A failure recorded during one iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&StateError> for CapturedError {
    fn from(err: &StateError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for CapturedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

/// Health state carried from one policy to its replacement on reload
#[derive(Debug, Clone, Copy)]
pub(crate) struct HealthHistory {
    health: HealthCode,
    last_report: Option<Instant>,
}

#[derive(Debug)]
struct PolicyState {
    errors: Vec<CapturedError>,
    health: HealthCode,
    last_report: Option<Instant>,
}

pub struct ErrorPolicy {
    strict: bool,
    health_report_interval: Duration,
    reporter: Arc<dyn ReportHealth>,
    state: Mutex<PolicyState>,
}

impl ErrorPolicy {
    pub fn new(
        strict: bool,
        health_report_interval: Duration,
        reporter: Arc<dyn ReportHealth>,
    ) -> Self {
        Self {
            strict,
            health_report_interval,
            reporter,
            state: Mutex::new(PolicyState {
                errors: Vec::new(),
                health: HealthCode::Ok,
                last_report: None,
            }),
        }
    }

    pub fn from_config(config: &ErrorPolicyConfig, reporter: Arc<dyn ReportHealth>) -> Self {
        Self::new(config.strict, config.health_report_interval(), reporter)
    }

    pub(crate) fn history(&self) -> HealthHistory {
        let state = self.lock();
        HealthHistory {
            health: state.health,
            last_report: state.last_report,
        }
    }

    pub(crate) fn with_history(self, history: HealthHistory) -> Self {
        {
            let mut state = self.lock();
            state.health = history.health;
            state.last_report = history.last_report;
        }
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn health_report_interval(&self) -> Duration {
        self.health_report_interval
    }

    /// Errors captured by the most recent scope.
    pub fn errors(&self) -> Vec<CapturedError> {
        self.lock().errors.clone()
    }

    /// Health computed at the most recent scope exit.
    pub fn health(&self) -> HealthCode {
        self.lock().health
    }

    /// Run `f` as one iteration. Panics are captured like recoverable errors.
    ///
    /// Recoverable errors are swallowed (yielding [`Step::Repeat`]) unless the
    /// policy is strict; fatal and exit errors always propagate.
    pub fn scope<F>(&self, f: F) -> StateResult
    where
        F: FnOnce() -> StateResult,
    {
        self.enter();
        let result = match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(payload) => Err(StateError::Panicked(panic_message(payload))),
        };
        self.exit(result)
    }

    fn enter(&self) {
        self.lock().errors.clear();
    }

    fn exit(&self, result: StateResult) -> StateResult {
        let outcome = match result {
            Ok(step) => Ok(step),
            Err(err) => {
                self.lock().errors.push(CapturedError::from(&err));
                if err.is_terminal() || self.strict {
                    Err(err)
                } else {
                    Ok(Step::Repeat)
                }
            }
        };
        self.maybe_report_health();
        outcome
    }

    fn compute_health(errors: &[CapturedError]) -> HealthCode {
        if errors.is_empty() {
            HealthCode::Ok
        } else {
            HealthCode::Error
        }
    }

    fn maybe_report_health(&self) {
        let report = {
            let mut state = self.lock();
            let new_health = Self::compute_health(&state.errors);
            let due = match state.last_report {
                None => true,
                Some(at) => at.elapsed() > self.health_report_interval,
            };
            let report = (state.health != new_health || due).then(|| HealthReport {
                health: new_health,
                previous: state.health,
                errors: state.errors.clone(),
            });
            if report.is_some() {
                state.last_report = Some(Instant::now());
            }
            state.health = new_health;
            report
        };

        // Report outside the lock so the reporter may inspect the policy
        if let Some(report) = report {
            self.reporter.report(&report);
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorPolicy")
            .field("strict", &self.strict)
            .field("health_report_interval", &self.health_report_interval)
            .field("state", &*self.lock())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
