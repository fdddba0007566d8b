//! Sleep Policy
//!
//! Turns an explicit [`Step::Sleep`] request into a blocking wait. This is the
//! only place the scheduler loop is allowed to block.

use crate::config::SleepPolicyConfig;
use crate::engine::{StateResult, Step};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Blocking wait primitive, swappable in tests.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct SleepPolicy {
    default_timeout: Duration,
    sleeper: Arc<dyn Sleeper>,
}

impl SleepPolicy {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn from_config(config: &SleepPolicyConfig) -> Self {
        Self::new(config.default_timeout())
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn sleep(&self, duration: Duration) {
        self.sleeper.sleep(duration);
    }

    /// Run `f`; a sleep request is served here and turned into a repeat.
    /// Errors and other steps pass through untouched.
    pub fn scope<F>(&self, f: F) -> StateResult
    where
        F: FnOnce() -> StateResult,
    {
        match f() {
            Ok(Step::Sleep(requested)) => {
                let duration = requested.unwrap_or(self.default_timeout);
                debug!("Sleeping for {:?}", duration);
                self.sleep(duration);
                Ok(Step::Repeat)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for SleepPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SleepPolicy")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
