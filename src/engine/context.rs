//! Collaborator bundle handed to every state invocation.

use crate::config::DaemonConfig;
use crate::engine::error_policy::HealthHistory;
use crate::engine::{ErrorPolicy, SleepPolicy};
use crate::health::{HealthReporter, ReportHealth};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Rebuilds a worker's context on reload from the one currently in use.
pub type ContextFactory = Arc<dyn Fn(&Context) -> crate::Result<Context> + Send + Sync>;

/// Set by the worker signal handler; the state machine stops between iterations.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Named collaborators for one worker process.
///
/// Immutable once built. Collaborators that need mutable state (the error
/// policy, application services) synchronize internally.
pub struct Context {
    name: String,
    config: Arc<DaemonConfig>,
    sleep_policy: Arc<SleepPolicy>,
    error_policy: Arc<ErrorPolicy>,
    health_reporter: Arc<dyn ReportHealth>,
    stop: StopFlag,
    extensions: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn builder(name: impl Into<String>) -> ContextBuilder {
        ContextBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn sleep_policy(&self) -> &SleepPolicy {
        &self.sleep_policy
    }

    pub fn error_policy(&self) -> &ErrorPolicy {
        &self.error_policy
    }

    pub fn health_reporter(&self) -> &Arc<dyn ReportHealth> {
        &self.health_reporter
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop
    }

    /// Look up an application collaborator by name and type.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.extensions
            .get(name)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extensions.contains_key(name)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.extensions.keys().collect();
        names.sort();
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("extensions", &names)
            .finish()
    }
}

/// Assembles a [`Context`]; policies left unset are derived from the config.
pub struct ContextBuilder {
    name: String,
    config: DaemonConfig,
    sleep_policy: Option<SleepPolicy>,
    error_policy: Option<ErrorPolicy>,
    health_reporter: Option<Arc<dyn ReportHealth>>,
    stop: StopFlag,
    extensions: HashMap<String, Arc<dyn Any + Send + Sync>>,
    history: Option<HealthHistory>,
}

impl ContextBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: DaemonConfig::default(),
            sleep_policy: None,
            error_policy: None,
            health_reporter: None,
            stop: StopFlag::new(),
            extensions: HashMap::new(),
            history: None,
        }
    }

    /// Start a rebuild of `previous`: the name, stop flag, application
    /// collaborators and health history carry over. Config-derived policies
    /// are rebuilt from whatever config is set next.
    pub fn reloading(previous: &Context) -> Self {
        Self {
            stop: previous.stop.clone(),
            extensions: previous.extensions.clone(),
            history: Some(previous.error_policy.history()),
            ..Self::new(previous.name.clone())
        }
    }

    /// Default configuration and a reporter that only logs.
    pub fn for_testing() -> Self {
        Self::new("test")
    }

    pub fn config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sleep_policy(mut self, policy: SleepPolicy) -> Self {
        self.sleep_policy = Some(policy);
        self
    }

    /// Overrides the config-derived error policy, including its reporter.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn health_reporter(mut self, reporter: Arc<dyn ReportHealth>) -> Self {
        self.health_reporter = Some(reporter);
        self
    }

    pub fn stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    /// Register an application collaborator under `name`.
    pub fn with<T: Any + Send + Sync>(mut self, name: impl Into<String>, value: T) -> Self {
        self.extensions.insert(name.into(), Arc::new(value));
        self
    }

    pub fn build(self) -> crate::Result<Context> {
        if let Err(errors) = self.config.validate() {
            return Err(crate::DaemonError::InvalidConfig(errors));
        }

        let health_reporter = self
            .health_reporter
            .unwrap_or_else(|| Arc::new(HealthReporter::new()));

        let sleep_policy = self
            .sleep_policy
            .unwrap_or_else(|| SleepPolicy::from_config(&self.config.sleep_policy));

        let mut error_policy = self.error_policy.unwrap_or_else(|| {
            ErrorPolicy::from_config(&self.config.error_policy, Arc::clone(&health_reporter))
        });
        if let Some(history) = self.history {
            error_policy = error_policy.with_history(history);
        }

        Ok(Context {
            name: self.name,
            config: Arc::new(self.config),
            sleep_policy: Arc::new(sleep_policy),
            error_policy: Arc::new(error_policy),
            health_reporter,
            stop: self.stop,
            extensions: self.extensions,
        })
    }
}
