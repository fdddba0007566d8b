use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DaemonConfig {
    #[serde(default)]
    pub daemon: ProcessConfig,
    #[serde(default)]
    pub error_policy: ErrorPolicyConfig,
    #[serde(default)]
    pub sleep_policy: SleepPolicyConfig,
    #[serde(default)]
    pub health: HealthCheckConfig,
    #[serde(default)]
    pub health_reporter: HealthReporterConfig,
    #[serde(default)]
    pub standby: StandbyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    /// Daemon name, used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Number of worker processes (1 = run in the current process)
    #[serde(default = "default_processes")]
    pub processes: usize,
    /// Rebuild the worker context after every state transition
    #[serde(default)]
    pub reload: bool,
}

fn default_name() -> String {
    "daemon".to_string()
}

fn default_processes() -> usize {
    1
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            processes: default_processes(),
            reload: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPolicyConfig {
    /// Re-raise every state error instead of recording it
    #[serde(default)]
    pub strict: bool,
    /// Seconds between health reports when health is unchanged
    #[serde(default = "default_health_report_interval")]
    pub health_report_interval_secs: f64,
}

fn default_health_report_interval() -> f64 {
    3.0
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            strict: false,
            health_report_interval_secs: default_health_report_interval(),
        }
    }
}

impl ErrorPolicyConfig {
    pub fn health_report_interval(&self) -> Duration {
        Duration::from_secs_f64(self.health_report_interval_secs.max(0.0))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SleepPolicyConfig {
    /// Seconds to sleep when a state asks to sleep without a duration
    #[serde(default = "default_sleep_timeout")]
    pub default_timeout_secs: f64,
}

fn default_sleep_timeout() -> f64 {
    1.0
}

impl Default for SleepPolicyConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_sleep_timeout(),
        }
    }
}

impl SleepPolicyConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.default_timeout_secs.max(0.0))
    }
}

/// Health aggregation settings for the supervisor
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Maximum heartbeat age in seconds; negative disables the health endpoint
    #[serde(default = "default_heartbeat_threshold")]
    pub heartbeat_threshold_secs: i64,
    #[serde(default = "default_health_host")]
    pub host: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_heartbeat_threshold() -> i64 {
    -1
}

fn default_health_host() -> String {
    "0.0.0.0".to_string()
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            heartbeat_threshold_secs: default_heartbeat_threshold(),
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

/// Whether the supervisor aggregates worker heartbeats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    Disabled,
    Enabled { threshold: Duration },
}

impl HealthCheckConfig {
    pub fn mode(&self) -> HealthCheck {
        if self.heartbeat_threshold_secs < 0 {
            HealthCheck::Disabled
        } else {
            HealthCheck::Enabled {
                threshold: Duration::from_secs(self.heartbeat_threshold_secs as u64),
            }
        }
    }
}

/// Where workers send heartbeats
#[derive(Debug, Clone, Deserialize)]
pub struct HealthReporterConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reporter_host")]
    pub server_host: String,
    #[serde(default = "default_health_port")]
    pub server_port: u16,
}

fn default_true() -> bool {
    true
}

fn default_reporter_host() -> String {
    "http://localhost".to_string()
}

impl Default for HealthReporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_host: default_reporter_host(),
            server_port: default_health_port(),
        }
    }
}

impl HealthReporterConfig {
    pub fn heartbeat_url(&self) -> String {
        format!(
            "{}:{}/heartbeat",
            self.server_host.trim_end_matches('/'),
            self.server_port
        )
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StandbyConfig {
    /// Seconds between standby predicate checks (unset = sleep policy default)
    #[serde(default)]
    pub poll_timeout_secs: Option<f64>,
}

impl StandbyConfig {
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_secs
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a specific directory, then the environment
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("DAEMON_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Environment overrides (DAEMON_HEALTH__PORT, etc.)
            .add_source(
                Environment::with_prefix("DAEMON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.daemon.processes < 1 {
            errors.push("processes must be positive".to_string());
        }

        if self.error_policy.health_report_interval_secs < 0.0 {
            errors.push("health_report_interval_secs must not be negative".to_string());
        }

        if self.sleep_policy.default_timeout_secs < 0.0 {
            errors.push("default_timeout_secs must not be negative".to_string());
        }

        if matches!(self.standby.poll_timeout_secs, Some(secs) if secs < 0.0) {
            errors.push("standby poll_timeout_secs must not be negative".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
