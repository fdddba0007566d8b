//! Worker-side health reporting.

use crate::config::HealthReporterConfig;
use crate::engine::CapturedError;
use crate::error::ErrorKind;
use crate::health::HeartbeatRequest;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Nagios-style health codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthCode {
    Ok = 0,
    /// Reserved for collaborator-reported conditions; never computed by the error policy
    Warn = 1,
    Error = 2,
}

impl std::fmt::Display for HealthCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthCode::Ok => write!(f, "OK"),
            HealthCode::Warn => write!(f, "WARN"),
            HealthCode::Error => write!(f, "ERROR"),
        }
    }
}

/// One health report emitted at an error policy scope exit
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub health: HealthCode,
    pub previous: HealthCode,
    pub errors: Vec<CapturedError>,
}

impl HealthReport {
    pub fn changed(&self) -> bool {
        self.health != self.previous
    }
}

/// Receives health reports from the error policy.
pub trait ReportHealth: Send + Sync {
    fn report(&self, report: &HealthReport);
}

/// Fire-and-forget heartbeat poster
#[derive(Debug, Clone)]
pub struct HeartbeatClient {
    client: reqwest::Client,
    url: String,
    pid: u32,
    handle: Handle,
}

impl HeartbeatClient {
    pub fn new(url: impl Into<String>, handle: Handle) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
            pid: std::process::id(),
            handle,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post a heartbeat in the background. Failures are logged at debug.
    pub fn send(&self) {
        let client = self.clone();
        self.handle.spawn(async move {
            match client.post().await {
                Ok(status) if status.is_success() => debug!("Heartbeat sent ({})", status),
                Ok(status) => debug!("Heartbeat rejected: {}", status),
                Err(e) => debug!("Failed to send heartbeat: {}", e),
            }
        });
    }

    /// Post a heartbeat and wait for the response status.
    pub async fn post(&self) -> crate::Result<StatusCode> {
        let response = self
            .client
            .post(&self.url)
            .json(&HeartbeatRequest {
                pid: Some(i64::from(self.pid)),
            })
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Logs health transitions and pushes a heartbeat on every report.
#[derive(Debug, Default)]
pub struct HealthReporter {
    heartbeat: Option<HeartbeatClient>,
}

impl HealthReporter {
    /// A reporter that only logs
    pub fn new() -> Self {
        Self { heartbeat: None }
    }

    pub fn with_heartbeat(mut self, client: HeartbeatClient) -> Self {
        self.heartbeat = Some(client);
        self
    }

    /// Heartbeats need a runtime to post from; without one the reporter only logs.
    pub fn from_config(
        config: &HealthReporterConfig,
        handle: Option<Handle>,
    ) -> crate::Result<Self> {
        match handle {
            Some(handle) if config.enabled => Ok(Self::new()
                .with_heartbeat(HeartbeatClient::new(config.heartbeat_url(), handle)?)),
            _ => Ok(Self::new()),
        }
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatClient> {
        self.heartbeat.as_ref()
    }
}

impl ReportHealth for HealthReporter {
    fn report(&self, report: &HealthReport) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.send();
        }

        if report.changed() {
            info!("Health is {}", report.health);
        } else {
            debug!("Health is {}", report.health);
        }

        for error in report
            .errors
            .iter()
            .filter(|error| error.kind != ErrorKind::Exit)
        {
            warn!("Caught error during state evaluation: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_code_display() {
        assert_eq!(HealthCode::Ok.to_string(), "OK");
        assert_eq!(HealthCode::Warn.to_string(), "WARN");
        assert_eq!(HealthCode::Error.to_string(), "ERROR");
        assert_eq!(HealthCode::Error as i32, 2);
    }

    #[test]
    fn test_from_config_without_runtime_only_logs() {
        let reporter = HealthReporter::from_config(&HealthReporterConfig::default(), None).unwrap();
        assert!(reporter.heartbeat().is_none());

        // Logging-only reports never panic
        reporter.report(&HealthReport {
            health: HealthCode::Error,
            previous: HealthCode::Ok,
            errors: vec![CapturedError {
                kind: ErrorKind::Recoverable,
                message: "boom".into(),
            }],
        });
    }

    #[tokio::test]
    async fn test_from_config_with_runtime_posts_heartbeats() {
        let config = HealthReporterConfig {
            enabled: true,
            server_host: "http://127.0.0.1".into(),
            server_port: 9,
        };
        let reporter = HealthReporter::from_config(&config, Some(Handle::current())).unwrap();
        let heartbeat = reporter.heartbeat().unwrap();
        assert_eq!(heartbeat.url(), "http://127.0.0.1:9/heartbeat");

        // Nothing listens on the discard port; the failure is swallowed
        reporter.report(&HealthReport {
            health: HealthCode::Ok,
            previous: HealthCode::Ok,
            errors: Vec::new(),
        });
    }

    #[tokio::test]
    async fn test_disabled_reporter_config() {
        let config = HealthReporterConfig {
            enabled: false,
            ..HealthReporterConfig::default()
        };
        let reporter = HealthReporter::from_config(&config, Some(Handle::current())).unwrap();
        assert!(reporter.heartbeat().is_none());
    }
}
