//! Process Supervisor
//!
//! Owns the worker pool and the optional heartbeat aggregator, and turns
//! termination signals into a single orderly teardown.

use crate::config::{DaemonConfig, HealthCheck};
use crate::health::{HealthServer, HealthState};
use crate::supervisor::pool::{WorkerExit, WorkerPool};
use crate::supervisor::signals::{ShutdownCoordinator, ShutdownSignal};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Exit status for a graceful or clean stop
pub const EXIT_OK: i32 = 0;
/// Exit status for forced termination or failure
pub const EXIT_FAILURE: i32 = 1;

/// Teardown progress; each transition happens at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Running,
    Closing,
    Terminated,
}

enum Wake {
    WorkersExited(Vec<WorkerExit>),
    Shutdown(ShutdownSignal),
}

struct HealthTask {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct ProcessSupervisor<P: WorkerPool> {
    config: DaemonConfig,
    pool: P,
    teardown: Teardown,
}

impl<P: WorkerPool> ProcessSupervisor<P> {
    pub fn new(config: DaemonConfig, pool: P) -> Self {
        Self {
            config,
            pool,
            teardown: Teardown::Running,
        }
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn teardown(&self) -> Teardown {
        self.teardown
    }

    /// Run on a fresh runtime and end the process with the resulting status.
    pub fn run(mut self) -> ! {
        let code = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime.block_on(self.run_until_shutdown()),
            Err(e) => {
                error!("Failed to start supervisor runtime: {}", e);
                EXIT_FAILURE
            }
        };
        std::process::exit(code)
    }

    /// Install OS signal handlers and supervise until shutdown; returns the exit status.
    pub async fn run_until_shutdown(&mut self) -> i32 {
        let coordinator = ShutdownCoordinator::new();
        if let Err(e) = coordinator.install_signal_handlers() {
            error!("Failed to install signal handlers: {}", e);
            return EXIT_FAILURE;
        }
        self.run_with(coordinator).await
    }

    /// Supervise using an existing coordinator (direct requests or tests).
    pub async fn run_with(&mut self, mut coordinator: ShutdownCoordinator) -> i32 {
        let health = self.start_health_server();
        let processes = self.config.daemon.processes;

        let code = match self.pool.spawn(processes).await {
            Ok(()) => {
                info!(
                    "Supervising {} worker processes of {}",
                    processes, self.config.daemon.name
                );
                self.supervise(&mut coordinator).await
            }
            Err(e) => {
                error!("Failed to start worker pool: {}", e);
                self.force().await;
                EXIT_FAILURE
            }
        };

        if let Some(health) = health {
            let _ = health.stop.send(());
            if let Err(e) = health.task.await {
                warn!("Health server task failed: {}", e);
            }
        }

        info!("Supervisor exiting with status {}", code);
        code
    }

    async fn supervise(&mut self, coordinator: &mut ShutdownCoordinator) -> i32 {
        let wake = tokio::select! {
            exits = self.pool.join() => Wake::WorkersExited(exits),
            Some(signal) = coordinator.recv() => Wake::Shutdown(signal),
        };

        match wake {
            Wake::WorkersExited(exits) => {
                let failed = exits.iter().filter(|exit| !exit.success()).count();
                if failed == 0 {
                    info!("All {} workers exited cleanly", exits.len());
                    EXIT_OK
                } else {
                    error!("{} of {} workers exited with failure", failed, exits.len());
                    EXIT_FAILURE
                }
            }
            Wake::Shutdown(ShutdownSignal::Graceful) => self.graceful(coordinator).await,
            Wake::Shutdown(ShutdownSignal::Forced) => self.force().await,
        }
    }

    /// Close the pool and wait for workers; a further signal escalates.
    async fn graceful(&mut self, coordinator: &mut ShutdownCoordinator) -> i32 {
        info!("Graceful shutdown: waiting for in-flight iterations");
        self.close();

        let drained = tokio::select! {
            exits = self.pool.join() => Some(exits),
            Some(_) = coordinator.recv() => None,
        };

        match drained {
            Some(exits) => {
                info!("Worker pool drained ({} workers)", exits.len());
                EXIT_OK
            }
            None => {
                warn!("Shutdown signal received while draining, terminating workers");
                self.force().await
            }
        }
    }

    async fn force(&mut self) -> i32 {
        self.terminate();
        self.pool.join().await;
        EXIT_FAILURE
    }

    fn close(&mut self) {
        if self.teardown != Teardown::Running {
            return;
        }
        self.teardown = Teardown::Closing;
        if let Err(e) = self.pool.close() {
            warn!("Worker pool close failed: {}", e);
        }
    }

    fn terminate(&mut self) {
        if self.teardown == Teardown::Terminated {
            return;
        }
        self.teardown = Teardown::Terminated;
        warn!("Terminating worker pool");
        if let Err(e) = self.pool.terminate() {
            error!("Worker pool terminate failed: {}", e);
        }
    }

    fn start_health_server(&self) -> Option<HealthTask> {
        let HealthCheck::Enabled { threshold } = self.config.health.mode() else {
            info!("Heartbeat health checks disabled");
            return None;
        };

        let state = Arc::new(HealthState::new(self.config.daemon.processes, threshold));
        let server = HealthServer::new(
            state,
            self.config.health.host.clone(),
            self.config.health.port,
        );
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = stopped.await;
            };
            if let Err(e) = server.run(shutdown).await {
                error!("Health server failed: {}", e);
            }
        });

        Some(HealthTask { stop, task })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::health::HeartbeatClient;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::runtime::Handle;
    use tokio::sync::watch;

    /// Pool whose workers only exit when terminated (or when closed, if draining)
    struct RecordingPool {
        spawned: usize,
        closes: Arc<AtomicUsize>,
        terminates: Arc<AtomicUsize>,
        drain_on_close: bool,
        done: watch::Sender<bool>,
    }

    impl RecordingPool {
        fn new(drain_on_close: bool) -> Self {
            let (done, _) = watch::channel(false);
            Self {
                spawned: 0,
                closes: Arc::default(),
                terminates: Arc::default(),
                drain_on_close,
                done,
            }
        }
    }

    #[async_trait]
    impl WorkerPool for RecordingPool {
        async fn spawn(&mut self, count: usize) -> Result<()> {
            self.spawned += count;
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.drain_on_close {
                self.done.send_replace(true);
            }
            Ok(())
        }

        fn terminate(&mut self) -> Result<()> {
            self.terminates.fetch_add(1, Ordering::SeqCst);
            self.done.send_replace(true);
            Ok(())
        }

        async fn join(&mut self) -> Vec<WorkerExit> {
            let mut rx = self.done.subscribe();
            let _ = rx.wait_for(|done| *done).await;
            (0..self.spawned)
                .map(|index| WorkerExit {
                    index,
                    pid: None,
                    code: Some(0),
                })
                .collect()
        }

        fn pids(&self) -> Vec<u32> {
            Vec::new()
        }
    }

    fn config(processes: usize) -> DaemonConfig {
        let mut config = DaemonConfig::default();
        config.daemon.processes = processes;
        config
    }

    #[tokio::test]
    async fn test_graceful_shutdown_closes_once() {
        let pool = RecordingPool::new(true);
        let (closes, terminates) = (pool.closes.clone(), pool.terminates.clone());
        let mut supervisor = ProcessSupervisor::new(config(2), pool);

        let coordinator = ShutdownCoordinator::new();
        coordinator.handle().notify("SIGTERM");

        let code = supervisor.run_with(coordinator).await;
        assert_eq!(code, EXIT_OK);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(terminates.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.teardown(), Teardown::Closing);
        assert_eq!(supervisor.pool().spawned, 2);
    }

    #[tokio::test]
    async fn test_second_signal_promotes_to_terminate() {
        let pool = RecordingPool::new(false);
        let (closes, terminates) = (pool.closes.clone(), pool.terminates.clone());
        let mut supervisor = ProcessSupervisor::new(config(2), pool);

        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator.handle();
        handle.notify("SIGINT");
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.notify("SIGINT");
            handle.notify("SIGTERM");
        });

        let code = tokio::time::timeout(Duration::from_secs(5), supervisor.run_with(coordinator))
            .await
            .unwrap();
        assert_eq!(code, EXIT_FAILURE);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(terminates.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.teardown(), Teardown::Terminated);
    }

    #[tokio::test]
    async fn test_forced_request_terminates_without_close() {
        let pool = RecordingPool::new(false);
        let (closes, terminates) = (pool.closes.clone(), pool.terminates.clone());
        let mut supervisor = ProcessSupervisor::new(config(1), pool);

        let coordinator = ShutdownCoordinator::new();
        coordinator.handle().force();

        assert_eq!(supervisor.run_with(coordinator).await, EXIT_FAILURE);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
        assert_eq!(terminates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_workers_exiting_on_their_own() {
        let pool = RecordingPool::new(false);
        pool.done.send_replace(true);
        let mut supervisor = ProcessSupervisor::new(config(3), pool);

        let code = supervisor.run_with(ShutdownCoordinator::new()).await;
        assert_eq!(code, EXIT_OK);
        assert_eq!(supervisor.teardown(), Teardown::Running);
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_health_server_runs_until_shutdown() {
        let port = free_port();
        let mut config = config(1);
        config.health.heartbeat_threshold_secs = 5;
        config.health.host = "127.0.0.1".to_string();
        config.health.port = port;

        let mut supervisor = ProcessSupervisor::new(config, RecordingPool::new(true));
        let coordinator = ShutdownCoordinator::new();
        let handle = coordinator.handle();
        let running = tokio::spawn(async move {
            let code = supervisor.run_with(coordinator).await;
            (code, supervisor)
        });

        let base = format!("http://127.0.0.1:{}", port);
        let heartbeat =
            HeartbeatClient::new(format!("{}/heartbeat", base), Handle::current()).unwrap();
        let mut posted = None;
        for _ in 0..50 {
            match heartbeat.post().await {
                Ok(status) => {
                    posted = Some(status.as_u16());
                    break;
                }
                // Server task may not be listening yet
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
        assert_eq!(posted, Some(201));

        let response = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["heartbeats"][std::process::id().to_string()], 0);

        drop(heartbeat);
        handle.notify("SIGTERM");
        let (code, supervisor) = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(code, EXIT_OK);
        assert_eq!(supervisor.teardown(), Teardown::Closing);

        // The server task was awaited before run_with returned
        assert!(reqwest::get(format!("{}/health", base)).await.is_err());
    }
}
