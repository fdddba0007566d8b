//! Worker Pool
//!
//! The set of worker processes owned by the supervisor. [`ProcessPool`]
//! re-executes the current binary once per worker with [`WORKER_ENV`] set, so
//! the same `main` runs the state machine instead of the supervisor.

use crate::error::{DaemonError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Environment variable carrying the worker index into a worker process
pub const WORKER_ENV: &str = "WORKER_DAEMON_INDEX";

/// How a worker process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub index: usize,
    pub pid: Option<u32>,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn from_status(index: usize, pid: Option<u32>, status: &ExitStatus) -> Self {
        Self {
            index,
            pid,
            code: status.code(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Pool of worker processes.
///
/// `close` asks workers to finish their current iteration and exit;
/// `terminate` kills them. `join` waits for every worker and must be safe to
/// cancel and call again.
#[async_trait]
pub trait WorkerPool: Send {
    async fn spawn(&mut self, count: usize) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    fn terminate(&mut self) -> Result<()>;

    async fn join(&mut self) -> Vec<WorkerExit>;

    fn pids(&self) -> Vec<u32>;
}

struct Worker {
    index: usize,
    pid: Option<u32>,
    child: Child,
}

/// OS-process implementation of [`WorkerPool`]
pub struct ProcessPool {
    program: PathBuf,
    args: Vec<OsString>,
    workers: Vec<Worker>,
    exits: Vec<WorkerExit>,
}

impl ProcessPool {
    /// Re-execute the current binary with the current arguments.
    pub fn current_exe() -> Result<Self> {
        Ok(Self::with_command(
            std::env::current_exe()?,
            std::env::args_os().skip(1),
        ))
    }

    pub fn with_command<I>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            workers: Vec::new(),
            exits: Vec::new(),
        }
    }

    pub fn live_workers(&self) -> usize {
        self.workers.len()
    }
}

#[async_trait]
impl WorkerPool for ProcessPool {
    async fn spawn(&mut self, count: usize) -> Result<()> {
        let start = self.workers.len() + self.exits.len();
        for index in start..start + count {
            let child = Command::new(&self.program)
                .args(&self.args)
                .env(WORKER_ENV, index.to_string())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| DaemonError::Spawn {
                    index,
                    reason: e.to_string(),
                })?;

            let pid = child.id();
            debug!("Spawned worker {} (pid {:?})", index, pid);
            self.workers.push(Worker { index, pid, child });
        }
        info!("Worker pool running {} processes", self.workers.len());
        Ok(())
    }

    #[cfg(unix)]
    fn close(&mut self) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let mut first_error = None;
        for worker in &self.workers {
            let Some(pid) = worker.pid else { continue };
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("Failed to send SIGTERM to worker {}: {}", pid, e);
                first_error.get_or_insert(DaemonError::Signal {
                    pid,
                    reason: e.to_string(),
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    #[cfg(not(unix))]
    fn close(&mut self) -> Result<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        for worker in &mut self.workers {
            if let Err(e) = worker.child.start_kill() {
                // Already exited; join will reap it
                debug!("Failed to kill worker {:?}: {}", worker.pid, e);
            }
        }
        Ok(())
    }

    async fn join(&mut self) -> Vec<WorkerExit> {
        while let Some(worker) = self.workers.first_mut() {
            let exit = match worker.child.wait().await {
                Ok(status) => WorkerExit::from_status(worker.index, worker.pid, &status),
                Err(e) => {
                    warn!("Failed to wait for worker {:?}: {}", worker.pid, e);
                    WorkerExit {
                        index: worker.index,
                        pid: worker.pid,
                        code: None,
                    }
                }
            };
            debug!("Worker {} exited with {:?}", exit.index, exit.code);
            self.workers.remove(0);
            self.exits.push(exit);
        }
        self.exits.clone()
    }

    fn pids(&self) -> Vec<u32> {
        self.workers.iter().filter_map(|worker| worker.pid).collect()
    }
}
