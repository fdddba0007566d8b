//! Supervisor Layer for Multi-Process Workers
//!
//! This module provides the process supervision infrastructure:
//! - Signal coordination (graceful first, forced on repeat)
//! - Worker pool of re-executed OS processes
//! - Process supervisor tying pool, signals and health endpoint together

pub mod pool;
pub mod process;
pub mod signals;

pub use pool::{ProcessPool, WorkerExit, WorkerPool, WORKER_ENV};
pub use process::{ProcessSupervisor, Teardown, EXIT_FAILURE, EXIT_OK};
pub use signals::{
    install_worker_signal_handler, ShutdownCoordinator, ShutdownHandle, ShutdownSignal,
};
