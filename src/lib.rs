pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod health;
pub mod logging;
pub mod supervisor;

pub use config::{DaemonConfig, HealthCheck};
pub use daemon::{run_daemon, run_worker, ConfigLoader, Daemon, DaemonArgs};
pub use engine::{
    standby, state_fn, Context, ContextBuilder, ErrorPolicy, Predicate, SleepPolicy, Sleeper,
    StandbyGuard, StandbyState, State, StateKind, StateMachine, StateRef, StateResult, Step,
    StopFlag,
};
pub use error::{DaemonError, ErrorKind, Result, StateError};
pub use health::{
    HealthCode, HealthReport, HealthReporter, HealthServer, HealthState, HeartbeatClient,
    HeartbeatTable, ReportHealth,
};
pub use supervisor::{
    ProcessPool, ProcessSupervisor, ShutdownCoordinator, ShutdownSignal, WorkerPool,
};
