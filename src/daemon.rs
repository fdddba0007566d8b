//! Daemon entry points
//!
//! An application implements [`Daemon`] and calls [`run_daemon`] from `main`.
//! With one process the state machine runs in place; with more, the process
//! becomes the supervisor and re-executes itself once per worker.

use crate::config::DaemonConfig;
use crate::engine::{
    standby, Context, ContextBuilder, ContextFactory, Predicate, StateMachine, StateRef, StopFlag,
};
use crate::error::{DaemonError, Result, StateError};
use crate::health::HealthReporter;
use crate::logging::init_logging;
use crate::supervisor::{
    install_worker_signal_handler, ProcessPool, ProcessSupervisor, EXIT_FAILURE, EXIT_OK,
    WORKER_ENV,
};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, info};

/// A long-running worker defined by its initial state.
pub trait Daemon: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Initial state, built once the worker context exists.
    fn initial_state(&self, context: &Context) -> StateRef;

    /// Register application collaborators on the worker context.
    fn configure(&self, builder: ContextBuilder) -> Result<ContextBuilder> {
        Ok(builder)
    }

    /// When set, the worker starts in standby and pauses while this holds.
    fn standby_condition(&self) -> Option<Predicate> {
        None
    }
}

/// Re-reads configuration when the worker context is rebuilt.
pub type ConfigLoader = Arc<dyn Fn() -> Result<DaemonConfig> + Send + Sync>;

/// Command-line flags shared by daemon binaries
#[derive(Debug, Clone, Args)]
pub struct DaemonArgs {
    /// Number of worker processes (overrides config)
    #[arg(long, env = "DAEMON_PROCESSES")]
    pub processes: Option<usize>,

    /// Directory holding default.toml and per-environment overrides
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Debug logging and context reload on state transitions
    #[arg(long, conflicts_with = "testing")]
    pub debug: bool,

    /// Disable heartbeats to the health endpoint
    #[arg(long)]
    pub testing: bool,
}

impl DaemonArgs {
    /// Load config from `config_dir` and apply flag overrides.
    pub fn load_config(&self) -> Result<DaemonConfig> {
        let mut config = DaemonConfig::load_from(&self.config_dir)?;
        self.apply(&mut config);
        config.validate().map_err(DaemonError::InvalidConfig)?;
        Ok(config)
    }

    /// Loader that re-reads `config_dir` and re-applies these flags.
    pub fn loader(&self) -> ConfigLoader {
        let args = self.clone();
        Arc::new(move || args.load_config())
    }

    pub fn apply(&self, config: &mut DaemonConfig) {
        if let Some(processes) = self.processes {
            config.daemon.processes = processes;
        }
        if self.debug {
            config.logging.level = "debug".to_string();
            config.daemon.reload = true;
        }
        if self.testing {
            config.health_reporter.enabled = false;
        }
    }
}

/// Run `daemon` as configured by `args`; never returns.
pub fn run_daemon<D: Daemon>(daemon: D, args: &DaemonArgs) -> ! {
    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };
    init_logging(&config.logging);

    let worker_index = std::env::var(WORKER_ENV).ok();
    if worker_index.is_some() || config.daemon.processes == 1 {
        info!(
            "Starting daemon {} (worker {})",
            daemon.name(),
            worker_index.as_deref().unwrap_or("0")
        );
        std::process::exit(run_worker(Arc::new(daemon), config, args.loader()));
    }

    let pool = match ProcessPool::current_exe() {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to prepare worker pool: {}", e);
            std::process::exit(EXIT_FAILURE);
        }
    };
    ProcessSupervisor::new(config, pool).run()
}

/// Run one worker's state machine to completion and return its exit status.
pub fn run_worker<D: Daemon>(daemon: Arc<D>, config: DaemonConfig, loader: ConfigLoader) -> i32 {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start worker runtime: {}", e);
            return EXIT_FAILURE;
        }
    };

    runtime.block_on(async move {
        let stop = StopFlag::new();
        if let Err(e) = install_worker_signal_handler(stop.clone()) {
            error!("Failed to install signal handlers: {}", e);
            return EXIT_FAILURE;
        }

        let handle = Some(Handle::current());
        let mut machine = match build_state_machine(daemon.as_ref(), config, loader, stop, handle) {
            Ok(machine) => machine,
            Err(e) => {
                error!("Failed to build worker context: {}", e);
                return EXIT_FAILURE;
            }
        };

        match tokio::task::spawn_blocking(move || machine.run()).await {
            Ok(result) => exit_status(result),
            Err(e) => {
                error!("State machine thread failed: {}", e);
                EXIT_FAILURE
            }
        }
    })
}

/// Map the state machine outcome to a process exit status.
pub fn exit_status(result: std::result::Result<(), StateError>) -> i32 {
    match result {
        Ok(()) => EXIT_OK,
        Err(StateError::Exit(reason)) => {
            info!("State machine exited: {}", reason);
            EXIT_OK
        }
        Err(e) => {
            error!("State machine terminated: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Build the worker context from config plus the daemon's collaborators.
pub fn build_context<D: Daemon>(
    daemon: &D,
    config: &DaemonConfig,
    stop: StopFlag,
    handle: Option<Handle>,
) -> Result<Context> {
    let reporter = HealthReporter::from_config(&config.health_reporter, handle)?;
    let builder = ContextBuilder::new(daemon.name())
        .config(config.clone())
        .health_reporter(Arc::new(reporter))
        .stop_flag(stop);
    daemon.configure(builder)?.build()
}

/// Rebuild `previous` from freshly loaded config. Application collaborators
/// and health history carry over; policies and the reporter follow the config.
pub fn reload_context(
    previous: &Context,
    config: DaemonConfig,
    handle: Option<Handle>,
) -> Result<Context> {
    let reporter = HealthReporter::from_config(&config.health_reporter, handle)?;
    ContextBuilder::reloading(previous)
        .config(config)
        .health_reporter(Arc::new(reporter))
        .build()
}

/// Context, initial state (standby-wrapped if requested) and reload wiring.
///
/// With `daemon.reload` set, every transition of the work state re-reads
/// configuration through `loader`.
pub fn build_state_machine<D: Daemon>(
    daemon: &D,
    config: DaemonConfig,
    loader: ConfigLoader,
    stop: StopFlag,
    handle: Option<Handle>,
) -> Result<StateMachine> {
    let context = build_context(daemon, &config, stop, handle.clone())?;

    let mut initial = daemon.initial_state(&context);
    if let Some(predicate) = daemon.standby_condition() {
        initial = standby(initial, predicate, config.standby.poll_timeout());
    }

    let machine = StateMachine::new(context, initial);
    if !config.daemon.reload {
        return Ok(machine);
    }

    let factory: ContextFactory =
        Arc::new(move |previous: &Context| reload_context(previous, loader()?, handle.clone()));
    Ok(machine.with_reload(factory))
}
