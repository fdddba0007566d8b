use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;
use worker_daemon::{
    run_daemon, state_fn, Context, ContextBuilder, Daemon, DaemonArgs, Predicate, StateError,
    StateRef, Step,
};

#[derive(Parser)]
#[command(name = "worker-daemon")]
#[command(version = "0.1.0")]
#[command(about = "Ticker daemon running on the worker daemon engine", long_about = None)]
struct Cli {
    #[command(flatten)]
    daemon: DaemonArgs,

    /// Stay in standby while this file exists
    #[arg(long, env = "TICKER_PAUSE_FILE")]
    pause_file: Option<PathBuf>,

    /// Stop cleanly after this many ticks
    #[arg(long)]
    max_ticks: Option<u64>,
}

struct Ticker {
    pause_file: Option<PathBuf>,
    max_ticks: Option<u64>,
}

impl Daemon for Ticker {
    fn name(&self) -> &str {
        "ticker"
    }

    fn initial_state(&self, _context: &Context) -> StateRef {
        let max_ticks = self.max_ticks;
        state_fn("tick", move |ctx| {
            let ticks = ctx
                .get::<AtomicU64>("ticks")
                .ok_or_else(|| StateError::fatal("tick counter not registered"))?;
            let tick = ticks.fetch_add(1, Ordering::SeqCst) + 1;
            info!(tick, pid = std::process::id(), "Tick");

            if max_ticks.is_some_and(|max| tick >= max) {
                return Err(StateError::exit(format!("reached {} ticks", tick)));
            }
            Ok(Step::Sleep(None))
        })
    }

    fn configure(&self, builder: ContextBuilder) -> worker_daemon::Result<ContextBuilder> {
        Ok(builder.with("ticks", AtomicU64::new(0)))
    }

    fn standby_condition(&self) -> Option<Predicate> {
        let path = self.pause_file.clone()?;
        Some(Arc::new(move |_: &Context| path.exists()))
    }
}

fn main() {
    let cli = Cli::parse();
    let ticker = Ticker {
        pause_file: cli.pause_file,
        max_ticks: cli.max_ticks,
    };
    run_daemon(ticker, &cli.daemon)
}
