use std::process::Command;
use std::time::{Duration, Instant};

fn ticker() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_worker-daemon"));
    command
        .env("DAEMON_SLEEP_POLICY__DEFAULT_TIMEOUT_SECS", "0.01")
        .env_remove("DAEMON_PROCESSES")
        .env_remove("TICKER_PAUSE_FILE")
        .env_remove("WORKER_DAEMON_INDEX");
    command
}

/// A single-process run stops cleanly once the tick limit is reached.
#[test]
fn single_worker_exits_cleanly_after_max_ticks() {
    let status = ticker()
        .args(["--processes", "1", "--testing", "--max-ticks", "3"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));
}

/// The environment override of the sleep timeout reaches the worker: 30 ticks
/// would take half a minute at the configured one-second default.
#[test]
fn environment_overrides_sleep_timeout() {
    let started = Instant::now();
    let status = ticker()
        .args(["--processes", "1", "--testing", "--max-ticks", "30"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));
    assert!(started.elapsed() < Duration::from_secs(15));
}

/// The supervisor re-executes the binary per worker and exits 0 once all of them do.
#[test]
fn supervised_workers_exit_cleanly_after_max_ticks() {
    let status = ticker()
        .args(["--processes", "2", "--testing", "--max-ticks", "2"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(0));
}

/// Invalid configuration is reported before any worker starts.
#[test]
fn zero_processes_is_rejected() {
    let status = ticker()
        .args(["--processes", "0", "--testing"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
