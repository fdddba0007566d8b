#![cfg(unix)]

use nix::sys::signal::{kill, Signal};
use nix::unistd::getpid;
use std::time::Duration;
use worker_daemon::supervisor::{ProcessPool, ProcessSupervisor, Teardown, EXIT_FAILURE};
use worker_daemon::DaemonConfig;

/// Workers that ignore SIGTERM are killed once a second signal arrives.
#[tokio::test]
async fn second_sigterm_kills_stuck_workers() {
    let mut config = DaemonConfig::default();
    config.daemon.processes = 1;
    let pool = ProcessPool::with_command("sh", ["-c", "trap '' TERM; exec sleep 30"]);
    let mut supervisor = ProcessSupervisor::new(config, pool);

    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        kill(getpid(), Signal::SIGTERM).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        kill(getpid(), Signal::SIGTERM).unwrap();
    });

    let code = tokio::time::timeout(Duration::from_secs(10), supervisor.run_until_shutdown())
        .await
        .expect("supervisor should exit after the second SIGTERM");

    assert_eq!(code, EXIT_FAILURE);
    assert_eq!(supervisor.teardown(), Teardown::Terminated);
    assert_eq!(supervisor.pool().live_workers(), 0);
}
