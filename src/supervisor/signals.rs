//! Signal Handling
//!
//! OS signal listeners only record the signal and forward it; teardown runs
//! in ordinary code that consumes the forwarded values.

use crate::engine::StopFlag;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Drain in-flight iterations, then release workers (first SIGINT/SIGTERM)
    Graceful,
    /// Kill workers immediately (any later signal)
    Forced,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Forced => write!(f, "forced"),
        }
    }
}

struct Shared {
    received: AtomicUsize,
    tx: mpsc::UnboundedSender<ShutdownSignal>,
}

/// Cloneable sender side of the shutdown coordinator
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Record a termination request. The first one is graceful, later ones escalate.
    pub fn notify(&self, source: &str) -> ShutdownSignal {
        let previous = self.shared.received.fetch_add(1, Ordering::SeqCst);
        let signal = if previous == 0 {
            ShutdownSignal::Graceful
        } else {
            ShutdownSignal::Forced
        };

        info!("Received {} (pid {}), requesting {} shutdown", source, std::process::id(), signal);
        let _ = self.shared.tx.send(signal);
        signal
    }

    /// Request an immediate forced shutdown.
    pub fn force(&self) {
        self.shared.received.fetch_add(1, Ordering::SeqCst);
        warn!("Forced shutdown requested");
        let _ = self.shared.tx.send(ShutdownSignal::Forced);
    }

    /// Number of requests received so far
    pub fn received(&self) -> usize {
        self.shared.received.load(Ordering::SeqCst)
    }
}

/// Funnels OS signals and direct requests into one ordered stream.
pub struct ShutdownCoordinator {
    handle: ShutdownHandle,
    rx: mpsc::UnboundedReceiver<ShutdownSignal>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            handle: ShutdownHandle {
                shared: Arc::new(Shared {
                    received: AtomicUsize::new(0),
                    tx,
                }),
            },
            rx,
        }
    }

    pub fn handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Next shutdown request, in arrival order.
    pub async fn recv(&mut self) -> Option<ShutdownSignal> {
        self.rx.recv().await
    }

    /// Register SIGINT/SIGTERM listeners. Registration completes before this returns.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::interrupt(), "SIGINT"),
            (SignalKind::terminate(), "SIGTERM"),
        ] {
            let mut stream = signal(kind)?;
            let handle = self.handle();
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    handle.notify(name);
                }
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        let handle = self.handle();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                handle.notify("Ctrl+C");
            }
        });
        Ok(())
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker-side handler: raise `stop` on SIGINT/SIGTERM so the state machine
/// finishes its in-flight iteration and returns.
#[cfg(unix)]
pub fn install_worker_signal_handler(stop: StopFlag) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let mut stream = signal(kind)?;
        let stop = stop.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                info!("Signal {} received, PID: {}", name, std::process::id());
                stop.raise();
            }
        });
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn install_worker_signal_handler(stop: StopFlag) -> std::io::Result<()> {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, PID: {}", std::process::id());
            stop.raise();
        }
    });
    Ok(())
}
