use thiserror::Error;

/// Main error type for the daemon runtime
#[derive(Error, Debug)]
pub enum DaemonError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Health server error: {0}")]
    HealthServer(String),

    // Worker pool errors
    #[error("Failed to spawn worker {index}: {reason}")]
    Spawn { index: usize, reason: String },

    #[error("Failed to signal worker {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Application errors from `Daemon::configure`
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for DaemonError
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors raised by a state while it runs inside the scheduler.
///
/// Anything converted from [`anyhow::Error`] is recoverable; `Fatal` and `Exit`
/// always stop the state machine regardless of error policy strictness.
#[derive(Error, Debug)]
pub enum StateError {
    /// Unconditionally stop the worker with a failure status.
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Unconditionally stop the worker with a clean status.
    #[error("Exit requested: {0}")]
    Exit(String),

    /// A state panicked; treated like any other recoverable failure.
    #[error("State panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StateError {
    pub fn fatal(reason: impl Into<String>) -> Self {
        StateError::Fatal(reason.into())
    }

    pub fn exit(reason: impl Into<String>) -> Self {
        StateError::Exit(reason.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::Fatal(_) => ErrorKind::Fatal,
            StateError::Exit(_) => ErrorKind::Exit,
            StateError::Panicked(_) | StateError::Other(_) => ErrorKind::Recoverable,
        }
    }

    /// Fatal and exit errors bypass strictness.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.kind(), ErrorKind::Recoverable)
    }
}

/// Classification of a [`StateError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Recoverable,
    Fatal,
    Exit,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Recoverable => write!(f, "recoverable"),
            ErrorKind::Fatal => write!(f, "fatal"),
            ErrorKind::Exit => write!(f, "exit"),
        }
    }
}
