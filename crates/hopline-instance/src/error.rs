//! Error types for instance orchestration.

use std::fmt;

use hopline_plugins::PluginError;
use thiserror::Error;

/// Lifecycle state of an [`InstanceOrchestrator`](crate::InstanceOrchestrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created, nothing built.
    Uninitialized,
    /// Hops resolved and the top-level config loaded.
    Built,
    /// Processes and engines running.
    Launched,
    /// Torn down. Terminal.
    Closed,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitialized => "uninitialized",
            Self::Built => "built",
            Self::Launched => "launched",
            Self::Closed => "closed",
        })
    }
}

/// Errors raised by tunnel engines and sub-engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine rejected its configuration.
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    /// `start` was called before a config was loaded.
    #[error("engine has no config loaded")]
    NotLoaded,

    /// The engine could not be started.
    #[error("failed to start {program}: {message}")]
    Start {
        /// Program that failed.
        program: String,
        /// Why it failed.
        message: String,
    },

    /// No sub-engine is registered for an external config type.
    #[error("unsupported sub-engine type: {kind}")]
    UnsupportedSubEngine {
        /// The external config type.
        kind: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by process pools.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Empty argv.
    #[error("cannot start a process without a program")]
    EmptyCommand,

    /// The program could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program that failed.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The child exited too soon after starting and will not be restarted.
    #[error("{program} exited immediately ({status})")]
    Crashed {
        /// Program that crashed.
        program: String,
        /// Exit status description.
        status: String,
    },

    /// The pool has been closed.
    #[error("process pool is closed")]
    Closed,
}

/// Result type for process operations.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors raised by loopback bridges and the UI executor.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Request or body stream failed.
    #[error("bridge transport error: {0}")]
    Transport(String),

    /// The view was destroyed.
    #[error("bridge view destroyed")]
    Destroyed,

    /// The UI executor has shut down.
    #[error("UI executor is gone")]
    ExecutorGone,

    /// The UI executor could not be started.
    #[error("failed to start UI executor: {0}")]
    Executor(#[from] std::io::Error),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Errors raised by the instance orchestrator.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// Operation not allowed in the current state.
    #[error("cannot {operation} an instance that is {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// State the instance was in.
        state: InstanceState,
    },

    /// `close()` ran while the operation was in progress.
    #[error("instance was closed")]
    Closed,

    /// Two hops share a local port.
    #[error("duplicate local port {0}")]
    DuplicatePort(u16),

    /// A hop has port 0.
    #[error("invalid local port {0}")]
    InvalidPort(u16),

    /// Something already listens on a hop's local port.
    #[error("local port {port} is already in use")]
    PortInUse {
        /// The contested port.
        port: u16,
        /// Bind failure.
        #[source]
        source: std::io::Error,
    },

    /// The chain or a hop config could not be built.
    #[error("failed to build config: {0}")]
    Build(String),

    /// Plugin resolution failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Engine or sub-engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Process pool failure.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Bridge setup failure.
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for instance operations.
pub type InstanceResult<T> = Result<T, InstanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_names_operation_and_state() {
        let err = InstanceError::InvalidState {
            operation: "launch",
            state: InstanceState::Uninitialized,
        };
        assert_eq!(
            err.to_string(),
            "cannot launch an instance that is uninitialized"
        );
    }

    #[test]
    fn engine_errors_surface_verbatim() {
        let err: InstanceError = EngineError::InvalidConfig("missing outbounds".into()).into();
        assert_eq!(err.to_string(), "invalid engine config: missing outbounds");
    }
}
