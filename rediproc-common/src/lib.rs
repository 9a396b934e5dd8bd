use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod config;
pub mod port_spec;

pub use config::{resolve, ConfigOverrides, LogLevel, ResolvedConfig};
pub use port_spec::PortSpec;

/// Oldest redis-server release the executor agrees to supervise.
pub const MIN_SERVER_VERSION: &str = "2.6.0";

/// Lifecycle of one supervised server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorState {
    NotStarted,
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::NotStarted => "not-started",
            ExecutorState::Starting => "starting",
            ExecutorState::Ready => "ready",
            ExecutorState::Running => "running",
            ExecutorState::Stopping => "stopping",
            ExecutorState::Stopped => "stopped",
            ExecutorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Error types for rediproc operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RediprocError {
    #[error(
        "Attempted {attempts} times to select ports. All attempted ports: [{}] are already in use, probably by other instances of the test.",
        join_ports(.ports)
    )]
    PortAllocation { attempts: u32, ports: Vec<u16> },

    #[error(
        "redis-server did not become ready within {:.1}s\ncommand: {command}\noutput:\n{output}",
        .timeout.as_secs_f64()
    )]
    StartupTimeout { timeout: Duration, command: String, output: String },

    #[error("redis-server exited before becoming ready ({})\ncommand: {command}\noutput:\n{output}", describe_exit(.code))]
    ProcessExitedEarly { code: Option<i32>, command: String, output: String },

    #[error("redis-server {found} is not supported, {} or newer is required", MIN_SERVER_VERSION)]
    UnsupportedVersion { found: String },

    #[error("Misconfigured redis-server: {0}")]
    Misconfigured(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot {action} an executor that is {state}")]
    InvalidState { state: ExecutorState, action: &'static str },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Redis client error: {0}")]
    Client(String),
}

impl From<std::io::Error> for RediprocError {
    fn from(err: std::io::Error) -> Self {
        RediprocError::Io(err.to_string())
    }
}

fn join_ports(ports: &[u16]) -> String {
    ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ")
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code".to_string(),
    }
}

/// Result type for rediproc operations
pub type Result<T> = std::result::Result<T, RediprocError>;
