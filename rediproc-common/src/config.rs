use crate::{PortSpec, RediprocError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Used when no `redis-server` can be found on `PATH`.
pub const DEFAULT_EXECUTABLE: &str = "/usr/bin/redis-server";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_DB_COUNT: u32 = 8;
pub const DEFAULT_PORT_SEARCH_COUNT: u32 = 5;
pub const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// redis-server log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Verbose,
    #[default]
    Notice,
    Warning,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = RediprocError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "verbose" => Ok(LogLevel::Verbose),
            "notice" => Ok(LogLevel::Notice),
            "warning" => Ok(LogLevel::Warning),
            other => Err(RediprocError::Config(format!(
                "unknown loglevel {other:?}, expected one of debug, verbose, notice, warning"
            ))),
        }
    }
}

/// One configuration source. Every field is optional; unset fields fall
/// through to the next source in [`resolve`].
///
/// The same shape is used for per-fixture arguments, command-line flags and
/// the JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<PortSpec>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub exec: Option<PathBuf>,
    /// Seconds before the server closes an idle client connection.
    pub timeout: Option<u64>,
    pub loglevel: Option<LogLevel>,
    pub db_count: Option<u32>,
    pub save: Option<String>,
    pub compression: Option<bool>,
    pub rdbchecksum: Option<bool>,
    pub syslog: Option<bool>,
    pub decode: Option<bool>,
    pub datadir: Option<PathBuf>,
    pub modules: Option<Vec<PathBuf>>,
    pub port_search_count: Option<u32>,
    pub startup_timeout: Option<u64>,
    pub shutdown_timeout: Option<u64>,
}

impl ConfigOverrides {
    /// Field-wise merge where values already set on `self` win.
    pub fn or(self, fallback: ConfigOverrides) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.or(fallback.host),
            port: self.port.or(fallback.port),
            username: self.username.or(fallback.username),
            password: self.password.or(fallback.password),
            exec: self.exec.or(fallback.exec),
            timeout: self.timeout.or(fallback.timeout),
            loglevel: self.loglevel.or(fallback.loglevel),
            db_count: self.db_count.or(fallback.db_count),
            save: self.save.or(fallback.save),
            compression: self.compression.or(fallback.compression),
            rdbchecksum: self.rdbchecksum.or(fallback.rdbchecksum),
            syslog: self.syslog.or(fallback.syslog),
            decode: self.decode.or(fallback.decode),
            datadir: self.datadir.or(fallback.datadir),
            modules: self.modules.or(fallback.modules),
            port_search_count: self.port_search_count.or(fallback.port_search_count),
            startup_timeout: self.startup_timeout.or(fallback.startup_timeout),
            shutdown_timeout: self.shutdown_timeout.or(fallback.shutdown_timeout),
        }
    }
}

/// Fully merged, read-only configuration consumed by the port allocator and
/// the process executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub host: String,
    /// `None` means any free port.
    pub port: Option<PortSpec>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub executable: PathBuf,
    pub timeout: u64,
    pub loglevel: LogLevel,
    pub db_count: u32,
    /// Server save rule; empty disables RDB snapshots.
    pub save: String,
    pub compression: bool,
    pub rdbchecksum: bool,
    pub syslog: bool,
    pub decode: bool,
    /// `None` lets the executor create a temporary directory.
    pub datadir: Option<PathBuf>,
    pub modules: Vec<PathBuf>,
    pub port_search_count: u32,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ResolvedConfig {
    /// Fill every unset field of `source` with its built-in default.
    pub fn from_overrides(source: ConfigOverrides) -> Result<Self> {
        let db_count = source.db_count.unwrap_or(DEFAULT_DB_COUNT);
        if db_count == 0 {
            return Err(RediprocError::Config("db_count must be at least 1".to_string()));
        }
        let port_search_count = source.port_search_count.unwrap_or(DEFAULT_PORT_SEARCH_COUNT);
        if port_search_count == 0 {
            return Err(RediprocError::Config(
                "port_search_count must be at least 1".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            host: source.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: source.port,
            username: source.username.filter(|u| !u.is_empty()),
            password: source.password.filter(|p| !p.is_empty()),
            executable: source.exec.unwrap_or_else(default_executable),
            timeout: source.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS),
            loglevel: source.loglevel.unwrap_or_default(),
            db_count,
            save: source.save.unwrap_or_default(),
            compression: source.compression.unwrap_or(false),
            rdbchecksum: source.rdbchecksum.unwrap_or(false),
            syslog: source.syslog.unwrap_or(false),
            decode: source.decode.unwrap_or(false),
            datadir: source.datadir,
            modules: source.modules.unwrap_or_default(),
            port_search_count,
            startup_timeout: Duration::from_secs(
                source.startup_timeout.unwrap_or(DEFAULT_STARTUP_TIMEOUT_SECS),
            ),
            shutdown_timeout: Duration::from_secs(
                source.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            ),
        })
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        ResolvedConfig {
            host: DEFAULT_HOST.to_string(),
            port: None,
            username: None,
            password: None,
            executable: default_executable(),
            timeout: DEFAULT_TIMEOUT_SECS,
            loglevel: LogLevel::default(),
            db_count: DEFAULT_DB_COUNT,
            save: String::new(),
            compression: false,
            rdbchecksum: false,
            syslog: false,
            decode: false,
            datadir: None,
            modules: Vec::new(),
            port_search_count: DEFAULT_PORT_SEARCH_COUNT,
            startup_timeout: Duration::from_secs(DEFAULT_STARTUP_TIMEOUT_SECS),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

fn default_executable() -> PathBuf {
    which::which("redis-server").unwrap_or_else(|_| PathBuf::from(DEFAULT_EXECUTABLE))
}

/// Merge configuration sources into one record.
///
/// Precedence: per-fixture argument > command-line option > config file >
/// built-in default.
pub fn resolve(
    fixture: &ConfigOverrides,
    cli: &ConfigOverrides,
    file: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let merged = fixture.clone().or(cli.clone()).or(file.clone());
    ResolvedConfig::from_overrides(merged)
}
