use clap::Parser;
use rediproc_common::{ConfigOverrides, LogLevel, PortSpec, ResolvedConfig, Result};
use std::path::PathBuf;

pub mod config;
use config::load_config_file;

/// Command-line options. Anything left unset falls back to the config file,
/// then to built-in defaults.
#[derive(Parser, Debug)]
#[command(name = "rediproc", about = "Run a supervised redis-server on a claimed port")]
pub struct Args {
    /// JSON file with default options.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind and connect to.
    #[arg(long)]
    pub host: Option<String>,

    /// Port spec: any | 6380 | 2000-3000 | 4002,4003 | several of those separated by spaces.
    #[arg(long, allow_hyphen_values = true)]
    pub port: Option<PortSpec>,

    #[arg(long)]
    pub username: Option<String>,

    #[arg(long)]
    pub password: Option<String>,

    /// Path to the redis-server executable.
    #[arg(long)]
    pub exec: Option<PathBuf>,

    /// Seconds before the server drops an idle client.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Server log level: debug | verbose | notice | warning
    #[arg(long)]
    pub loglevel: Option<LogLevel>,

    /// Number of databases.
    #[arg(long)]
    pub db_count: Option<u32>,

    /// Server save rule, e.g. "900 1 300 10". Empty disables snapshots.
    #[arg(long)]
    pub save: Option<String>,

    /// Compress RDB dumps; `--compression=false` turns it off over the config file.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub compression: Option<bool>,

    /// Checksum RDB dumps; `--rdbchecksum=false` turns it off over the config file.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub rdbchecksum: Option<bool>,

    /// Log to syslog as well; `--syslog=false` turns it off over the config file.
    #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
    pub syslog: Option<bool>,

    /// Directory for data files and the unix socket. Temporary when unset.
    #[arg(long)]
    pub datadir: Option<PathBuf>,

    /// Extension module to load; repeat for several, loaded in order.
    #[arg(long = "module")]
    pub modules: Vec<PathBuf>,

    /// Times to retry when a port turns out to be claimed already.
    #[arg(long)]
    pub port_search_count: Option<u32>,

    /// Seconds to wait for the server to become ready.
    #[arg(long)]
    pub startup_timeout: Option<u64>,

    /// Seconds to wait after SIGTERM before killing the server.
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,

    /// Print the launch command line and exit.
    #[arg(long)]
    pub print_command: bool,

    /// env_logger filter (e.g. "info,rediproc_executor=debug"); overrides RUST_LOG.
    #[arg(long)]
    pub log: Option<String>,
}

impl Args {
    /// Flags as a config source. Switches only count when given.
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.host.clone(),
            port: self.port.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            exec: self.exec.clone(),
            timeout: self.timeout,
            loglevel: self.loglevel,
            db_count: self.db_count,
            save: self.save.clone(),
            compression: self.compression,
            rdbchecksum: self.rdbchecksum,
            syslog: self.syslog,
            decode: None,
            datadir: self.datadir.clone(),
            modules: (!self.modules.is_empty()).then(|| self.modules.clone()),
            port_search_count: self.port_search_count,
            startup_timeout: self.startup_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Merge flags over the config file over defaults.
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let file = match &self.config {
            Some(path) => load_config_file(path)?,
            None => ConfigOverrides::default(),
        };
        rediproc_common::resolve(&ConfigOverrides::default(), &self.overrides(), &file)
    }
}

/// Config for `--print-command`. An unset datadir becomes a per-port
/// directory under the system temp dir that outlives this process, so the
/// printed paths stay usable.
pub fn printable_config(mut config: ResolvedConfig, port: u16) -> ResolvedConfig {
    if config.datadir.is_none() {
        config.datadir = Some(std::env::temp_dir().join(format!("rediproc-{port}")));
    }
    config
}

pub fn init_logging(filter: Option<&str>) {
    let env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    let _ = builder.try_init();
}
