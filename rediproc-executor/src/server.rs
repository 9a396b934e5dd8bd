use crate::executor::ShutdownOutcome;
use log::debug;
use rediproc_common::{RediprocError, Result};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// What client-construction code needs from a redis server, whether this
/// process spawned it or not.
pub trait RedisServer {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> ShutdownOutcome;
    fn host(&self) -> &str;
    fn port(&self) -> u16;
    fn username(&self) -> Option<&str>;
    fn password(&self) -> Option<&str>;
    /// Unix socket to prefer over host:port, when the server has one.
    fn unixsocket(&self) -> Option<PathBuf>;
}

fn socket_addrs(host: &str, port: u16) -> Vec<SocketAddr> {
    (host, port).to_socket_addrs().map(Iterator::collect).unwrap_or_default()
}

/// One connect attempt against every address `host` resolves to.
pub fn tcp_accepting(host: &str, port: u16, probe: Duration) -> bool {
    socket_addrs(host, port)
        .iter()
        .any(|addr| TcpStream::connect_timeout(addr, probe).is_ok())
}

/// Poll `host:port` with TCP connect attempts until one succeeds (the server
/// is accepting connections) or `deadline` is reached.
pub fn poll_until_ready(host: &str, port: u16, deadline: Instant) -> std::result::Result<(), String> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(format!("timed out waiting for {host}:{port}"));
        }
        let probe = Duration::min(remaining, Duration::from_millis(200));
        if tcp_accepting(host, port, probe) {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Stand-in for [`RedisExecutor`](crate::RedisExecutor) when a server is
/// already running somewhere else. Starting only waits for it to accept
/// connections; stopping does nothing.
#[derive(Debug, Clone)]
pub struct NoopRedis {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    unixsocket: Option<PathBuf>,
    startup_timeout: Duration,
}

impl NoopRedis {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NoopRedis {
            host: host.into(),
            port,
            username: None,
            password: None,
            unixsocket: None,
            startup_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_unixsocket(mut self, path: impl Into<PathBuf>) -> Self {
        self.unixsocket = Some(path.into());
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

impl RedisServer for NoopRedis {
    fn start(&mut self) -> Result<()> {
        debug!("waiting for external redis at {}:{}", self.host, self.port);
        let deadline = Instant::now() + self.startup_timeout;
        poll_until_ready(&self.host, self.port, deadline).map_err(|output| {
            RediprocError::StartupTimeout {
                timeout: self.startup_timeout,
                command: format!("external redis at {}:{}", self.host, self.port),
                output,
            }
        })
    }

    fn stop(&mut self) -> ShutdownOutcome {
        ShutdownOutcome::NotRunning
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    fn unixsocket(&self) -> Option<PathBuf> {
        self.unixsocket.clone()
    }
}
