use crate::command::{build_args, format_command, server_version, ServerFiles, MIN_VERSION};
use crate::server::{tcp_accepting, RedisServer};
use log::{debug, info, warn};
use rediproc_common::{ExecutorState, RediprocError, ResolvedConfig, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Line redis-server logs once it accepts connections.
pub const READY_MARKER: &str = "Ready to accept connections";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const PROBE_TIMEOUT: Duration = Duration::from_millis(200);
/// How long to wait for reader threads to drain a dead process's pipes.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_CAPTURED_LINES: usize = 1_000;

/// `sun_path` is 108 bytes on Linux and 104 on the BSDs, NUL included.
#[cfg(target_os = "linux")]
pub const MAX_UNIXSOCKET_LEN: usize = 107;
#[cfg(not(target_os = "linux"))]
pub const MAX_UNIXSOCKET_LEN: usize = 103;

/// Evidence `start` waits for before declaring the server ready.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Readiness {
    /// A connection to the server's own endpoint succeeds. On unix this is
    /// the socket inside the data directory, which no other server can be
    /// answering on; elsewhere it is host:port.
    #[default]
    Endpoint,
    /// A TCP connection to host:port succeeds.
    Tcp,
    /// [`READY_MARKER`] shows up in the captured output.
    LogLine,
}

/// What `stop` had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Nothing was running: never started, or already stopped.
    NotRunning,
    /// The process had already died on its own.
    AlreadyExited(Option<i32>),
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Ignored SIGTERM for the whole grace period and was killed.
    Forced,
}

/// Tail of the server's stdout and stderr, shared with the reader threads.
#[derive(Clone, Default)]
struct CapturedOutput(Arc<Mutex<VecDeque<String>>>);

impl CapturedOutput {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            if lines.len() == MAX_CAPTURED_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    fn contains(&self, needle: &str) -> bool {
        self.0
            .lock()
            .map(|lines| lines.iter().any(|line| line.contains(needle)))
            .unwrap_or(false)
    }

    fn text(&self) -> String {
        self.0
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, sink: CapturedOutput) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(stream).lines().map_while(|line| line.ok()) {
            sink.push(line);
        }
    })
}

/// Supervises one redis-server child process.
///
/// `start` launches the server and blocks until it is ready or the startup
/// timeout fires. `stop` terminates it; only the first call has any effect.
/// Dropping the executor stops the server, so the process cannot outlive
/// its owner on any exit path, panics included.
///
/// An executor is single-use: once stopped or failed it cannot be started
/// again.
pub struct RedisExecutor {
    config: ResolvedConfig,
    port: u16,
    datadir: PathBuf,
    // Removed by `stop`, once the server is gone.
    owned_datadir: Option<TempDir>,
    readiness: Readiness,
    state: ExecutorState,
    child: Option<Child>,
    command: String,
    output: CapturedOutput,
    readers: Vec<JoinHandle<()>>,
}

impl RedisExecutor {
    /// Prepare an executor for `port`. Nothing is launched yet.
    ///
    /// The data directory is `config.datadir` when set (created if missing),
    /// otherwise a fresh temporary directory removed after `stop`.
    pub fn new(config: ResolvedConfig, port: u16) -> Result<Self> {
        let (datadir, owned_datadir) = match &config.datadir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let owned = tempfile::Builder::new().prefix("rediproc-").tempdir()?;
                (owned.path().to_path_buf(), Some(owned))
            }
        };

        let unixsocket = PathBuf::from(ServerFiles::new(&datadir, port).unixsocket);
        let socket_len = unixsocket.as_os_str().len();
        if socket_len > MAX_UNIXSOCKET_LEN {
            return Err(RediprocError::Misconfigured(format!(
                "unix socket path {} is {socket_len} bytes, the limit is {MAX_UNIXSOCKET_LEN}; \
                 configure a shorter datadir",
                unixsocket.display()
            )));
        }

        Ok(RedisExecutor {
            config,
            port,
            datadir,
            owned_datadir,
            readiness: Readiness::default(),
            state: ExecutorState::NotStarted,
            child: None,
            command: String::new(),
            output: CapturedOutput::default(),
            readers: Vec::new(),
        })
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn datadir(&self) -> &Path {
        &self.datadir
    }

    pub fn unixsocket_path(&self) -> PathBuf {
        PathBuf::from(ServerFiles::new(&self.datadir, self.port).unixsocket)
    }

    /// Process id of the running server, if there is one.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Current lifecycle state. Notices a server that died after startup.
    pub fn state(&mut self) -> ExecutorState {
        if self.state == ExecutorState::Running {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    warn!("redis-server on port {} exited unexpectedly ({status})", self.port);
                    self.state = ExecutorState::Failed;
                }
            }
        }
        self.state
    }

    /// Captured stdout and stderr of the server so far.
    pub fn output(&self) -> String {
        self.output.text()
    }

    /// The full launch command line. Queries the executable for its version.
    pub fn command_line(&self) -> Result<String> {
        let version = server_version(&self.config.executable)?;
        let args = build_args(&self.config, self.port, &self.datadir, version);
        Ok(format_command(&self.config.executable, &args))
    }

    /// Launch the server and wait until it is ready.
    ///
    /// On failure the process is already gone when this returns and the
    /// executor is `Failed`.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ExecutorState::NotStarted {
            return Err(RediprocError::InvalidState { state: self.state, action: "start" });
        }
        self.state = ExecutorState::Starting;

        match self.launch() {
            Ok(()) => {
                self.state = ExecutorState::Ready;
                info!(
                    "redis-server ready on {}:{} (pid {})",
                    self.config.host,
                    self.port,
                    self.pid().unwrap_or_default()
                );
                self.state = ExecutorState::Running;
                Ok(())
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn launch(&mut self) -> Result<()> {
        let version = server_version(&self.config.executable)?;
        if version < MIN_VERSION {
            return Err(RediprocError::UnsupportedVersion { found: version.to_string() });
        }

        let args = build_args(&self.config, self.port, &self.datadir, version);
        self.command = format_command(&self.config.executable, &args);
        debug!("launching {}", self.command);

        let mut child = Command::new(&self.config.executable)
            .args(&args)
            .current_dir(&self.datadir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RediprocError::ProcessExitedEarly {
                code: None,
                command: self.command.clone(),
                output: format!("failed to spawn: {e}"),
            })?;

        if let Some(stdout) = child.stdout.take() {
            self.readers.push(spawn_reader(stdout, self.output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers.push(spawn_reader(stderr, self.output.clone()));
        }
        self.child = Some(child);
        self.wait_until_ready()
    }

    fn wait_until_ready(&mut self) -> Result<()> {
        let timeout = self.config.startup_timeout;
        let deadline = Instant::now() + timeout;
        let unixsocket = self.unixsocket_path();

        loop {
            let exited = match self.child.as_mut() {
                Some(child) => child.try_wait()?,
                None => return Err(RediprocError::InvalidState { state: self.state, action: "wait on" }),
            };
            if let Some(status) = exited {
                self.drain_readers();
                return Err(RediprocError::ProcessExitedEarly {
                    code: status.code(),
                    command: self.command.clone(),
                    output: self.output.text(),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.is_ready(&unixsocket, remaining) {
                return Ok(());
            }
            if remaining.is_zero() {
                return Err(RediprocError::StartupTimeout {
                    timeout,
                    command: self.command.clone(),
                    output: self.output.text(),
                });
            }
            thread::sleep(POLL_INTERVAL.min(remaining));
        }
    }

    fn is_ready(&self, unixsocket: &Path, remaining: Duration) -> bool {
        let probe = PROBE_TIMEOUT.min(remaining);
        match self.readiness {
            Readiness::LogLine => self.output.contains(READY_MARKER),
            Readiness::Tcp => tcp_accepting(&self.config.host, self.port, probe),
            Readiness::Endpoint if cfg!(unix) => socket_accepting(unixsocket),
            Readiness::Endpoint => tcp_accepting(&self.config.host, self.port, probe),
        }
    }

    /// Give reader threads a moment to collect what a dead process wrote.
    fn drain_readers(&mut self) {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while self.readers.iter().any(|r| !r.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        // Threads still blocked on a pipe held open by a grandchild are left to finish on their own.
        self.readers.retain(|r| !r.is_finished());
    }

    /// Terminate the server: SIGTERM, then SIGKILL after the grace period.
    ///
    /// Only the first call has an effect. Never fails; a forced kill is
    /// logged and reported as [`ShutdownOutcome::Forced`].
    pub fn stop(&mut self) -> ShutdownOutcome {
        let Some(mut child) = self.child.take() else {
            if self.state == ExecutorState::NotStarted {
                self.state = ExecutorState::Stopped;
            }
            return ShutdownOutcome::NotRunning;
        };

        let previous = self.state;
        self.state = ExecutorState::Stopping;
        let outcome = terminate(&mut child, self.config.shutdown_timeout);
        self.drain_readers();
        // A server that died while running is a failure even if nobody polled `state` first.
        let crashed = previous == ExecutorState::Running && matches!(outcome, ShutdownOutcome::AlreadyExited(_));
        self.state = if previous == ExecutorState::Failed || crashed {
            ExecutorState::Failed
        } else {
            ExecutorState::Stopped
        };
        info!("redis-server on port {} stopped: {outcome:?}", self.port);

        self.remove_owned_datadir();
        outcome
    }

    /// Tear down after a failed start. The server never became usable, so it
    /// is killed outright instead of being given the shutdown grace period.
    fn abort(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("cannot kill redis-server (pid {}): {e}", child.id());
            }
            if let Err(e) = child.wait() {
                warn!("cannot reap redis-server (pid {}): {e}", child.id());
            }
        }
        self.drain_readers();
        self.remove_owned_datadir();
        self.state = ExecutorState::Failed;
    }

    fn remove_owned_datadir(&mut self) {
        if let Some(dir) = self.owned_datadir.take() {
            if let Err(e) = dir.close() {
                warn!("could not remove redis data directory: {e}");
            }
        }
    }
}

fn terminate(child: &mut Child, grace: Duration) -> ShutdownOutcome {
    match child.try_wait() {
        Ok(Some(status)) => return ShutdownOutcome::AlreadyExited(status.code()),
        Ok(None) => {}
        Err(e) => warn!("cannot poll redis-server (pid {}): {e}", child.id()),
    }

    send_terminate(child);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return ShutdownOutcome::Graceful,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                warn!("cannot poll redis-server (pid {}): {e}", child.id());
                break;
            }
        }
    }

    warn!(
        "redis-server (pid {}) did not exit within {:?} of SIGTERM, killing it",
        child.id(),
        grace
    );
    if let Err(e) = child.kill() {
        warn!("cannot kill redis-server (pid {}): {e}", child.id());
    }
    if let Err(e) = child.wait() {
        warn!("cannot reap redis-server (pid {}): {e}", child.id());
    }
    ShutdownOutcome::Forced
}

#[cfg(unix)]
fn socket_accepting(path: &Path) -> bool {
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

#[cfg(not(unix))]
fn socket_accepting(_path: &Path) -> bool {
    false
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM) {
        debug!("SIGTERM to pid {} failed: {e}", child.id());
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.kill();
}

impl RedisServer for RedisExecutor {
    fn start(&mut self) -> Result<()> {
        RedisExecutor::start(self)
    }

    fn stop(&mut self) -> ShutdownOutcome {
        RedisExecutor::stop(self)
    }

    fn host(&self) -> &str {
        &self.config.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn username(&self) -> Option<&str> {
        self.config.username.as_deref()
    }

    fn password(&self) -> Option<&str> {
        self.config.password.as_deref()
    }

    fn unixsocket(&self) -> Option<PathBuf> {
        Some(self.unixsocket_path())
    }
}

impl Drop for RedisExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
