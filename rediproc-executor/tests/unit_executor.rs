#![cfg(unix)]

// These tests drive the executor with small shell scripts standing in for
// redis-server. Every script answers `--version` like a real server and
// ignores the rest of the launch arguments.

use std::os::unix::fs::PermissionsExt;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use rediproc_common::{ExecutorState, RediprocError, ResolvedConfig};
use rediproc_executor::{Readiness, RedisExecutor, RedisServer, ShutdownOutcome};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write an executable fake server into `dir` running `body` after the
/// `--version` check.
fn fake_server(dir: &TempDir, version: &str, body: &str) -> PathBuf {
    let path = dir.path().join("fake-redis-server");
    let script = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = \"--version\" ]; then\n\
           echo \"Redis server v={version} sha=00000000:0 malloc=libc bits=64 build=0\"\n\
           exit 0\n\
         fi\n\
         {body}\n"
    );
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn config(executable: PathBuf, startup: Duration, shutdown: Duration) -> ResolvedConfig {
    ResolvedConfig {
        executable,
        startup_timeout: startup,
        shutdown_timeout: shutdown,
        ..Default::default()
    }
}

fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Prints the ready marker, then idles until signalled.
const READY_THEN_IDLE: &str = "echo \"* Ready to accept connections tcp\"\nexec sleep 30";

#[test]
fn test_missing_executable_fails_fast() {
    init_logging();
    let cfg = config(PathBuf::from("/nonexistent/redis-server"), Duration::from_secs(30), Duration::from_secs(1));
    let mut executor = RedisExecutor::new(cfg, 6400).unwrap();

    let started = Instant::now();
    let err = executor.start().unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5), "must not wait for the startup timeout");
    assert!(matches!(err, RediprocError::ProcessExitedEarly { code: None, .. }), "got {err:?}");
    assert_eq!(executor.state(), ExecutorState::Failed);
}

#[test]
fn test_early_exit_reports_code_and_output() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "echo 'FATAL: bad config' >&2\nexit 3");
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(30), Duration::from_secs(1)), 6401).unwrap();

    match executor.start() {
        Err(RediprocError::ProcessExitedEarly { code, command, output }) => {
            assert_eq!(code, Some(3));
            assert!(command.contains("--port 6401"), "command: {command}");
            assert!(output.contains("FATAL: bad config"), "output: {output}");
        }
        other => panic!("expected ProcessExitedEarly, got {other:?}"),
    }
    assert_eq!(executor.state(), ExecutorState::Failed);
}

#[test]
fn test_hung_server_times_out_on_schedule() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "echo 'loading...'\nexec sleep 30");
    let timeout = Duration::from_secs(1);
    let mut executor = RedisExecutor::new(config(exe, timeout, Duration::from_secs(1)), 6402).unwrap();

    let started = Instant::now();
    let err = executor.start().unwrap_err();
    let elapsed = started.elapsed();

    assert!(elapsed >= timeout, "gave up early after {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_secs(2), "gave up late after {elapsed:?}");
    match err {
        RediprocError::StartupTimeout { timeout: reported, output, .. } => {
            assert_eq!(reported, timeout);
            assert!(output.contains("loading..."), "output: {output}");
        }
        other => panic!("expected StartupTimeout, got {other:?}"),
    }
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(executor.pid(), None, "the hung process is reaped");
}

#[test]
fn test_startup_timeout_skips_shutdown_grace() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "trap '' TERM\nwhile true; do sleep 1; done");
    let cfg = ResolvedConfig {
        executable: exe,
        startup_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    assert!(cfg.shutdown_timeout >= Duration::from_secs(5), "default grace must dwarf the startup timeout");
    let mut executor = RedisExecutor::new(cfg, 6414).unwrap();

    let started = Instant::now();
    let err = executor.start().unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, RediprocError::StartupTimeout { .. }), "got {err:?}");
    assert!(elapsed < Duration::from_secs(3), "startup failure took {elapsed:?}");
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(executor.pid(), None);
}

#[test]
fn test_tcp_readiness() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "exec sleep 30");
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let cfg = ResolvedConfig {
        host: "127.0.0.1".to_string(),
        ..config(exe, Duration::from_secs(5), Duration::from_secs(5))
    };
    let mut executor = RedisExecutor::new(cfg, port).unwrap().with_readiness(Readiness::Tcp);

    executor.start().unwrap();
    assert_eq!(executor.state(), ExecutorState::Running);
    assert_eq!(executor.stop(), ShutdownOutcome::Graceful);
}

#[test]
fn test_endpoint_readiness_uses_the_unix_socket() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "exec sleep 30");
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(5), Duration::from_secs(5)), 6415).unwrap();
    let _socket = UnixListener::bind(executor.unixsocket_path()).unwrap();

    let started = Instant::now();
    executor.start().unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(executor.state(), ExecutorState::Running);
    assert_eq!(executor.stop(), ShutdownOutcome::Graceful);
}

#[test]
fn test_log_line_readiness_then_graceful_stop() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", READY_THEN_IDLE);
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(5)), 6403)
        .unwrap()
        .with_readiness(Readiness::LogLine);

    executor.start().unwrap();
    assert_eq!(executor.state(), ExecutorState::Running);
    let pid = executor.pid().unwrap();
    assert!(process_alive(pid));

    assert_eq!(executor.stop(), ShutdownOutcome::Graceful);
    assert_eq!(executor.state(), ExecutorState::Stopped);
    assert!(!process_alive(pid));

    assert_eq!(executor.stop(), ShutdownOutcome::NotRunning, "second stop is a no-op");
    assert_eq!(executor.state(), ExecutorState::Stopped);
}

#[test]
fn test_sigterm_ignored_escalates_to_kill() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(
        &dir,
        "7.2.4",
        "trap '' TERM\necho 'Ready to accept connections'\nwhile true; do sleep 1; done",
    );
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_millis(300)), 6404)
        .unwrap()
        .with_readiness(Readiness::LogLine);

    executor.start().unwrap();
    let pid = executor.pid().unwrap();

    let started = Instant::now();
    assert_eq!(executor.stop(), ShutdownOutcome::Forced);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!process_alive(pid));
    assert_eq!(executor.state(), ExecutorState::Stopped);
}

#[test]
fn test_drop_stops_the_server() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", READY_THEN_IDLE);
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(5)), 6405)
        .unwrap()
        .with_readiness(Readiness::LogLine);

    executor.start().unwrap();
    let pid = executor.pid().unwrap();
    drop(executor);
    assert!(!process_alive(pid));
}

#[test]
fn test_unexpected_exit_is_noticed() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "echo 'Ready to accept connections'\nsleep 0.2\nexit 1");
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(1)), 6406)
        .unwrap()
        .with_readiness(Readiness::LogLine);

    executor.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while executor.state() == ExecutorState::Running && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(executor.state(), ExecutorState::Failed);
    assert_eq!(executor.stop(), ShutdownOutcome::AlreadyExited(Some(1)));
    assert_eq!(executor.state(), ExecutorState::Failed);
}

#[test]
fn test_crash_is_a_failure_even_without_polling() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", "echo 'Ready to accept connections'\nsleep 0.2\nexit 1");
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(1)), 6416)
        .unwrap()
        .with_readiness(Readiness::LogLine);

    executor.start().unwrap();
    std::thread::sleep(Duration::from_secs(1));
    assert_eq!(executor.stop(), ShutdownOutcome::AlreadyExited(Some(1)));
    assert_eq!(executor.state(), ExecutorState::Failed);
}

#[test]
fn test_executor_is_single_use() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", READY_THEN_IDLE);
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(5)), 6407)
        .unwrap()
        .with_readiness(Readiness::LogLine);

    executor.start().unwrap();
    assert_eq!(
        executor.start().unwrap_err(),
        RediprocError::InvalidState { state: ExecutorState::Running, action: "start" }
    );
    executor.stop();
    assert_eq!(
        executor.start().unwrap_err(),
        RediprocError::InvalidState { state: ExecutorState::Stopped, action: "start" }
    );
}

#[test]
fn test_stop_before_start() {
    let cfg = config(PathBuf::from("/nonexistent/redis-server"), Duration::from_secs(1), Duration::from_secs(1));
    let mut executor = RedisExecutor::new(cfg, 6408).unwrap();
    assert_eq!(executor.stop(), ShutdownOutcome::NotRunning);
    assert_eq!(executor.state(), ExecutorState::Stopped);
    assert!(matches!(executor.start(), Err(RediprocError::InvalidState { .. })));
}

#[test]
fn test_old_server_is_refused() {
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "2.4.17", READY_THEN_IDLE);
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(1)), 6409).unwrap();
    assert_eq!(
        executor.start().unwrap_err(),
        RediprocError::UnsupportedVersion { found: "2.4.17".to_string() }
    );
}

#[test]
fn test_temporary_datadir_is_removed_after_stop() {
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", READY_THEN_IDLE);
    let mut executor = RedisExecutor::new(config(exe, Duration::from_secs(10), Duration::from_secs(5)), 6410)
        .unwrap()
        .with_readiness(Readiness::LogLine);
    let datadir = executor.datadir().to_path_buf();
    assert!(datadir.exists());

    executor.start().unwrap();
    executor.stop();
    assert!(!datadir.exists());
}

#[test]
fn test_configured_datadir_is_kept() {
    let dir = TempDir::new().unwrap();
    let exe = fake_server(&dir, "7.2.4", READY_THEN_IDLE);
    let datadir = dir.path().join("data");
    let cfg = ResolvedConfig { datadir: Some(datadir.clone()), ..config(exe, Duration::from_secs(10), Duration::from_secs(5)) };
    let mut executor = RedisExecutor::new(cfg, 6411).unwrap().with_readiness(Readiness::LogLine);

    assert_eq!(executor.datadir(), datadir.as_path());
    assert_eq!(executor.unixsocket(), Some(datadir.join("redis.6411.sock")));
    executor.start().unwrap();
    executor.stop();
    assert!(datadir.exists());
}

#[test]
fn test_overlong_socket_path_is_misconfigured() {
    let dir = TempDir::new().unwrap();
    let deep = dir.path().join("d".repeat(120));
    let cfg = ResolvedConfig { datadir: Some(deep), ..Default::default() };
    assert!(matches!(RedisExecutor::new(cfg, 6412), Err(RediprocError::Misconfigured(_))));
}

#[test]
fn test_connection_attributes() {
    let cfg = ResolvedConfig {
        host: "localhost".to_string(),
        username: Some("tester".to_string()),
        password: Some("s3cret".to_string()),
        ..Default::default()
    };
    let executor = RedisExecutor::new(cfg, 6413).unwrap();
    assert_eq!(executor.host(), "localhost");
    assert_eq!(executor.port(), 6413);
    assert_eq!(executor.username(), Some("tester"));
    assert_eq!(executor.password(), Some("s3cret"));
    assert_eq!(executor.unixsocket(), Some(executor.datadir().join("redis.6413.sock")));
}
