use std::time::Duration;
use rediproc_common::{ExecutorState, RediprocError};

#[test]
fn test_port_allocation_names_attempted_ports() {
    let err = RediprocError::PortAllocation { attempts: 2, ports: vec![4002, 4003] };
    assert_eq!(
        err.to_string(),
        "Attempted 2 times to select ports. All attempted ports: [4002, 4003] are already in use, probably by other instances of the test."
    );
}

#[test]
fn test_error_equality() {
    let err1 = RediprocError::Config("bad".to_string());
    let err2 = RediprocError::Config("bad".to_string());
    let err3 = RediprocError::Misconfigured("bad".to_string());

    assert_eq!(err1, err2);
    assert_ne!(err1, err3);
}

#[test]
fn test_startup_timeout_carries_command_and_output() {
    let err = RediprocError::StartupTimeout {
        timeout: Duration::from_millis(1500),
        command: "redis-server --port 6390".to_string(),
        output: "starting up".to_string(),
    };
    let text = err.to_string();
    assert!(text.starts_with("redis-server did not become ready within 1.5s"));
    assert!(text.contains("command: redis-server --port 6390"));
    assert!(text.ends_with("output:\nstarting up"));
}

#[test]
fn test_process_exited_early_with_and_without_code() {
    let with_code = RediprocError::ProcessExitedEarly {
        code: Some(3),
        command: "redis-server".to_string(),
        output: String::new(),
    };
    assert!(with_code.to_string().contains("(exit code 3)"));

    let without_code = RediprocError::ProcessExitedEarly {
        code: None,
        command: "redis-server".to_string(),
        output: String::new(),
    };
    assert!(without_code.to_string().contains("(no exit code)"));
}

#[test]
fn test_unsupported_version() {
    let err = RediprocError::UnsupportedVersion { found: "2.4.17".to_string() };
    assert_eq!(err.to_string(), "redis-server 2.4.17 is not supported, 2.6.0 or newer is required");
}

#[test]
fn test_invalid_state() {
    let err = RediprocError::InvalidState { state: ExecutorState::Stopped, action: "start" };
    assert_eq!(err.to_string(), "Cannot start an executor that is stopped");
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: RediprocError = io.into();
    assert_eq!(err, RediprocError::Io("denied".to_string()));
}
