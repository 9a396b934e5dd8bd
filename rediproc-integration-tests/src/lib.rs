//! Shared helpers for the end-to-end tests in `tests/`.

use rediproc_common::ResolvedConfig;
use std::path::PathBuf;
use std::time::Duration;

/// The `redis-server` on `PATH`, if any. End-to-end tests skip without one.
pub fn redis_server() -> Option<PathBuf> {
    match which::which("redis-server") {
        Ok(path) => Some(path),
        Err(_) => {
            eprintln!("redis-server not found in PATH; skipping");
            None
        }
    }
}

/// Config for a throwaway server: one database, no persistence.
pub fn test_config(executable: PathBuf) -> ResolvedConfig {
    ResolvedConfig {
        executable,
        db_count: 1,
        startup_timeout: Duration::from_secs(30),
        shutdown_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
