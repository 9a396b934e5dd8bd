use crate::port;
use log::debug;
use rediproc_common::{PortSpec, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Environment variable naming a claim directory shared by parallel workers.
pub const SESSION_DIR_ENV: &str = "REDIPROC_SESSION_DIR";

/// Owner of the claim directory for one test session.
///
/// Claim markers are never deleted individually; they go away with the
/// directory. A temporary session removes its directory on drop. A shared
/// session leaves cleanup to whoever created the directory.
pub struct ClaimSession {
    dir: PathBuf,
    // Kept alive so the directory outlives every allocation of the session.
    _owned: Option<TempDir>,
}

impl ClaimSession {
    /// Use `$REDIPROC_SESSION_DIR` when set, a fresh temporary directory otherwise.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(SESSION_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::shared(dir),
            _ => Self::temporary(),
        }
    }

    /// Join a directory that other processes may be allocating from too.
    pub fn shared(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        debug!("using shared claim directory {}", dir.display());
        Ok(ClaimSession { dir, _owned: None })
    }

    pub fn temporary() -> Result<Self> {
        let owned = tempfile::Builder::new().prefix("rediproc-session-").tempdir()?;
        let dir = owned.path().to_path_buf();
        debug!("created claim directory {}", dir.display());
        Ok(ClaimSession { dir, _owned: Some(owned) })
    }

    pub fn claim_dir(&self) -> &Path {
        &self.dir
    }

    /// [`port::allocate`] against this session's claim directory.
    pub fn allocate(&self, spec: &PortSpec, host: &str, excluded: &HashSet<u16>, max_attempts: u32) -> Result<u16> {
        port::allocate(spec, host, excluded, &self.dir, max_attempts)
    }
}
