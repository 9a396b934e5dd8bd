use log::debug;
use rand::seq::SliceRandom;
use rediproc_common::{PortSpec, RediprocError, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::net::{TcpListener, ToSocketAddrs};
use std::path::{Path, PathBuf};

/// Prefix of claim marker files and of the line written into them.
pub const CLAIM_PREFIX: &str = "redis";

/// How many OS-assigned ports to draw before giving up on an `Any` spec
/// whose draws all land in the excluded set.
const ANY_PORT_DRAWS: usize = 64;

/// Path of the claim marker for `port` inside `claim_dir`.
pub fn claim_path(claim_dir: &Path, port: u16) -> PathBuf {
    claim_dir.join(format!("{CLAIM_PREFIX}-{port}.port"))
}

/// Ask the OS for a free ephemeral port by binding to port 0.
pub fn ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// `true` when `port` can be bound on every address `host` resolves to.
///
/// Addresses this machine cannot bind at all (an IPv6 `localhost` on a host
/// without IPv6) are skipped, as long as one address binds.
pub fn is_port_available(host: &str, port: u16) -> bool {
    let Ok(addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    let mut bound = false;
    for addr in addrs {
        match TcpListener::bind(addr) {
            Ok(_) => bound = true,
            Err(e) if e.kind() == ErrorKind::AddrInUse => return false,
            Err(e) => debug!("cannot probe {addr}: {e}"),
        }
    }
    bound
}

/// Turn `spec` into one candidate port outside `excluded` and free on `host`,
/// or `None` when the spec has nothing left to offer.
///
/// Exact ports are returned without probing: a busy exact port is reported
/// by the server failing to start.
pub fn resolve_candidate(spec: &PortSpec, host: &str, excluded: &HashSet<u16>) -> Option<u16> {
    if let PortSpec::Exact(port) = spec {
        return (*port != 0 && !excluded.contains(port)).then_some(*port);
    }
    match spec.pool() {
        None => (0..ANY_PORT_DRAWS)
            .filter_map(|_| ephemeral_port().ok())
            .find(|port| !excluded.contains(port) && is_port_available(host, *port)),
        Some(pool) => {
            let mut candidates: Vec<u16> =
                pool.into_iter().filter(|port| !excluded.contains(port)).collect();
            candidates.shuffle(&mut rand::thread_rng());
            candidates.into_iter().find(|port| is_port_available(host, *port))
        }
    }
}

/// Exclusively create the claim marker for `port`.
///
/// Fails with `ErrorKind::AlreadyExists` when another allocation, in this or
/// any other process sharing `claim_dir`, got there first.
pub fn claim(claim_dir: &Path, port: u16) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(claim_path(claim_dir, port))?;
    writeln!(file, "{CLAIM_PREFIX}_port {port}")
}

/// Allocate one port matching `spec`, not in `excluded` and free on `host`,
/// and claim it in `claim_dir`.
///
/// Each claim collision counts as one attempt and the colliding port joins
/// the excluded set before the next draw. Gives up with
/// [`RediprocError::PortAllocation`] after `max_attempts` collisions, or as
/// soon as the spec yields no further candidate.
pub fn allocate(
    spec: &PortSpec,
    host: &str,
    excluded: &HashSet<u16>,
    claim_dir: &Path,
    max_attempts: u32,
) -> Result<u16> {
    let mut excluded = excluded.clone();
    let mut attempted: Vec<u16> = Vec::new();
    let mut attempts = 0;

    while attempts < max_attempts {
        let port = resolve_candidate(spec, host, &excluded).ok_or_else(|| RediprocError::PortAllocation {
            attempts,
            ports: attempted.clone(),
        })?;
        attempts += 1;
        attempted.push(port);
        excluded.insert(port);

        match claim(claim_dir, port) {
            Ok(()) => {
                debug!("claimed port {port} in {}", claim_dir.display());
                return Ok(port);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("port {port} already claimed (attempt {attempts}/{max_attempts})");
            }
            Err(e) => {
                return Err(RediprocError::Io(format!(
                    "cannot write claim file {}: {e}",
                    claim_path(claim_dir, port).display()
                )));
            }
        }
    }

    Err(RediprocError::PortAllocation { attempts, ports: attempted })
}
