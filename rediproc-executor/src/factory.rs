use crate::{ClaimSession, RedisExecutor};
use log::info;
use rediproc_common::{PortSpec, ResolvedConfig, Result};
use std::collections::HashSet;

/// Allocate a port for `config`, then launch and wait for a server on it.
///
/// The port comes from `config.port` (any free port when unset) and is
/// claimed in `session`'s claim directory, trying at most
/// `config.port_search_count` times. Setup errors propagate unchanged; the
/// caller decides whether a retry with a fresh port makes sense.
pub fn redis_proc(session: &ClaimSession, config: &ResolvedConfig) -> Result<RedisExecutor> {
    let spec = config.port.clone().unwrap_or(PortSpec::Any);
    let port = session.allocate(&spec, &config.host, &HashSet::new(), config.port_search_count)?;
    info!("allocated port {port} for redis-server (spec {spec})");

    let mut executor = RedisExecutor::new(config.clone(), port)?;
    executor.start()?;
    Ok(executor)
}
