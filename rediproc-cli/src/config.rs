use rediproc_common::{ConfigOverrides, RediprocError, Result};
use std::path::Path;

/// Read a JSON config file. Keys match [`ConfigOverrides`] field names.
pub fn load_config_file(path: &Path) -> Result<ConfigOverrides> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| RediprocError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| RediprocError::Config(format!("cannot parse {}: {e}", path.display())))
}
