use rediproc_common::{RediprocError, ResolvedConfig, Result};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::Path;
use std::process::Command;

/// `major.minor.patch` as reported by `redis-server --version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        ServerVersion { major, minor, patch }
    }

    /// Pick the `v=X.Y.Z` token out of `--version` output.
    pub fn parse(output: &str) -> Option<Self> {
        let token = output.split_whitespace().find_map(|word| word.strip_prefix("v="))?;
        let mut parts = token.split('.').map(|p| p.parse::<u32>().ok());
        let major = parts.next()??;
        let minor = parts.next().flatten().unwrap_or(0);
        let patch = parts.next().flatten().unwrap_or(0);
        Some(ServerVersion { major, minor, patch })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

pub const MIN_VERSION: ServerVersion = ServerVersion::new(2, 6, 0);

/// Run `<executable> --version` and parse the result.
///
/// A missing or non-executable binary is reported as an early exit, the same
/// way a server that dies during startup is.
pub fn server_version(executable: &Path) -> Result<ServerVersion> {
    let command = format_command(executable, &[OsString::from("--version")]);
    let output = Command::new(executable).arg("--version").output().map_err(|e| {
        RediprocError::ProcessExitedEarly {
            code: None,
            command: command.clone(),
            output: format!("failed to spawn: {e}"),
        }
    })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        return Err(RediprocError::ProcessExitedEarly {
            code: output.status.code(),
            command,
            output: format!("{stdout}{}", String::from_utf8_lossy(&output.stderr)),
        });
    }
    ServerVersion::parse(&stdout).ok_or_else(|| {
        RediprocError::Misconfigured(format!(
            "cannot read a version from `{command}` output: {}",
            stdout.trim()
        ))
    })
}

/// Where the server keeps its per-port files inside the data directory.
pub struct ServerFiles {
    pub pidfile: OsString,
    pub unixsocket: OsString,
    pub dbfilename: String,
}

impl ServerFiles {
    pub fn new(datadir: &Path, port: u16) -> Self {
        ServerFiles {
            pidfile: datadir.join(format!("redis-server.{port}.pid")).into_os_string(),
            unixsocket: datadir.join(format!("redis.{port}.sock")).into_os_string(),
            dbfilename: format!("dump.{port}.rdb"),
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Build the redis-server argument list. Deterministic for a given input.
///
/// The save rule is one argument from 7.0 on; older servers take each word
/// of it as a separate argument.
pub fn build_args(
    config: &ResolvedConfig,
    port: u16,
    datadir: &Path,
    version: ServerVersion,
) -> Vec<OsString> {
    let files = ServerFiles::new(datadir, port);
    let mut args: Vec<OsString> = Vec::new();
    let mut push = |flag: &str, value: &OsStr| {
        args.push(OsString::from(flag));
        args.push(value.to_os_string());
    };

    push("--daemonize", OsStr::new("no"));
    push("--pidfile", files.pidfile.as_os_str());
    push("--unixsocket", files.unixsocket.as_os_str());
    push("--dbfilename", OsStr::new(&files.dbfilename));
    push("--loglevel", OsStr::new(config.loglevel.as_str()));
    push("--syslog-enabled", OsStr::new(yes_no(config.syslog)));
    push("--bind", OsStr::new(&config.host));
    push("--port", OsStr::new(&port.to_string()));
    push("--dir", datadir.as_os_str());
    push("--timeout", OsStr::new(&config.timeout.to_string()));
    push("--databases", OsStr::new(&config.db_count.to_string()));
    push("--rdbcompression", OsStr::new(yes_no(config.compression)));
    push("--rdbchecksum", OsStr::new(yes_no(config.rdbchecksum)));

    if let Some(password) = &config.password {
        push("--requirepass", OsStr::new(password));
    }
    if let Some(username) = &config.username {
        let secret = match &config.password {
            Some(password) => format!(">{password}"),
            None => "nopass".to_string(),
        };
        // redis-server quotes each argv element, so every ACL rule is its own argument.
        args.push(OsString::from("--user"));
        for rule in [username.as_str(), "on", secret.as_str(), "~*", "&*", "+@all"] {
            args.push(OsString::from(rule));
        }
    }

    args.push(OsString::from("--save"));
    if version.major >= 7 || config.save.trim().is_empty() {
        args.push(OsString::from(config.save.trim()));
    } else {
        args.extend(config.save.split_whitespace().map(OsString::from));
    }

    for module in &config.modules {
        args.push(OsString::from("--loadmodule"));
        args.push(module.as_os_str().to_os_string());
    }
    args
}

/// Render a command line for logs and error messages.
pub fn format_command(executable: &Path, args: &[OsString]) -> String {
    let mut parts = vec![executable.display().to_string()];
    for arg in args {
        let arg = arg.to_string_lossy();
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            parts.push(format!("{arg:?}"));
        } else {
            parts.push(arg.into_owned());
        }
    }
    parts.join(" ")
}
