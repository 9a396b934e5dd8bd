use crate::{RediprocError, Result};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A request for a TCP port.
///
/// Textual form, as accepted by the CLI and the config file:
///
/// | text                  | spec                                 |
/// |-----------------------|--------------------------------------|
/// | `any` or `-1`         | any free port the OS hands out       |
/// | `6380`                | exactly 6380                         |
/// | `2000-3000`           | random free port in the range        |
/// | `4002,4003`           | random free port from the set        |
/// | `2000-3000 4002,4003` | random free port from all items      |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    Any,
    Exact(u16),
    /// Inclusive on both ends.
    Range(u16, u16),
    Set(BTreeSet<u16>),
    List(Vec<PortSpec>),
}

impl PortSpec {
    /// Every port this spec may resolve to, or `None` when any port will do.
    ///
    /// A list containing `Any` is itself unbounded. Port 0 is never a candidate.
    pub fn pool(&self) -> Option<BTreeSet<u16>> {
        let mut pool = BTreeSet::new();
        match self {
            PortSpec::Any => return None,
            PortSpec::Exact(port) => {
                pool.insert(*port);
            }
            PortSpec::Range(start, end) => pool.extend(*start..=*end),
            PortSpec::Set(ports) => pool.extend(ports.iter().copied()),
            PortSpec::List(items) => {
                for item in items {
                    pool.extend(item.pool()?);
                }
            }
        }
        pool.remove(&0);
        Some(pool)
    }

    fn parse_item(item: &str) -> Result<PortSpec> {
        let item = item.trim_matches(|c| c == '{' || c == '}');
        if item.eq_ignore_ascii_case("any") || item == "-1" {
            return Ok(PortSpec::Any);
        }
        if item.contains(',') {
            let ports = item
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(parse_port)
                .collect::<Result<BTreeSet<u16>>>()?;
            if ports.is_empty() {
                return Err(RediprocError::Config(format!("empty port set {item:?}")));
            }
            return Ok(PortSpec::Set(ports));
        }
        if let Some((start, end)) = item.split_once('-') {
            let (start, end) = (parse_port(start)?, parse_port(end)?);
            if start > end {
                return Err(RediprocError::Config(format!(
                    "port range {start}-{end} is reversed"
                )));
            }
            return Ok(PortSpec::Range(start, end));
        }
        parse_port(item).map(PortSpec::Exact)
    }
}

fn parse_port(text: &str) -> Result<u16> {
    text.trim()
        .parse::<u16>()
        .map_err(|_| RediprocError::Config(format!("invalid port {text:?}")))
}

impl FromStr for PortSpec {
    type Err = RediprocError;

    fn from_str(s: &str) -> Result<Self> {
        let items: Vec<&str> = s.split_whitespace().collect();
        match items.as_slice() {
            [] => Err(RediprocError::Config("empty port spec".to_string())),
            [single] => PortSpec::parse_item(single),
            many => many
                .iter()
                .map(|item| PortSpec::parse_item(item))
                .collect::<Result<Vec<_>>>()
                .map(PortSpec::List),
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Any => f.write_str("any"),
            PortSpec::Exact(port) => write!(f, "{port}"),
            PortSpec::Range(start, end) => write!(f, "{start}-{end}"),
            // A trailing comma keeps a one-element set from reading back as exact.
            PortSpec::Set(ports) if ports.len() == 1 => write!(f, "{},", ports.iter().next().unwrap_or(&0)),
            PortSpec::Set(ports) => {
                let joined: Vec<String> = ports.iter().map(u16::to_string).collect();
                f.write_str(&joined.join(","))
            }
            PortSpec::List(items) => {
                let joined: Vec<String> = items.iter().map(PortSpec::to_string).collect();
                f.write_str(&joined.join(" "))
            }
        }
    }
}

impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PortSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(-1) => Ok(PortSpec::Any),
            Raw::Number(n) => u16::try_from(n)
                .map(PortSpec::Exact)
                .map_err(|_| de::Error::custom(format!("port {n} is out of range"))),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}
