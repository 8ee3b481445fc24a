/// Core abstractions shared by every client strategy
pub mod balancer;
pub mod command;
pub mod connection;
pub mod lifecycle;
pub mod pool;
pub mod reply;
pub mod resp;
pub mod sentinel;
pub mod topology;
pub mod write_pool;

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;

/// A backend member, identified by `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse a single `host:port` string.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::invalid(value, "expected host:port"))?;
        if host.is_empty() {
            return Err(ConfigError::invalid(value, "empty host"));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| ConfigError::invalid(value, format!("bad port: {}", e)))?;
        Ok(Self::new(host, port))
    }

    /// Parse a comma separated endpoint list, skipping blank entries and duplicates.
    pub fn parse_list(csv: &str) -> Result<Vec<Self>, ConfigError> {
        let mut endpoints: Vec<Endpoint> = Vec::new();
        for item in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let endpoint = Self::parse(item)?;
            if !endpoints.contains(&endpoint) {
                endpoints.push(endpoint);
            }
        }
        Ok(endpoints)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
