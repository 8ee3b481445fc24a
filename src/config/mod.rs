/// Configuration management for tejido
///
/// Configuration is a flat `key = value` map. Files may be written either as
/// Java-style properties or as TOML; nested TOML tables flatten to dotted
/// keys, so `[app.server] list = "a:6379"` becomes `app.server.list`.
pub mod client;

pub use crate::error::ConfigError;
pub use client::{
    ClientConfig, ClientType, ConnectionConfig, HealthConfig, PoolConfig,
    RetryConfig, ShardConfig, TopologyConfig, ValidatorSpec, WriteAllConfig, WritePoolConfig,
};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Recognized option names
pub mod keys {
    pub const CLIENT_NAME: &str = "client.name";
    pub const CLIENT_TYPE: &str = "client.type";
    pub const SERVER_NAMESPACE: &str = "server.namespace";

    pub const SERVER_LIST: &str = "server.list";
    pub const SENTINEL_LIST: &str = "sentinel.list";
    pub const SENTINEL_MASTER_NAME: &str = "sentinel.master.name";

    pub const POOL_MAX_ACTIVE: &str = "pool.maxActive";
    pub const POOL_MAX_IDLE: &str = "pool.maxIdle";
    pub const POOL_MIN_IDLE: &str = "pool.minIdle";
    pub const POOL_MAX_WAIT: &str = "pool.maxWait";
    pub const POOL_TEST_ON_BORROW: &str = "pool.testOnBorrow";
    pub const POOL_TEST_ON_RETURN: &str = "pool.testOnReturn";
    pub const POOL_TEST_WHILE_IDLE: &str = "pool.testWhileIdle";
    pub const POOL_TIME_BETWEEN_EVICTION_RUNS: &str = "pool.timeBetweenEvictionRunsMillis";
    pub const POOL_MIN_EVICTABLE_IDLE: &str = "pool.minEvictableIdleTimeMillis";
    pub const POOL_SOFT_MIN_EVICTABLE_IDLE: &str = "pool.softMinEvictableIdleTimeMillis";
    pub const POOL_NUM_TESTS_PER_EVICTION_RUN: &str = "pool.numTestsPerEvictionRun";

    pub const SERVER_TIMEOUT: &str = "server.timeout";
    pub const SERVER_DATABASE: &str = "server.database";
    pub const SERVER_PASSWORD: &str = "server.password";
    pub const SERVER_LOAD_BALANCER: &str = "server.loadBalancer";

    pub const RETRY_COUNT: &str = "server.retry.count";
    pub const RETRY_SLEEP: &str = "server.retry.sleeptime";

    pub const CHECK_INITIAL_DELAY: &str = "check.schedule.initial.delay";
    pub const CHECK_DELAY: &str = "check.schedule.delay";
    pub const CHECK_TASK: &str = "check.task";
    pub const VALIDATE_CLASS: &str = "validate.class";
    pub const VALIDATE_KEY: &str = "validate.key";
    pub const VALIDATE_VALUE: &str = "validate.value";
    pub const VERSION_KEY: &str = "version.key";

    pub const SERIALIZABLE: &str = "serializable";
    pub const COMPRESS_THRESHOLD: &str = "compress.threshold";
    pub const MAX_BYTE_SIZE: &str = "max.byte.size";

    pub const SHARED_CLIENT_LIST: &str = "shared.client.list";
    pub const SHARED_ALGORITHM: &str = "shared.algorithm";
    pub const SHARED_NODE: &str = "shared.node";

    pub const WRITEALL_THROW_ON_ERROR: &str = "writeall.throwExceptionWhenWriteError";
    pub const WRITEALL_ASYNC: &str = "writeall.asyncWrite";
    pub const WRITEALL_THREAD_POOL: &str = "writeall.thread.pool";
}

/// Flat, ordered option map
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file; `.toml` files are flattened, anything else
    /// is read as `key=value` properties.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Ok(Self::from_properties_str(&content)),
        }
    }

    /// Parse TOML, flattening nested tables into dotted keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let mut props = Self::new();
        flatten_into(&mut props.entries, "", &toml::Value::Table(table));
        Ok(props)
    }

    /// Parse `key=value` lines; `#` and `!` start comments.
    pub fn from_properties_str(content: &str) -> Self {
        let mut props = Self::new();
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let split = line
                .find(|c| c == '=' || c == ':')
                .map(|idx| (&line[..idx], &line[idx + 1..]));
            if let Some((key, value)) = split {
                props.set(key.trim(), value.trim());
            }
        }
        props
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn with<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.set(key, value);
        self
    }

    /// Trimmed value; blank values read as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .ok_or_else(|| ConfigError::Missing(key.to_string()))
    }

    /// Parse an optional value
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|e| ConfigError::invalid(key, format!("{:?}: {}", raw, e)))
            })
            .transpose()
    }

    pub fn parse_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    /// Boolean option; accepts `true`/`false` in any case.
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) if raw.eq_ignore_ascii_case("true") => Ok(true),
            Some(raw) if raw.eq_ignore_ascii_case("false") => Ok(false),
            Some(raw) => Err(ConfigError::invalid(
                key,
                format!("{:?} is not a boolean", raw),
            )),
        }
    }

    /// Every `"<name>."`-prefixed entry with the prefix removed.
    ///
    /// `client.name` defaults to `name` when the section does not set it.
    pub fn scoped(&self, name: &str) -> Properties {
        let prefix = format!("{}.", name);
        let mut scoped = Properties::new();
        for (key, value) in &self.entries {
            if let Some(rest) = key.strip_prefix(&prefix) {
                scoped.set(rest, value.clone());
            }
        }
        if scoped.get(keys::CLIENT_NAME).is_none() {
            scoped.set(keys::CLIENT_NAME, name);
        }
        scoped
    }

    /// Copy of `self` with `other`'s entries taking precedence
    pub fn overlay(&self, other: &Properties) -> Properties {
        let mut merged = self.clone();
        for (key, value) in &other.entries {
            merged.set(key.clone(), value.clone());
        }
        merged
    }

    /// Names of the client sections present in a root configuration.
    pub fn client_names(&self) -> Vec<String> {
        const MARKERS: [&str; 4] = [
            keys::CLIENT_TYPE,
            keys::SERVER_LIST,
            keys::SENTINEL_LIST,
            keys::SHARED_CLIENT_LIST,
        ];
        let mut names: Vec<String> = Vec::new();
        for key in self.entries.keys() {
            for marker in MARKERS {
                if let Some(prefix) = key.strip_suffix(marker).and_then(|p| p.strip_suffix('.')) {
                    if !prefix.is_empty() && !names.iter().any(|n| n == prefix) {
                        names.push(prefix.to_string());
                    }
                }
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut props = Properties::new();
        for (key, value) in iter {
            props.set(key, value);
        }
        props
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, value: &toml::Value) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        toml::Value::Table(table) => {
            for (key, value) in table {
                flatten_into(out, &join(key), value);
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        toml::Value::Array(items) => {
            let joined: Vec<String> = items
                .iter()
                .map(|item| match item {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            out.insert(prefix.to_string(), joined.join(","));
        }
        other => {
            out.insert(prefix.to_string(), other.to_string());
        }
    }
}

/// Example configuration printed by the CLI
pub fn example_config() -> &'static str {
    r#"# tejido example configuration
#
# Each top-level table is one named client.

[cache]
client.type = "default"
server.list = "10.0.0.11:6379,10.0.0.12:6379"
server.namespace = "app"
server.timeout = 2000
server.loadBalancer = "roundrobin"
server.retry.count = 2
server.retry.sleeptime = 50
sentinel.list = "10.0.0.21:26379,10.0.0.22:26379"
sentinel.master.name = "mymaster"
pool.maxActive = 16
pool.maxIdle = 8
check.schedule.initial.delay = 2
check.schedule.delay = 3
compress.threshold = 1024

[replicas]
client.type = "writeallreadany"
server.list = "10.0.1.11:6379,10.0.1.12:6379"
check.task = "version"
version.key = "version.No"
writeall.thread.pool = "2;4;64;60"

[sharded]
client.type = "shared"
shared.client.list = "shard0,shard1"
shared.node = 160

[shard0]
client.type = "readonly"
server.list = "10.0.2.11:6379"

[shard1]
client.type = "readonly"
server.list = "10.0.2.12:6379"
"#
}
