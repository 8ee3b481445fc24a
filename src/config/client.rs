/// Typed per-client configuration parsed from [`Properties`]
use super::{keys, Properties};
use crate::codec::{Serializer, ValueCodec};
use crate::core::balancer::LoadBalancerKind;
use crate::core::connection::TcpConnector;
use crate::core::Endpoint;
use crate::error::ConfigError;
use crate::health::CheckPolicy;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_VERSION_KEY: &str = "version.No";
pub const DEFAULT_SHARD_NODES: usize = 160;

/// Which strategy a client section builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    /// Sentinel-mastered reads/writes split
    #[default]
    Default,
    /// Everything through the sentinel-resolved master
    Sentinel,
    ReadOnly,
    WriteAllReadAny,
    Shared,
}

impl FromStr for ClientType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(ClientType::Default),
            "sentinel" => Ok(ClientType::Sentinel),
            "readonly" => Ok(ClientType::ReadOnly),
            "writeallreadany" => Ok(ClientType::WriteAllReadAny),
            "shared" => Ok(ClientType::Shared),
            other => Err(ConfigError::invalid(
                keys::CLIENT_TYPE,
                format!("unknown client type {:?}", other),
            )),
        }
    }
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientType::Default => "default",
            ClientType::Sentinel => "sentinel",
            ClientType::ReadOnly => "readonly",
            ClientType::WriteAllReadAny => "writeallreadany",
            ClientType::Shared => "shared",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyConfig {
    pub servers: Vec<Endpoint>,
    pub sentinels: Vec<Endpoint>,
    pub master_name: Option<String>,
}

/// Connection pool settings, named after the commons-pool options they mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Checked-out connection cap; non-positive means unbounded
    pub max_active: i32,
    /// Idle connection cap; negative means unbounded
    pub max_idle: i32,
    pub min_idle: i32,
    /// Longest wait for a free slot; `None` waits forever
    pub max_wait: Option<Duration>,
    pub test_on_borrow: bool,
    pub test_on_return: bool,
    pub test_while_idle: bool,
    /// Evictor period; `None` disables the evictor
    pub time_between_eviction_runs: Option<Duration>,
    pub min_evictable_idle: Option<Duration>,
    pub soft_min_evictable_idle: Option<Duration>,
    /// Idle connections examined per run; negative `-n` means one in `n`
    pub num_tests_per_eviction_run: i32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 8,
            max_idle: 8,
            min_idle: 0,
            max_wait: None,
            test_on_borrow: false,
            test_on_return: false,
            test_while_idle: false,
            time_between_eviction_runs: None,
            min_evictable_idle: Some(Duration::from_secs(30 * 60)),
            soft_min_evictable_idle: None,
            num_tests_per_eviction_run: 3,
        }
    }
}

impl PoolConfig {
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let defaults = PoolConfig::default();
        Ok(Self {
            max_active: props.parse_or(keys::POOL_MAX_ACTIVE, defaults.max_active)?,
            max_idle: props.parse_or(keys::POOL_MAX_IDLE, defaults.max_idle)?,
            min_idle: props.parse_or(keys::POOL_MIN_IDLE, defaults.min_idle)?,
            max_wait: millis(props, keys::POOL_MAX_WAIT, defaults.max_wait)?,
            test_on_borrow: props.flag(keys::POOL_TEST_ON_BORROW, defaults.test_on_borrow)?,
            test_on_return: props.flag(keys::POOL_TEST_ON_RETURN, defaults.test_on_return)?,
            test_while_idle: props.flag(keys::POOL_TEST_WHILE_IDLE, defaults.test_while_idle)?,
            time_between_eviction_runs: millis(
                props,
                keys::POOL_TIME_BETWEEN_EVICTION_RUNS,
                defaults.time_between_eviction_runs,
            )?,
            min_evictable_idle: millis(
                props,
                keys::POOL_MIN_EVICTABLE_IDLE,
                defaults.min_evictable_idle,
            )?,
            soft_min_evictable_idle: millis(
                props,
                keys::POOL_SOFT_MIN_EVICTABLE_IDLE,
                defaults.soft_min_evictable_idle,
            )?,
            num_tests_per_eviction_run: props.parse_or(
                keys::POOL_NUM_TESTS_PER_EVICTION_RUN,
                defaults.num_tests_per_eviction_run,
            )?,
        })
    }
}

/// Milliseconds option; non-positive disables
fn millis(
    props: &Properties,
    key: &str,
    default: Option<Duration>,
) -> Result<Option<Duration>, ConfigError> {
    Ok(match props.parse::<i64>(key)? {
        None => default,
        Some(ms) if ms <= 0 => None,
        Some(ms) => Some(Duration::from_millis(ms as u64)),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connect and socket timeout
    pub timeout: Duration,
    pub database: u32,
    pub password: Option<String>,
    pub load_balancer: LoadBalancerKind,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2000),
            database: 0,
            password: None,
            load_balancer: LoadBalancerKind::Random,
        }
    }
}

impl ConnectionConfig {
    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.timeout)
            .with_password(self.password.clone())
            .with_database(self.database)
    }

    /// Sentinels share the timeout but never see the password or database
    pub fn sentinel_connector(&self) -> TcpConnector {
        TcpConnector::new(self.timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryConfig {
    /// Additional attempts after the first one
    pub count: usize,
    /// Pause between attempts
    pub sleep: Duration,
}

/// Which validate predicate the supervisor runs after `PING`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidatorSpec {
    #[default]
    Noop,
    KeyEquality {
        key: String,
        value: String,
    },
    /// A validator registered on the client factory under this name
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub initial_delay: Duration,
    pub delay: Duration,
    pub policy: CheckPolicy,
    pub validator: ValidatorSpec,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            delay: Duration::from_secs(3),
            policy: CheckPolicy::Plain,
            validator: ValidatorSpec::Noop,
        }
    }
}

impl HealthConfig {
    fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let defaults = HealthConfig::default();
        let initial_delay = props
            .parse::<u64>(keys::CHECK_INITIAL_DELAY)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.initial_delay);
        let delay = props
            .parse::<u64>(keys::CHECK_DELAY)?
            .map(Duration::from_secs)
            .unwrap_or(defaults.delay);
        if delay.is_zero() {
            return Err(ConfigError::invalid(keys::CHECK_DELAY, "must be positive"));
        }

        let policy = match props.get(keys::CHECK_TASK).map(str::to_ascii_lowercase) {
            None => CheckPolicy::Plain,
            Some(task) if task == "plain" => CheckPolicy::Plain,
            Some(task) if task == "version" => CheckPolicy::Version {
                key: props
                    .get_or(keys::VERSION_KEY, DEFAULT_VERSION_KEY)
                    .to_string(),
            },
            Some(task) => {
                warn!("Unknown check.task {:?}, using the plain check", task);
                CheckPolicy::Plain
            }
        };

        let validator = match props.get(keys::VALIDATE_CLASS) {
            None => ValidatorSpec::Noop,
            Some(name) if name.eq_ignore_ascii_case("noop") => ValidatorSpec::Noop,
            Some(name) if name.eq_ignore_ascii_case("key-equality") => {
                ValidatorSpec::KeyEquality {
                    key: props.require(keys::VALIDATE_KEY)?.to_string(),
                    value: props.require(keys::VALIDATE_VALUE)?.to_string(),
                }
            }
            Some(name) => ValidatorSpec::Custom(name.to_string()),
        };

        Ok(Self {
            initial_delay,
            delay,
            policy,
            validator,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardConfig {
    /// Child client names, in ring order
    pub clients: Vec<String>,
    /// Virtual nodes per child
    pub nodes: usize,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
            nodes: DEFAULT_SHARD_NODES,
        }
    }
}

/// Fan-out worker pool: `core;max;queue;keepAliveSec`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePoolConfig {
    pub core: usize,
    pub max: usize,
    pub queue: usize,
    pub keep_alive: Duration,
}

impl FromStr for WritePoolConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(';').map(str::trim).collect();
        let [core, max, queue, keep_alive] = parts.as_slice() else {
            return Err(ConfigError::invalid(
                keys::WRITEALL_THREAD_POOL,
                format!("expected core;max;queue;keepAliveSec, got {:?}", s),
            ));
        };
        let number = |raw: &str| {
            raw.parse::<usize>().map_err(|e| {
                ConfigError::invalid(keys::WRITEALL_THREAD_POOL, format!("{:?}: {}", raw, e))
            })
        };
        let config = Self {
            core: number(*core)?,
            max: number(*max)?,
            queue: number(*queue)?,
            keep_alive: Duration::from_secs(number(*keep_alive)? as u64),
        };
        if config.max == 0 || config.core > config.max {
            return Err(ConfigError::invalid(
                keys::WRITEALL_THREAD_POOL,
                "need 0 <= core <= max and max > 0",
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteAllConfig {
    pub throw_on_write_error: bool,
    pub async_write: bool,
    pub pool: Option<WritePoolConfig>,
}

/// Everything one named client needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub name: String,
    pub client_type: ClientType,
    pub namespace: String,
    pub topology: TopologyConfig,
    pub pool: PoolConfig,
    pub connection: ConnectionConfig,
    pub retry: RetryConfig,
    pub health: HealthConfig,
    pub codec: ValueCodec,
    pub shard: ShardConfig,
    pub write_all: WriteAllConfig,
}

impl ClientConfig {
    /// Parse and validate a client section (keys already scoped).
    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let name = props.require(keys::CLIENT_NAME)?.to_string();
        let client_type = props.parse_or(keys::CLIENT_TYPE, ClientType::Default)?;

        let topology = TopologyConfig {
            servers: Endpoint::parse_list(props.get_or(keys::SERVER_LIST, ""))?,
            sentinels: Endpoint::parse_list(props.get_or(keys::SENTINEL_LIST, ""))?,
            master_name: props.get(keys::SENTINEL_MASTER_NAME).map(str::to_string),
        };

        let connection = ConnectionConfig {
            timeout: Duration::from_millis(props.parse_or(keys::SERVER_TIMEOUT, 2000u64)?),
            database: props.parse_or(keys::SERVER_DATABASE, 0u32)?,
            password: props.get(keys::SERVER_PASSWORD).map(str::to_string),
            load_balancer: props.parse_or(keys::SERVER_LOAD_BALANCER, LoadBalancerKind::Random)?,
        };

        let retry = RetryConfig {
            count: props.parse_or(keys::RETRY_COUNT, 0usize)?,
            sleep: Duration::from_millis(props.parse_or(keys::RETRY_SLEEP, 0u64)?),
        };

        let codec = ValueCodec::new(
            props.parse_or(keys::SERIALIZABLE, Serializer::Json)?,
            props.parse_or(keys::COMPRESS_THRESHOLD, 0usize)?,
            props.parse_or(keys::MAX_BYTE_SIZE, 0usize)?,
        );

        let algorithm = props.get_or(keys::SHARED_ALGORITHM, "hash");
        if !algorithm.eq_ignore_ascii_case("hash") {
            return Err(ConfigError::invalid(
                keys::SHARED_ALGORITHM,
                format!("unsupported sharding algorithm {:?}", algorithm),
            ));
        }
        let shard = ShardConfig {
            clients: props
                .get_or(keys::SHARED_CLIENT_LIST, "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            nodes: props.parse_or(keys::SHARED_NODE, DEFAULT_SHARD_NODES)?,
        };
        if shard.nodes == 0 {
            return Err(ConfigError::invalid(keys::SHARED_NODE, "must be positive"));
        }

        let write_all = WriteAllConfig {
            throw_on_write_error: props.flag(keys::WRITEALL_THROW_ON_ERROR, false)?,
            async_write: props.flag(keys::WRITEALL_ASYNC, false)?,
            pool: props.parse(keys::WRITEALL_THREAD_POOL)?,
        };

        let config = Self {
            name,
            client_type,
            namespace: props.get_or(keys::SERVER_NAMESPACE, "").to_string(),
            topology,
            pool: PoolConfig::from_properties(props)?,
            connection,
            retry,
            health: HealthConfig::from_properties(props)?,
            codec,
            shard,
            write_all,
        };
        config.validate()?;
        Ok(config)
    }

    /// Strategy-specific requirements
    pub fn validate(&self) -> Result<(), ConfigError> {
        let needs_servers = matches!(
            self.client_type,
            ClientType::Default | ClientType::ReadOnly | ClientType::WriteAllReadAny
        );
        let needs_sentinels = matches!(self.client_type, ClientType::Default | ClientType::Sentinel);

        if needs_servers && self.topology.servers.is_empty() {
            return Err(ConfigError::Missing(keys::SERVER_LIST.to_string()));
        }
        if needs_sentinels {
            if self.topology.sentinels.is_empty() {
                return Err(ConfigError::Missing(keys::SENTINEL_LIST.to_string()));
            }
            if self.topology.master_name.is_none() {
                return Err(ConfigError::Missing(keys::SENTINEL_MASTER_NAME.to_string()));
            }
        }
        if self.client_type == ClientType::Shared && self.shard.clients.is_empty() {
            return Err(ConfigError::Missing(keys::SHARED_CLIENT_LIST.to_string()));
        }
        Ok(())
    }
}
