/// Tejido - a client-side Redis fabric
///
/// Tejido turns a flat configuration into named clients that hide the shape
/// of the Redis deployment behind one operation surface:
/// 1. Sentinel-mastered: writes to the sentinel-resolved master, reads spread over healthy replicas
/// 2. Sentinel-only: everything through the master
/// 3. Read-only: reads over a health-supervised replica set, writes rejected
/// 4. Write-all / read-any: mutations fanned out to every healthy member
/// 5. Sharded: keys spread over child clients on a MurmurHash ring
///
/// Clients are built by a [`ClientFactory`] and, when an application wants a
/// process-wide cache of started clients, held in a [`ClientRegistry`].
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod modes;
pub mod retry;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::codec::{Serializer, ValueCodec};
pub use crate::config::{ClientConfig, ClientType, Properties};
pub use crate::core::lifecycle::{Lifecycle, LifecycleState};
pub use crate::core::Endpoint;
pub use crate::error::{ConfigError, TejidoError, TejidoResult};
pub use crate::health::Validator;
pub use crate::modes::{KvClient, KvClientExt};

use crate::config::{keys, ValidatorSpec};
use crate::core::connection::Connector;
use crate::health::{KeyEqualityValidator, NoopValidator};
use crate::modes::sharded::ChildFactory;
use crate::modes::{
    ReadOnlyClient, SentinelClient, SentinelRwClient, ShardedClient, Wiring, WriteAllClient,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Builds clients from a root configuration holding every client section
#[derive(Clone)]
pub struct ClientFactory {
    root: Properties,
    connector: Option<Arc<dyn Connector>>,
    validators: HashMap<String, Arc<dyn Validator>>,
}

impl ClientFactory {
    pub fn new(root: Properties) -> Self {
        Self {
            root,
            connector: None,
            validators: HashMap::new(),
        }
    }

    /// Load the root configuration from a TOML or properties file
    pub fn from_file<P: AsRef<Path>>(path: P) -> TejidoResult<Self> {
        Ok(Self::new(Properties::load_from_file(path)?))
    }

    /// Use one connector for every client instead of a TCP connector per client
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Make a validator selectable through `validate.class = <name>`
    pub fn register_validator<S: Into<String>>(&mut self, name: S, validator: Arc<dyn Validator>) {
        self.validators.insert(name.into(), validator);
    }

    pub fn root(&self) -> &Properties {
        &self.root
    }

    /// Client section names found in the root configuration
    pub fn client_names(&self) -> Vec<String> {
        self.root.client_names()
    }

    /// Properties for the section `name`
    pub fn section(&self, name: &str) -> Properties {
        self.root.scoped(name)
    }

    /// Construct an unstarted client of the strategy `client.type` names
    pub fn build(&self, props: &Properties) -> TejidoResult<Arc<dyn KvClient>> {
        let config = ClientConfig::from_properties(props)?;
        info!("Building {} client {}", config.client_type, config.name);

        let client: Arc<dyn KvClient> = match config.client_type {
            ClientType::Shared => {
                let factory = self.clone();
                let parent = props.clone();
                let children = config.shard.clients.clone();
                let builder: ChildFactory = Box::new(move || {
                    children
                        .iter()
                        .map(|child| factory.build_child(&parent, child))
                        .collect()
                });
                Arc::new(ShardedClient::new(&config, builder))
            }
            ClientType::Default => Arc::new(SentinelRwClient::new(self.wiring(config))),
            ClientType::Sentinel => Arc::new(SentinelClient::new(self.wiring(config))),
            ClientType::ReadOnly => Arc::new(ReadOnlyClient::new(self.wiring(config))),
            ClientType::WriteAllReadAny => Arc::new(WriteAllClient::new(self.wiring(config))),
        };
        Ok(client)
    }

    /// Build and start the client configured under `name`
    pub async fn open(&self, name: &str) -> TejidoResult<Arc<dyn KvClient>> {
        let client = self.build(&self.section(name))?;
        if let Err(e) = client.start().await {
            client.stop().await;
            return Err(e);
        }
        Ok(client)
    }

    /// A shard child: the parent's options overlaid with the child's own section
    fn build_child(&self, parent: &Properties, name: &str) -> TejidoResult<Arc<dyn KvClient>> {
        let props = parent.overlay(&self.section(name));
        let config = ClientConfig::from_properties(&props)?;
        if config.client_type == ClientType::Shared {
            return Err(ConfigError::invalid(
                keys::CLIENT_TYPE,
                format!("shard child {} cannot itself be shared", name),
            )
            .into());
        }
        self.build(&props)
    }

    fn wiring(&self, config: ClientConfig) -> Wiring {
        let validator = self.validator(&config.health.validator);
        match &self.connector {
            Some(connector) => Wiring::new(config, Arc::clone(connector), validator),
            None => {
                let connector = Arc::new(config.connection.connector());
                let sentinels = Arc::new(config.connection.sentinel_connector());
                Wiring::new(config, connector, validator).with_sentinel_connector(sentinels)
            }
        }
    }

    fn validator(&self, spec: &ValidatorSpec) -> Arc<dyn Validator> {
        match spec {
            ValidatorSpec::Noop => Arc::new(NoopValidator),
            ValidatorSpec::KeyEquality { key, value } => {
                Arc::new(KeyEqualityValidator::new(key.clone(), value.clone()))
            }
            ValidatorSpec::Custom(name) => match self.validators.get(name) {
                Some(validator) => Arc::clone(validator),
                None => {
                    warn!("No validator registered as {:?}, using noop", name);
                    Arc::new(NoopValidator)
                }
            },
        }
    }
}

/// Application-owned cache of started clients, one per section name
pub struct ClientRegistry {
    factory: ClientFactory,
    clients: Mutex<HashMap<String, Arc<dyn KvClient>>>,
}

impl ClientRegistry {
    pub fn new(factory: ClientFactory) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &ClientFactory {
        &self.factory
    }

    /// The started client for `name`, opening it on first use
    pub async fn get_or_open(&self, name: &str) -> TejidoResult<Arc<dyn KvClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(name) {
            return Ok(Arc::clone(client));
        }
        let client = self.factory.open(name).await?;
        clients.insert(name.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Stop and evict `name`; false when it was not open
    pub async fn close(&self, name: &str) -> bool {
        let client = self.clients.lock().await.remove(name);
        match client {
            Some(client) => {
                client.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let clients: Vec<_> = self.clients.lock().await.drain().collect();
        for (name, client) in clients {
            info!("Closing client {}", name);
            client.stop().await;
        }
    }

    pub async fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Connection;
    use crate::health::CheckContext;
    use crate::testing::MemoryCluster;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn root(pairs: &[(&str, &str)]) -> Properties {
        pairs.iter().copied().collect()
    }

    fn factory_over(cluster: &MemoryCluster, pairs: &[(&str, &str)]) -> ClientFactory {
        ClientFactory::new(root(pairs)).with_connector(cluster.connector())
    }

    struct Counting(AtomicUsize);

    #[async_trait]
    impl Validator for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn validate(&self, _conn: &mut dyn Connection, _context: &CheckContext) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    const SHARDED: [(&str, &str); 9] = [
        ("cache.client.type", "shared"),
        ("cache.shared.client.list", "c0,c1"),
        ("cache.server.namespace", "app"),
        ("c0.client.type", "sentinel"),
        ("c0.sentinel.list", "s:26379"),
        ("c0.sentinel.master.name", "c0"),
        ("c1.client.type", "sentinel"),
        ("c1.sentinel.list", "s:26379"),
        ("c1.sentinel.master.name", "c1"),
    ];

    fn sharded_cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new(&["m0:1", "m1:2", "s:26379"]);
        cluster.set_sentinel_master("s:26379", "c0", "m0:1");
        cluster.set_sentinel_master("s:26379", "c1", "m1:2");
        cluster
    }

    #[tokio::test]
    async fn test_open_builds_the_configured_strategy() {
        let cluster = MemoryCluster::new(&["a:1", "b:2"]);
        let factory = factory_over(
            &cluster,
            &[
                ("ro.client.type", "readonly"),
                ("ro.server.list", "a:1,b:2"),
                ("ro.check.schedule.initial.delay", "3600"),
            ],
        );
        assert_eq!(factory.client_names(), vec!["ro"]);

        let client = factory.open("ro").await.unwrap();
        assert_eq!(client.name(), "ro");
        assert_eq!(client.client_type(), ClientType::ReadOnly);
        assert!(client.is_started());
        assert_eq!(client.healthy_endpoints().await.len(), 2);
        assert!(matches!(
            client.set("k", "v").await.unwrap_err(),
            TejidoError::WriteNotAllowed { .. }
        ));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_open_reports_bad_sections() {
        let cluster = MemoryCluster::new(&["a:1"]);
        let factory = factory_over(&cluster, &[("ro.client.type", "readonly")]);
        let err = factory.open("ro").await.err().unwrap();
        assert!(matches!(err, TejidoError::Config(ConfigError::Missing(ref key)) if key == "server.list"));

        let factory = factory_over(&cluster, &[("x.client.type", "cluster")]);
        assert!(matches!(
            factory.open("x").await.err().unwrap(),
            TejidoError::Config(ConfigError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_registered_validator_is_used() {
        let cluster = MemoryCluster::new(&["a:1"]);
        let mut factory = factory_over(
            &cluster,
            &[
                ("ro.client.type", "readonly"),
                ("ro.server.list", "a:1"),
                ("ro.validate.class", "counting"),
                ("ro.check.schedule.initial.delay", "3600"),
            ],
        );
        let counting = Arc::new(Counting(AtomicUsize::new(0)));
        factory.register_validator("counting", counting.clone());

        let client = factory.open("ro").await.unwrap();
        assert!(counting.0.load(Ordering::SeqCst) >= 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_validator_falls_back_to_noop() {
        let cluster = MemoryCluster::new(&["a:1"]);
        let factory = factory_over(
            &cluster,
            &[
                ("ro.client.type", "readonly"),
                ("ro.server.list", "a:1"),
                ("ro.validate.class", "com.example.Missing"),
                ("ro.check.schedule.initial.delay", "3600"),
            ],
        );
        let client = factory.open("ro").await.unwrap();
        assert_eq!(client.healthy_endpoints().await.len(), 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_sharded_children_come_from_their_sections() {
        let cluster = sharded_cluster();
        let factory = factory_over(&cluster, &SHARDED);

        let client = factory.open("cache").await.unwrap();
        assert_eq!(client.client_type(), ClientType::Shared);
        assert_eq!(client.namespace(), "");
        for i in 0..20 {
            client.set(&format!("k{}", i), "v").await.unwrap();
        }
        // children inherit the parent's namespace
        let stored = cluster.key_count("m0:1") + cluster.key_count("m1:2");
        assert_eq!(stored, 20);
        assert!(cluster.contains("m0:1", "app:k0") || cluster.contains("m1:2", "app:k0"));
        assert_eq!(client.db_size().await.unwrap(), 20);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_shared_child_is_rejected() {
        let cluster = sharded_cluster();
        let mut pairs = SHARDED.to_vec();
        pairs.retain(|(key, _)| *key != "c1.client.type");
        let factory = factory_over(&cluster, &pairs);

        let err = factory.open("cache").await.err().unwrap();
        assert!(matches!(
            err,
            TejidoError::Config(ConfigError::Invalid { ref key, .. }) if key == "client.type"
        ));
    }

    #[tokio::test]
    async fn test_registry_caches_and_closes() {
        let cluster = sharded_cluster();
        let registry = ClientRegistry::new(factory_over(&cluster, &SHARDED));

        let first = registry.get_or_open("c0").await.unwrap();
        let again = registry.get_or_open("c0").await.unwrap();
        assert!(std::ptr::eq(
            Arc::as_ptr(&first) as *const u8,
            Arc::as_ptr(&again) as *const u8
        ));
        registry.get_or_open("c1").await.unwrap();
        assert_eq!(registry.open_names().await, vec!["c0", "c1"]);

        assert!(registry.close("c0").await);
        assert!(!registry.close("c0").await);
        assert_eq!(first.state(), LifecycleState::Stopped);

        let reopened = registry.get_or_open("c0").await.unwrap();
        assert!(reopened.is_started());
        registry.close_all().await;
        assert!(registry.open_names().await.is_empty());
        assert_eq!(reopened.state(), LifecycleState::Stopped);
    }
}
