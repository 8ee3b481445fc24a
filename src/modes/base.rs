/// Pieces every strategy is assembled from
use crate::codec::ValueCodec;
use crate::config::{keys, ClientConfig, ClientType};
use crate::core::connection::Connector;
use crate::core::lifecycle::Lifecycle;
use crate::core::sentinel::SentinelPool;
use crate::core::topology::Topology;
use crate::core::Endpoint;
use crate::error::{ConfigError, TejidoError, TejidoResult};
use crate::health::{CheckContext, Supervisor, Validator};
use crate::retry::RetryPolicy;
use std::sync::{Arc, PoisonError, RwLock};

/// Identity and per-operation settings of a client
#[derive(Debug, Clone)]
pub struct ClientCore {
    pub name: String,
    pub namespace: String,
    pub codec: ValueCodec,
    pub retry: RetryPolicy,
    pub client_type: ClientType,
}

impl ClientCore {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            name: config.name.clone(),
            namespace: config.namespace.clone(),
            codec: config.codec,
            retry: RetryPolicy::new(config.retry),
            client_type: config.client_type,
        }
    }
}

/// Configuration plus the collaborators a strategy builds its resources from
#[derive(Clone)]
pub struct Wiring {
    pub config: ClientConfig,
    pub connector: Arc<dyn Connector>,
    /// Connector for sentinel queries, without data-node auth or database
    pub sentinel_connector: Arc<dyn Connector>,
    pub validator: Arc<dyn Validator>,
}

impl Wiring {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        Self {
            config,
            sentinel_connector: Arc::clone(&connector),
            connector,
            validator,
        }
    }

    pub fn with_sentinel_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.sentinel_connector = connector;
        self
    }

    /// Sentinel pool for the configured master
    pub fn sentinel_pool(&self) -> TejidoResult<SentinelPool> {
        let topology = &self.config.topology;
        let master_name = topology
            .master_name
            .clone()
            .ok_or_else(|| ConfigError::Missing(keys::SENTINEL_MASTER_NAME.to_string()))?;
        Ok(SentinelPool::new(
            master_name,
            topology.sentinels.clone(),
            Arc::clone(&self.connector),
            self.config.pool.clone(),
        )
        .with_resolver(Arc::clone(&self.sentinel_connector)))
    }
}

/// Resources a strategy allocates at start and releases at stop.
///
/// Rebuilt on every start so a client can recover from a failed start.
pub(crate) struct Slot<T> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl<T> Slot<T> {
    pub(crate) fn get(&self, client: &str) -> TejidoResult<Arc<T>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| TejidoError::lifecycle(format!("client {} is not started", client)))
    }

    pub(crate) fn install(&self, value: Arc<T>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub(crate) fn take(&self) -> Option<Arc<T>> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// A supervised replica topology
pub struct Replicas {
    pub topology: Arc<Topology>,
    supervisor: Supervisor,
}

impl Replicas {
    pub fn build(wiring: &Wiring) -> Self {
        let config = &wiring.config;
        let topology = Arc::new(Topology::new(
            config.name.clone(),
            config.topology.servers.clone(),
            config.connection.load_balancer.build(),
            Arc::clone(&wiring.connector),
            config.pool.clone(),
        ));
        let supervisor = Supervisor::new(
            Arc::clone(&topology),
            &config.health,
            Arc::clone(&wiring.validator),
            CheckContext::new(config.namespace.clone(), config.codec),
            config.connection.timeout,
        );
        Self {
            topology,
            supervisor,
        }
    }

    /// Pools first, then the supervisor's first pass fills the healthy set.
    pub async fn start(&self) -> TejidoResult<()> {
        self.topology.start().await?;
        self.supervisor.start().await
    }

    pub async fn stop(&self) {
        self.supervisor.stop().await;
        self.topology.stop().await;
    }

    pub async fn healthy(&self) -> Vec<Endpoint> {
        self.topology.available_servers().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{ClientConfig, Properties};
    use crate::health::NoopValidator;
    use crate::testing::MemoryCluster;

    /// Wiring over an in-memory cluster, from `key=value` pairs
    pub(crate) fn wiring(cluster: &MemoryCluster, pairs: &[(&str, &str)]) -> Wiring {
        let props: Properties = pairs.iter().copied().collect();
        let config = ClientConfig::from_properties(&props).unwrap();
        Wiring::new(config, cluster.connector(), Arc::new(NoopValidator))
    }

    #[test]
    fn test_slot_requires_install() {
        let slot: Slot<u32> = Slot::default();
        let err = slot.get("c").unwrap_err();
        assert!(matches!(err, TejidoError::Lifecycle { .. }));

        slot.install(Arc::new(7));
        assert_eq!(*slot.get("c").unwrap(), 7);
        assert!(slot.take().is_some());
        assert!(slot.get("c").is_err());
    }

    #[tokio::test]
    async fn test_replicas_start_admits_live_servers() {
        let cluster = MemoryCluster::new(&["a:1", "b:2"]);
        cluster.set_down("b:2", true);
        let wiring = wiring(
            &cluster,
            &[
                ("client.name", "ro"),
                ("client.type", "readonly"),
                ("server.list", "a:1,b:2"),
            ],
        );

        let replicas = Replicas::build(&wiring);
        replicas.start().await.unwrap();
        let healthy: Vec<String> = replicas.healthy().await.iter().map(|e| e.to_string()).collect();
        assert_eq!(healthy, vec!["a:1"]);
        assert_eq!(replicas.topology.pooled_endpoints().len(), 2);

        replicas.stop().await;
        assert!(replicas.healthy().await.is_empty());
    }
}
