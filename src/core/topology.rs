/// Topology manager for one deployment
///
/// Owns a pool per configured endpoint and the ordered healthy subset that
/// dispatch balances over. Pools are created at start and survive demotion so
/// a readmitted endpoint reuses its pool; every pool is closed at stop.
use crate::config::{keys, PoolConfig};
use crate::core::balancer::LoadBalancer;
use crate::core::connection::Connector;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::pool::{Pool, PooledConnection};
use crate::core::Endpoint;
use crate::error::{ConfigError, TejidoError, TejidoResult};
use async_trait::async_trait;
use fnv::FnvHashMap;
use std::io;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct Topology {
    client: String,
    servers: Vec<Endpoint>,
    healthy: RwLock<Vec<Endpoint>>,
    pools: StdRwLock<FnvHashMap<Endpoint, Arc<Pool>>>,
    balancer: Arc<dyn LoadBalancer>,
    connector: Arc<dyn Connector>,
    pool_config: PoolConfig,
    lifecycle: LifecycleCell,
}

impl Topology {
    pub fn new(
        client: impl Into<String>,
        servers: Vec<Endpoint>,
        balancer: Arc<dyn LoadBalancer>,
        connector: Arc<dyn Connector>,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            client: client.into(),
            servers,
            healthy: RwLock::new(Vec::new()),
            pools: StdRwLock::new(FnvHashMap::default()),
            balancer,
            connector,
            pool_config,
            lifecycle: LifecycleCell::default(),
        }
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    /// The full configured endpoint set
    pub fn servers(&self) -> &[Endpoint] {
        &self.servers
    }

    fn pool(&self, endpoint: &Endpoint) -> Option<Arc<Pool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(endpoint)
            .cloned()
    }

    /// Endpoints that currently have a pool
    pub fn pooled_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Check out a connection from a balanced pick over the healthy set.
    pub async fn get_connection(&self) -> TejidoResult<PooledConnection> {
        let endpoint = {
            let healthy = self.healthy.read().await;
            if healthy.is_empty() {
                return Err(TejidoError::no_healthy_backend(&self.client));
            }
            let index = self
                .balancer
                .pick(&healthy)
                .ok_or_else(|| TejidoError::no_healthy_backend(&self.client))?;
            healthy[index.min(healthy.len() - 1)].clone()
        };
        self.get_connection_for(&endpoint).await
    }

    /// Check out a connection to one specific endpoint, healthy or not.
    pub async fn get_connection_for(&self, endpoint: &Endpoint) -> TejidoResult<PooledConnection> {
        let pool = self.pool(endpoint).ok_or_else(|| {
            TejidoError::connection(
                endpoint,
                io::Error::new(io::ErrorKind::NotFound, "no pool for endpoint"),
            )
        })?;
        pool.get().await
    }

    /// Demote an endpoint; the pool is kept for readmission.
    pub async fn remove(&self, endpoint: &Endpoint) -> bool {
        let mut healthy = self.healthy.write().await;
        let before = healthy.len();
        healthy.retain(|e| e != endpoint);
        let removed = healthy.len() != before;
        if removed {
            warn!(
                "[{}] removed {} from healthy set, now {:?}",
                self.client,
                endpoint,
                names(&healthy)
            );
        }
        removed
    }

    /// Admit an endpoint; ignores duplicates and endpoints outside the full set.
    pub async fn add(&self, endpoint: &Endpoint) -> bool {
        if !self.servers.contains(endpoint) {
            debug!("[{}] ignoring unknown endpoint {}", self.client, endpoint);
            return false;
        }
        let mut healthy = self.healthy.write().await;
        if healthy.contains(endpoint) {
            return false;
        }
        healthy.push(endpoint.clone());
        info!(
            "[{}] added {} to healthy set, now {:?}",
            self.client,
            endpoint,
            names(&healthy)
        );
        true
    }

    /// Snapshot of the healthy set
    pub async fn available_servers(&self) -> Vec<Endpoint> {
        self.healthy.read().await.clone()
    }

    pub async fn is_available(&self, endpoint: &Endpoint) -> bool {
        self.healthy.read().await.contains(endpoint)
    }
}

fn names(endpoints: &[Endpoint]) -> Vec<String> {
    endpoints.iter().map(|e| e.to_string()).collect()
}

#[async_trait]
impl Lifecycle for Topology {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("topology[{}]", self.client)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        if self.servers.is_empty() {
            return Err(ConfigError::Missing(keys::SERVER_LIST.to_string()).into());
        }
        let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
        for endpoint in &self.servers {
            pools.entry(endpoint.clone()).or_insert_with(|| {
                Arc::new(Pool::new(
                    endpoint.clone(),
                    Arc::clone(&self.connector),
                    self.pool_config.clone(),
                ))
            });
        }
        debug!("[{}] created {} pools", self.client, pools.len());
        Ok(())
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        self.healthy.write().await.clear();
        let pools: Vec<Arc<Pool>> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, pool)| pool)
            .collect();
        for pool in pools {
            pool.close();
        }
        Ok(())
    }
}
