/// Sentinel-resolved master pool
///
/// The master address is asked from the sentinels in configured order. A
/// connection failure on the master invalidates the inner pool so the next
/// checkout re-resolves and follows a failover.
use crate::config::PoolConfig;
use crate::core::command::Command;
use crate::core::connection::Connector;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::pool::{Pool, PooledConnection};
use crate::core::{reply, Endpoint};
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct SentinelPool {
    master_name: String,
    sentinels: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn Connector>,
    pool_config: PoolConfig,
    current: RwLock<Option<Arc<Pool>>>,
    lifecycle: LifecycleCell,
}

impl SentinelPool {
    pub fn new(
        master_name: impl Into<String>,
        sentinels: Vec<Endpoint>,
        connector: Arc<dyn Connector>,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            master_name: master_name.into(),
            sentinels,
            resolver: Arc::clone(&connector),
            connector,
            pool_config,
            current: RwLock::new(None),
            lifecycle: LifecycleCell::default(),
        }
    }

    /// Reach the sentinels through `resolver` instead of the master connector.
    ///
    /// Sentinels take neither the data nodes' password nor `SELECT`.
    pub fn with_resolver(mut self, resolver: Arc<dyn Connector>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Currently resolved master, if any
    pub async fn master(&self) -> Option<Endpoint> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|pool| pool.endpoint().clone())
    }

    /// Ask each sentinel in turn for the master address.
    pub async fn resolve(&self) -> TejidoResult<Endpoint> {
        let command = Command::sentinel_master_addr(&self.master_name);
        for sentinel in &self.sentinels {
            let mut conn = match self.resolver.connect(sentinel).await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Sentinel {} unreachable: {}", sentinel, e);
                    continue;
                }
            };
            match conn.execute(&command).await.and_then(reply::master_addr) {
                Ok(Some((host, port))) => {
                    let master = Endpoint::new(host, port);
                    debug!(
                        "Sentinel {} reports master {} for {}",
                        sentinel, master, self.master_name
                    );
                    return Ok(master);
                }
                Ok(None) => warn!(
                    "Sentinel {} does not know master {}",
                    sentinel, self.master_name
                ),
                Err(e) => warn!("Sentinel {} query failed: {}", sentinel, e),
            }
        }
        let origin = self
            .sentinels
            .first()
            .cloned()
            .unwrap_or_else(|| Endpoint::new("sentinel", 0));
        Err(TejidoError::connection(
            &origin,
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("no sentinel could resolve master {}", self.master_name),
            ),
        ))
    }

    async fn master_pool(&self) -> TejidoResult<Arc<Pool>> {
        if let Some(pool) = self.current.read().await.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let mut current = self.current.write().await;
        if let Some(pool) = current.as_ref() {
            return Ok(Arc::clone(pool));
        }
        let master = self.resolve().await?;
        info!("Using master {} for {}", master, self.master_name);
        let pool = Arc::new(Pool::new(
            master,
            Arc::clone(&self.connector),
            self.pool_config.clone(),
        ));
        *current = Some(Arc::clone(&pool));
        Ok(pool)
    }

    /// Check out a connection to the current master.
    pub async fn get(&self) -> TejidoResult<PooledConnection> {
        if !self.is_started() {
            return Err(TejidoError::lifecycle(format!(
                "sentinel pool for {} is not started",
                self.master_name
            )));
        }
        self.master_pool().await?.get().await
    }

    /// Drop the master pool if it still points at `endpoint`.
    pub async fn invalidate(&self, endpoint: &Endpoint) {
        let mut current = self.current.write().await;
        if current.as_ref().map_or(false, |pool| pool.endpoint() == endpoint) {
            if let Some(pool) = current.take() {
                pool.close();
            }
            warn!(
                "Master {} for {} invalidated, will re-resolve",
                endpoint, self.master_name
            );
        }
    }
}

#[async_trait]
impl Lifecycle for SentinelPool {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("sentinel[{}]", self.master_name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        self.master_pool().await.map(|_| ())
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(pool) = self.current.write().await.take() {
            pool.close();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::LifecycleState;
    use crate::testing::MemoryCluster;

    fn sentinel_pool(cluster: &MemoryCluster, sentinels: &[&str]) -> SentinelPool {
        SentinelPool::new(
            "mymaster",
            sentinels.iter().map(|s| cluster.endpoint(s)).collect(),
            cluster.connector(),
            PoolConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_resolves_from_first_answering_sentinel() {
        let cluster = MemoryCluster::new(&["s1:26379", "s2:26379", "m:6379"]);
        cluster.set_down("s1:26379", true);
        cluster.set_sentinel_master("s2:26379", "mymaster", "m:6379");

        let pool = sentinel_pool(&cluster, &["s1:26379", "s2:26379"]);
        pool.start().await.unwrap();
        assert_eq!(pool.master().await, Some(cluster.endpoint("m:6379")));

        let mut conn = pool.get().await.unwrap();
        assert!(conn.ping().await.unwrap());
        assert_eq!(conn.endpoint(), &cluster.endpoint("m:6379"));
    }

    #[tokio::test]
    async fn test_start_fails_without_master() {
        let cluster = MemoryCluster::new(&["s1:26379"]);
        let pool = sentinel_pool(&cluster, &["s1:26379"]);
        let err = pool.start().await.unwrap_err();
        assert!(err.is_connection_error());
        assert_eq!(pool.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_invalidate_follows_failover() {
        let cluster = MemoryCluster::new(&["s1:26379", "m1:6379", "m2:6379"]);
        cluster.set_sentinel_master("s1:26379", "mymaster", "m1:6379");
        let pool = sentinel_pool(&cluster, &["s1:26379"]);
        pool.start().await.unwrap();

        cluster.set_sentinel_master("s1:26379", "mymaster", "m2:6379");
        pool.invalidate(&cluster.endpoint("m2:6379")).await;
        assert_eq!(pool.master().await, Some(cluster.endpoint("m1:6379")));

        pool.invalidate(&cluster.endpoint("m1:6379")).await;
        let conn = pool.get().await.unwrap();
        assert_eq!(conn.endpoint(), &cluster.endpoint("m2:6379"));
    }
}
