/// Sharded strategy: keys spread over child clients by consistent hashing
///
/// Each child is a complete client of any non-sharded strategy and applies
/// its own namespace and codec. Single-key operations go to the child owning
/// the raw key on the ring; multi-key reads are split per child.
pub mod ring;

pub use ring::Ring;

use super::base::{ClientCore, Slot};
use super::KvClient;
use crate::config::{keys, ClientConfig, ClientType};
use crate::core::command::{Command, Expiry, ScanOptions, SetCondition};
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::reply::ScanPage;
use crate::core::resp::RespValue;
use crate::core::Endpoint;
use crate::error::{ConfigError, TejidoError, TejidoResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Builds the child clients, in ring order, each time the client starts
pub type ChildFactory = Box<dyn Fn() -> TejidoResult<Vec<Arc<dyn KvClient>>> + Send + Sync>;

struct Parts {
    children: Vec<Arc<dyn KvClient>>,
    ring: Ring,
}

impl Parts {
    fn child(&self, client: &str, key: &str) -> TejidoResult<Arc<dyn KvClient>> {
        self.ring
            .lookup(key)
            .and_then(|index| self.children.get(index))
            .cloned()
            .ok_or_else(|| TejidoError::no_healthy_backend(client))
    }

    /// Keys grouped by owning child, children in ring order
    fn partition<'a>(&self, keys: &[&'a str]) -> BTreeMap<usize, Vec<&'a str>> {
        let mut groups: BTreeMap<usize, Vec<&'a str>> = BTreeMap::new();
        for key in keys {
            if let Some(index) = self.ring.lookup(key) {
                groups.entry(index).or_default().push(key);
            }
        }
        groups
    }
}

pub struct ShardedClient {
    core: ClientCore,
    nodes: usize,
    factory: ChildFactory,
    parts: Slot<Parts>,
    lifecycle: LifecycleCell,
}

impl ShardedClient {
    pub fn new(config: &ClientConfig, factory: ChildFactory) -> Self {
        // keys reach the children raw; each child merges its own namespace
        let mut core = ClientCore::new(config);
        core.namespace.clear();
        Self {
            core,
            nodes: config.shard.nodes,
            factory,
            parts: Slot::default(),
            lifecycle: LifecycleCell::default(),
        }
    }

    fn parts(&self) -> TejidoResult<Arc<Parts>> {
        self.parts.get(&self.core.name)
    }

    fn shard(&self, key: &str) -> TejidoResult<Arc<dyn KvClient>> {
        self.parts()?.child(&self.core.name, key)
    }

    /// Child names in ring order
    pub fn children(&self) -> Vec<String> {
        self.parts()
            .map(|parts| parts.children.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default()
    }

    /// Name of the child owning `key`
    pub fn owner(&self, key: &str) -> TejidoResult<String> {
        Ok(self.shard(key)?.name().to_string())
    }

    fn unsupported(&self, operation: &str) -> TejidoError {
        TejidoError::unsupported(format!("{} on sharded client {}", operation, self.core.name))
    }
}

#[async_trait]
impl Lifecycle for ShardedClient {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("client[{}]", self.core.name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let children = (self.factory)()?;
        if children.is_empty() {
            return Err(ConfigError::Missing(keys::SHARED_CLIENT_LIST.to_string()).into());
        }
        if let Some(nested) = children
            .iter()
            .find(|child| child.client_type() == ClientType::Shared)
        {
            return Err(ConfigError::invalid(
                keys::SHARED_CLIENT_LIST,
                format!("sharded client {} cannot nest {}", self.core.name, nested.name()),
            )
            .into());
        }

        let parts = Arc::new(Parts {
            ring: Ring::new(children.len(), self.nodes),
            children,
        });
        self.parts.install(Arc::clone(&parts));

        for child in &parts.children {
            child.start().await?;
        }
        info!(
            "[{}] ring of {} points over {:?}",
            self.core.name,
            parts.ring.len(),
            parts.children.iter().map(|c| c.name()).collect::<Vec<_>>()
        );
        Ok(())
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(parts) = self.parts.take() {
            for child in &parts.children {
                child.stop().await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for ShardedClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn read(&self, _commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        Err(self.unsupported("raw pipeline"))
    }

    async fn write(
        &self,
        operation: &'static str,
        _commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>> {
        Err(self.unsupported(operation))
    }

    async fn healthy_endpoints(&self) -> Vec<Endpoint> {
        let Ok(parts) = self.parts() else {
            return Vec::new();
        };
        let mut endpoints = Vec::new();
        for child in &parts.children {
            endpoints.extend(child.healthy_endpoints().await);
        }
        endpoints
    }

    async fn get(&self, key: &str) -> TejidoResult<Option<String>> {
        self.shard(key)?.get(key).await
    }

    async fn get_many(&self, keys: &[&str]) -> TejidoResult<HashMap<String, String>> {
        let parts = self.parts()?;
        let mut out = HashMap::with_capacity(keys.len());
        for (index, group) in parts.partition(keys) {
            if let Some(child) = parts.children.get(index) {
                out.extend(child.get_many(&group).await?);
            }
        }
        Ok(out)
    }

    async fn set(&self, key: &str, value: &str) -> TejidoResult<String> {
        self.shard(key)?.set(key, value).await
    }

    async fn set_with(
        &self,
        key: &str,
        value: &str,
        condition: SetCondition,
        expiry: Expiry,
    ) -> TejidoResult<Option<String>> {
        self.shard(key)?
            .set_with(key, value, condition, expiry)
            .await
    }

    async fn setnx(&self, key: &str, value: &str) -> TejidoResult<bool> {
        self.shard(key)?.setnx(key, value).await
    }

    async fn get_bytes(&self, key: &str) -> TejidoResult<Option<Vec<u8>>> {
        self.shard(key)?.get_bytes(key).await
    }

    async fn get_many_bytes(&self, keys: &[&str]) -> TejidoResult<HashMap<String, Vec<u8>>> {
        let parts = self.parts()?;
        let mut out = HashMap::with_capacity(keys.len());
        for (index, group) in parts.partition(keys) {
            if let Some(child) = parts.children.get(index) {
                out.extend(child.get_many_bytes(&group).await?);
            }
        }
        Ok(out)
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> TejidoResult<String> {
        self.shard(key)?.set_bytes(key, value).await
    }

    async fn setnx_bytes(&self, key: &str, value: &[u8]) -> TejidoResult<bool> {
        self.shard(key)?.setnx_bytes(key, value).await
    }

    async fn incr(&self, key: &str) -> TejidoResult<i64> {
        self.shard(key)?.incr(key).await
    }

    async fn decr(&self, key: &str) -> TejidoResult<i64> {
        self.shard(key)?.decr(key).await
    }

    async fn incr_by(&self, key: &str, delta: i64) -> TejidoResult<i64> {
        self.shard(key)?.incr_by(key, delta).await
    }

    async fn decr_by(&self, key: &str, delta: i64) -> TejidoResult<i64> {
        self.shard(key)?.decr_by(key, delta).await
    }

    async fn append(&self, key: &str, value: &str) -> TejidoResult<i64> {
        self.shard(key)?.append(key, value).await
    }

    async fn del(&self, key: &str) -> TejidoResult<i64> {
        self.shard(key)?.del(key).await
    }

    async fn exists(&self, key: &str) -> TejidoResult<bool> {
        self.shard(key)?.exists(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> TejidoResult<bool> {
        self.shard(key)?.expire(key, seconds).await
    }

    /// The two names may live on different shards.
    async fn rename(&self, _from: &str, _to: &str) -> TejidoResult<String> {
        Err(self.unsupported("rename"))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> TejidoResult<i64> {
        self.shard(key)?.hset(key, field, value).await
    }

    async fn hset_bytes(&self, key: &str, field: &str, value: &[u8]) -> TejidoResult<i64> {
        self.shard(key)?.hset_bytes(key, field, value).await
    }

    async fn hget(&self, key: &str, field: &str) -> TejidoResult<Option<String>> {
        self.shard(key)?.hget(key, field).await
    }

    async fn hget_bytes(&self, key: &str, field: &str) -> TejidoResult<Option<Vec<u8>>> {
        self.shard(key)?.hget_bytes(key, field).await
    }

    async fn hmset(&self, key: &str, entries: &HashMap<String, String>) -> TejidoResult<String> {
        self.shard(key)?.hmset(key, entries).await
    }

    async fn hmset_bytes(
        &self,
        key: &str,
        entries: &HashMap<String, Vec<u8>>,
    ) -> TejidoResult<String> {
        self.shard(key)?.hmset_bytes(key, entries).await
    }

    async fn hget_all(&self, key: &str) -> TejidoResult<HashMap<String, String>> {
        self.shard(key)?.hget_all(key).await
    }

    async fn hget_all_bytes(&self, key: &str) -> TejidoResult<HashMap<String, Vec<u8>>> {
        self.shard(key)?.hget_all_bytes(key).await
    }

    async fn hkeys(&self, key: &str) -> TejidoResult<Vec<String>> {
        self.shard(key)?.hkeys(key).await
    }

    async fn hdel(&self, key: &str, field: &str) -> TejidoResult<i64> {
        self.shard(key)?.hdel(key, field).await
    }

    async fn hexists(&self, key: &str, field: &str) -> TejidoResult<bool> {
        self.shard(key)?.hexists(key, field).await
    }

    async fn sadd(&self, key: &str, members: &[&str]) -> TejidoResult<i64> {
        self.shard(key)?.sadd(key, members).await
    }

    async fn sismember(&self, key: &str, member: &str) -> TejidoResult<bool> {
        self.shard(key)?.sismember(key, member).await
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> TejidoResult<i64> {
        self.shard(key)?.zadd(key, score, member).await
    }

    async fn zrem(&self, key: &str, members: &[&str]) -> TejidoResult<i64> {
        self.shard(key)?.zrem(key, members).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> TejidoResult<Vec<String>> {
        self.shard(key)?.zrange(key, start, stop).await
    }

    async fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        offset: i64,
        count: i64,
    ) -> TejidoResult<Vec<String>> {
        self.shard(key)?
            .zrevrange_by_score(key, max, min, offset, count)
            .await
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> TejidoResult<i64> {
        self.shard(key)?.zcount(key, min, max).await
    }

    async fn zscan(
        &self,
        key: &str,
        cursor: &str,
        options: &ScanOptions,
    ) -> TejidoResult<ScanPage> {
        self.shard(key)?.zscan(key, cursor, options).await
    }

    /// One `name=reply` line per child
    async fn flush_db(&self) -> TejidoResult<String> {
        let parts = self.parts()?;
        let mut out = String::new();
        for child in &parts.children {
            let reply = child.flush_db().await?;
            out.push_str(&format!("{}={}\n", child.name(), reply));
        }
        Ok(out)
    }

    /// Sum over children
    async fn db_size(&self) -> TejidoResult<i64> {
        let parts = self.parts()?;
        let mut total = 0;
        for child in &parts.children {
            total += child.db_size().await?;
        }
        Ok(total)
    }

    async fn info(&self, section: Option<&str>) -> TejidoResult<String> {
        let parts = self.parts()?;
        let mut out = String::new();
        for child in &parts.children {
            let reply = child.info(section).await?;
            out.push_str(&format!("{}={}\n", child.name(), reply));
        }
        Ok(out)
    }

    async fn keys(&self, _pattern: &str) -> TejidoResult<Vec<String>> {
        Err(self.unsupported("keys"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;
    use crate::modes::base::tests::wiring;
    use crate::modes::{KvClientExt, SentinelClient};
    use crate::testing::MemoryCluster;

    const CHILDREN: [(&str, &str); 2] = [("c0", "m0:1"), ("c1", "m1:2")];

    fn cluster() -> MemoryCluster {
        let cluster = MemoryCluster::new(&["m0:1", "m1:2", "s:26379"]);
        for (name, master) in CHILDREN {
            cluster.set_sentinel_master("s:26379", name, master);
        }
        cluster
    }

    fn sharded_config() -> ClientConfig {
        let props: Properties = [
            ("client.name", "sh"),
            ("client.type", "shared"),
            ("shared.client.list", "c0,c1"),
        ]
        .into_iter()
        .collect();
        ClientConfig::from_properties(&props).unwrap()
    }

    fn sharded(cluster: &MemoryCluster, namespace: &'static str) -> ShardedClient {
        let cluster = cluster.clone();
        let factory: ChildFactory = Box::new(move || {
            Ok(CHILDREN
                .iter()
                .map(|&(name, _)| {
                    let child = SentinelClient::new(wiring(
                        &cluster,
                        &[
                            ("client.name", name),
                            ("client.type", "sentinel"),
                            ("server.namespace", namespace),
                            ("sentinel.list", "s:26379"),
                            ("sentinel.master.name", name),
                        ],
                    ));
                    Arc::new(child) as Arc<dyn KvClient>
                })
                .collect())
        });
        ShardedClient::new(&sharded_config(), factory)
    }

    fn master_of(child: &str) -> &'static str {
        CHILDREN
            .iter()
            .find(|(name, _)| *name == child)
            .map(|(_, master)| *master)
            .unwrap()
    }

    #[tokio::test]
    async fn test_keys_land_on_the_ring_owner() {
        let cluster = cluster();
        let client = sharded(&cluster, "");
        client.start().await.unwrap();
        assert_eq!(client.children(), vec!["c0", "c1"]);

        let ring = Ring::new(2, 160);
        let keys: Vec<String> = (0..40).map(|i| format!("user:{}", i)).collect();
        for key in &keys {
            client.set(key, "v").await.unwrap();
            let owner = client.owner(key).unwrap();
            assert_eq!(owner, CHILDREN[ring.lookup(key).unwrap()].0);
            assert!(cluster.contains(master_of(&owner), key));
        }
        assert!(cluster.key_count("m0:1") > 0);
        assert!(cluster.key_count("m1:2") > 0);
        assert_eq!(client.db_size().await.unwrap(), 40);

        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let found = client.get_many(&refs).await.unwrap();
        assert_eq!(found.len(), 40);

        let flushed = client.flush_db().await.unwrap();
        assert_eq!(flushed, "c0=OK\nc1=OK\n");
        assert_eq!(client.db_size().await.unwrap(), 0);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_children_apply_their_own_namespace() {
        let cluster = cluster();
        let client = sharded(&cluster, "app");
        client.start().await.unwrap();

        client.set_object("user:42", &42u64).await.unwrap();
        let owner = client.owner("user:42").unwrap();
        assert!(cluster.contains(master_of(&owner), "app:user:42"));
        assert_eq!(client.get_object::<u64>("user:42").await.unwrap(), Some(42));
        let found: HashMap<String, u64> = client.get_objects(&["user:42", "nope"]).await.unwrap();
        assert_eq!(found.len(), 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_cross_shard_operations_are_rejected() {
        let cluster = cluster();
        let client = sharded(&cluster, "");
        client.start().await.unwrap();

        assert!(matches!(
            client.rename("a", "b").await.unwrap_err(),
            TejidoError::Unsupported { .. }
        ));
        assert!(matches!(
            client.keys("*").await.unwrap_err(),
            TejidoError::Unsupported { .. }
        ));
        let info = client.info(None).await.unwrap();
        assert!(info.starts_with("c0="));
        assert!(info.contains("\nc1="));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_nested_sharding_is_rejected_at_start() {
        let factory: ChildFactory = Box::new(|| {
            let inner = ShardedClient::new(&sharded_config(), Box::new(|| Ok(Vec::new())));
            Ok(vec![Arc::new(inner) as Arc<dyn KvClient>])
        });
        let client = ShardedClient::new(&sharded_config(), factory);

        let err = client.start().await.unwrap_err();
        assert!(matches!(err, TejidoError::Config(ConfigError::Invalid { .. })));
        assert!(matches!(client.get("k").await.unwrap_err(), TejidoError::Lifecycle { .. }));
    }
}
