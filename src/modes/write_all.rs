/// Write-all / read-any strategy
///
/// Reads go to any healthy replica. The few supported writes are sent to
/// every endpoint in the healthy set, one attempt each: serially, in parallel
/// on the write pool, or detached on the write pool without waiting. A
/// connection failure demotes the endpoint it happened on; whether any failure
/// aborts the write is up to `throw_on_write_error`.
use super::base::{ClientCore, Replicas, Slot, Wiring};
use super::KvClient;
use crate::config::WriteAllConfig;
use crate::core::command::Command;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::reply;
use crate::core::resp::RespValue;
use crate::core::topology::Topology;
use crate::core::write_pool::{WriteHandle, WritePool};
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use crate::retry::{AnyHealthy, Pinned, RetryPolicy};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error, warn};

/// What one endpoint answered during the most recent fan-out
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutOutcome {
    pub endpoint: Endpoint,
    pub result: Result<RespValue, String>,
}

struct Parts {
    replicas: Replicas,
    pool: Option<Arc<WritePool>>,
}

enum Mode {
    Serial,
    Parallel(Arc<WritePool>),
    Detached(Arc<WritePool>),
}

type Results = Vec<(Endpoint, TejidoResult<RespValue>)>;

pub struct WriteAllClient {
    core: ClientCore,
    wiring: Wiring,
    settings: WriteAllConfig,
    parts: Slot<Parts>,
    last: Mutex<Vec<FanOutOutcome>>,
    lifecycle: LifecycleCell,
}

impl WriteAllClient {
    pub fn new(wiring: Wiring) -> Self {
        Self {
            core: ClientCore::new(&wiring.config),
            settings: wiring.config.write_all,
            wiring,
            parts: Slot::default(),
            last: Mutex::new(Vec::new()),
            lifecycle: LifecycleCell::default(),
        }
    }

    /// Per-endpoint outcomes of the latest synchronous fan-out.
    ///
    /// Only recorded while write errors are skipped rather than raised.
    pub fn last_fan_out(&self) -> Vec<FanOutOutcome> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mode(&self, parts: &Parts) -> Mode {
        match &parts.pool {
            Some(pool) if self.settings.async_write => Mode::Detached(Arc::clone(pool)),
            Some(pool) => Mode::Parallel(Arc::clone(pool)),
            None => Mode::Serial,
        }
    }

    /// Send `command` to every healthy endpoint; `None` when detached.
    async fn fan_out(&self, command: Command) -> TejidoResult<Option<Results>> {
        let parts = self.parts.get(&self.core.name)?;
        let topology = Arc::clone(&parts.replicas.topology);
        let endpoints = topology.available_servers().await;
        if endpoints.is_empty() {
            return Err(TejidoError::no_healthy_backend(&self.core.name));
        }
        debug!(
            "[{}] {} fans out to {} endpoint(s)",
            self.core.name,
            command.name(),
            endpoints.len()
        );

        match self.mode(&parts) {
            Mode::Serial => {
                let mut results = Vec::with_capacity(endpoints.len());
                for endpoint in endpoints {
                    match write_to(&topology, &endpoint, &command).await {
                        Err(e) if self.settings.throw_on_write_error => {
                            error!("[{}] {} failed on {}: {}", self.core.name, command.name(), endpoint, e);
                            return Err(e);
                        }
                        result => results.push((endpoint, result)),
                    }
                }
                Ok(Some(results))
            }
            Mode::Parallel(pool) => {
                let handles: Vec<_> = endpoints
                    .into_iter()
                    .map(|endpoint| {
                        let handle = submit(&pool, &topology, &endpoint, &command);
                        (endpoint, handle)
                    })
                    .collect();

                let mut results = Vec::with_capacity(handles.len());
                for (endpoint, handle) in handles {
                    let result = match handle {
                        Ok(handle) => handle.wait().await.and_then(|result| result),
                        Err(e) => Err(e),
                    };
                    results.push((endpoint, result));
                }

                if self.settings.throw_on_write_error {
                    if let Some(index) = results.iter().position(|(_, r)| r.is_err()) {
                        if let (endpoint, Err(e)) = results.swap_remove(index) {
                            error!("[{}] {} failed on {}: {}", self.core.name, command.name(), endpoint, e);
                            return Err(e);
                        }
                    }
                }
                Ok(Some(results))
            }
            Mode::Detached(pool) => {
                for endpoint in &endpoints {
                    if let Err(e) = submit(&pool, &topology, endpoint, &command) {
                        warn!(
                            "[{}] {} not submitted for {}: {}",
                            self.core.name,
                            command.name(),
                            endpoint,
                            e
                        );
                    }
                }
                Ok(None)
            }
        }
    }

    fn record(&self, results: &Results) {
        if self.settings.throw_on_write_error {
            return;
        }
        let outcomes = results
            .iter()
            .map(|(endpoint, result)| FanOutOutcome {
                endpoint: endpoint.clone(),
                result: result.as_ref().map(Clone::clone).map_err(ToString::to_string),
            })
            .collect();
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = outcomes;
    }

    /// The last successful reply, or the last error when nothing succeeded.
    fn settle(&self, results: Results) -> TejidoResult<RespValue> {
        self.record(&results);
        let mut last_ok = None;
        let mut last_err = None;
        for (endpoint, result) in results {
            match result {
                Ok(value) => last_ok = Some(value),
                Err(e) => {
                    warn!("[{}] write skipped on {}: {}", self.core.name, endpoint, e);
                    last_err = Some(e);
                }
            }
        }
        match (last_ok, last_err) {
            (Some(value), _) => Ok(value),
            (None, Some(e)) => Err(e),
            (None, None) => Err(TejidoError::no_healthy_backend(&self.core.name)),
        }
    }
}

/// One attempt against one endpoint; a connection error demotes it.
async fn write_to(
    topology: &Topology,
    endpoint: &Endpoint,
    command: &Command,
) -> TejidoResult<RespValue> {
    let target = Pinned { topology, endpoint };
    RetryPolicy::default().execute(&target, command).await
}

fn submit(
    pool: &WritePool,
    topology: &Arc<Topology>,
    endpoint: &Endpoint,
    command: &Command,
) -> TejidoResult<WriteHandle<TejidoResult<RespValue>>> {
    let topology = Arc::clone(topology);
    let endpoint = endpoint.clone();
    let command = command.clone();
    pool.submit(async move { write_to(&topology, &endpoint, &command).await })
}

#[async_trait]
impl Lifecycle for WriteAllClient {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("client[{}]", self.core.name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let pool = self
            .settings
            .pool
            .map(|config| Arc::new(WritePool::new(self.core.name.clone(), config)));
        if self.settings.async_write && pool.is_none() {
            warn!(
                "[{}] asyncWrite needs writeall.thread.pool, writing serially",
                self.core.name
            );
        }
        let parts = Arc::new(Parts {
            replicas: Replicas::build(&self.wiring),
            pool,
        });
        self.parts.install(Arc::clone(&parts));

        parts.replicas.start().await?;
        if let Some(pool) = &parts.pool {
            pool.start().await?;
        }
        Ok(())
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(parts) = self.parts.take() {
            if let Some(pool) = &parts.pool {
                pool.stop().await;
            }
            parts.replicas.stop().await;
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for WriteAllClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn read(&self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        let parts = self.parts.get(&self.core.name)?;
        let target = AnyHealthy(Arc::clone(&parts.replicas.topology));
        self.core.retry.pipeline(&target, commands).await
    }

    async fn write(
        &self,
        operation: &'static str,
        _commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>> {
        Err(TejidoError::unsupported(format!(
            "{} on write-all client {}",
            operation, self.core.name
        )))
    }

    async fn healthy_endpoints(&self) -> Vec<Endpoint> {
        match self.parts.get(&self.core.name) {
            Ok(parts) => parts.replicas.healthy().await,
            Err(_) => Vec::new(),
        }
    }

    async fn set_bytes(&self, key: &str, value: &[u8]) -> TejidoResult<String> {
        let stored = self.codec().wrap(value)?;
        match self.fan_out(Command::set(&self.key(key), stored)).await? {
            Some(results) => reply::status(self.settle(results)?),
            None => Ok("OK".to_string()),
        }
    }

    async fn del(&self, key: &str) -> TejidoResult<i64> {
        match self.fan_out(Command::del(&self.key(key))).await? {
            Some(results) => reply::integer(self.settle(results)?),
            None => Ok(0),
        }
    }

    async fn flush_db(&self) -> TejidoResult<String> {
        match self.fan_out(Command::flushdb()).await? {
            Some(results) => reply::status(self.settle(results)?),
            None => Ok("OK".to_string()),
        }
    }

    /// Every replica must report the same size.
    async fn db_size(&self) -> TejidoResult<i64> {
        let Some(results) = self.fan_out(Command::dbsize()).await? else {
            return Ok(0);
        };
        self.record(&results);

        let mut sizes = Vec::with_capacity(results.len());
        for (endpoint, result) in results {
            sizes.push((endpoint, reply::integer(result?)?));
        }
        let Some((first_endpoint, first)) = sizes.first().cloned() else {
            return Err(TejidoError::no_healthy_backend(&self.core.name));
        };
        if let Some((endpoint, size)) = sizes.iter().find(|(_, size)| *size != first) {
            return Err(TejidoError::divergence(format!(
                "dbsize {} on {} but {} on {}",
                first, first_endpoint, size, endpoint
            )));
        }
        Ok(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::base::tests::wiring;
    use crate::modes::KvClientExt;
    use crate::testing::MemoryCluster;
    use std::time::Duration;

    const NODES: [&str; 3] = ["a:1", "b:2", "c:3"];

    async fn client(cluster: &MemoryCluster, extra: &[(&str, &str)]) -> WriteAllClient {
        let mut pairs = vec![
            ("client.name", "wa"),
            ("client.type", "writeallreadany"),
            ("server.list", "a:1,b:2,c:3"),
            ("check.schedule.initial.delay", "3600"),
        ];
        pairs.extend_from_slice(extra);
        let client = WriteAllClient::new(wiring(cluster, &pairs));
        client.start().await.unwrap();
        client
    }

    fn healthy(names: Vec<Endpoint>) -> Vec<String> {
        names.iter().map(|e| e.to_string()).collect()
    }

    #[tokio::test]
    async fn test_serial_fan_out_reaches_every_replica() {
        let cluster = MemoryCluster::new(&NODES);
        let client = client(&cluster, &[]).await;

        assert_eq!(client.set_bytes("k", b"v").await.unwrap(), "OK");
        assert_eq!(client.set_object("o", &7u32).await.unwrap(), "OK");
        for node in NODES {
            assert_eq!(cluster.raw(node, "k").unwrap().as_ref(), b"v");
            assert!(cluster.contains(node, "o"));
        }
        assert_eq!(client.get_bytes("k").await.unwrap().unwrap(), b"v");
        assert_eq!(client.get_object::<u32>("o").await.unwrap(), Some(7));

        assert_eq!(client.del("k").await.unwrap(), 1);
        assert!(NODES.iter().all(|node| !cluster.contains(node, "k")));
        assert_eq!(client.db_size().await.unwrap(), 1);
        assert_eq!(client.flush_db().await.unwrap(), "OK");
        assert!(NODES.iter().all(|node| cluster.key_count(node) == 0));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_other_writes_are_unsupported() {
        let cluster = MemoryCluster::new(&NODES);
        let client = client(&cluster, &[]).await;

        for err in [
            client.set("k", "v").await.unwrap_err(),
            client.incr("n").await.unwrap_err(),
            client.setnx_bytes("k", b"v").await.unwrap_err(),
            client.hset("h", "f", "v").await.unwrap_err(),
        ] {
            assert!(matches!(err, TejidoError::Unsupported { .. }), "{err}");
        }
        client.stop().await;
    }

    #[tokio::test]
    async fn test_failed_endpoint_is_skipped_and_demoted() {
        let cluster = MemoryCluster::new(&NODES);
        let client = client(&cluster, &[]).await;
        cluster.set_down("b:2", true);

        assert_eq!(client.set_bytes("k", b"v").await.unwrap(), "OK");
        assert!(cluster.contains("a:1", "k"));
        assert!(cluster.contains("c:3", "k"));
        assert_eq!(healthy(client.healthy_endpoints().await), vec!["a:1", "c:3"]);

        let outcomes = client.last_fan_out();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].endpoint, cluster.endpoint("b:2"));
        assert!(outcomes[1].result.is_err());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_throw_on_write_error_aborts_serial_fan_out() {
        let cluster = MemoryCluster::new(&NODES);
        let client = client(&cluster, &[("writeall.throwExceptionWhenWriteError", "true")]).await;
        cluster.set_down("a:1", true);

        let err = client.set_bytes("k", b"v").await.unwrap_err();
        assert!(err.is_connection_error());
        assert!(!cluster.contains("b:2", "k"));
        assert!(client.last_fan_out().is_empty());
        assert_eq!(healthy(client.healthy_endpoints().await), vec!["b:2", "c:3"]);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_db_size_divergence() {
        let cluster = MemoryCluster::new(&["a:1", "b:2"]);
        let client = WriteAllClient::new(wiring(
            &cluster,
            &[
                ("client.name", "wa"),
                ("client.type", "writeallreadany"),
                ("server.list", "a:1,b:2"),
                ("check.schedule.initial.delay", "3600"),
            ],
        ));
        client.start().await.unwrap();
        cluster.override_reply("a:1", "DBSIZE", RespValue::Integer(10));
        cluster.override_reply("b:2", "DBSIZE", RespValue::Integer(11));

        let err = client.db_size().await.unwrap_err();
        assert!(matches!(err, TejidoError::ReplicaDivergence { .. }));
        assert_eq!(healthy(client.healthy_endpoints().await), vec!["a:1", "b:2"]);

        cluster.override_reply("b:2", "DBSIZE", RespValue::Integer(10));
        assert_eq!(client.db_size().await.unwrap(), 10);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_parallel_fan_out_waits_for_every_endpoint() {
        let cluster = MemoryCluster::new(&NODES);
        for node in NODES {
            cluster.set_delay(node, Duration::from_millis(30));
        }
        let client = client(&cluster, &[("writeall.thread.pool", "2;4;8;60")]).await;

        assert_eq!(client.set_bytes("k", b"v").await.unwrap(), "OK");
        assert!(NODES.iter().all(|node| cluster.contains(node, "k")));
        assert_eq!(client.db_size().await.unwrap(), 1);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_detached_fan_out_returns_before_writes_land() {
        let cluster = MemoryCluster::new(&NODES);
        for node in NODES {
            cluster.put(node, "k", "v");
        }
        let client = client(
            &cluster,
            &[
                ("writeall.asyncWrite", "true"),
                ("writeall.thread.pool", "3;3;8;60"),
            ],
        )
        .await;
        for node in NODES {
            cluster.set_delay(node, Duration::from_millis(200));
        }

        assert_eq!(client.del("k").await.unwrap(), 0);
        assert!(NODES.iter().all(|node| cluster.contains(node, "k")));
        assert_eq!(client.set_bytes("x", b"1").await.unwrap(), "OK");

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(NODES.iter().all(|node| !cluster.contains(node, "k")));
        assert!(NODES.iter().all(|node| cluster.contains(node, "x")));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_async_write_without_pool_is_serial() {
        let cluster = MemoryCluster::new(&NODES);
        let client = client(&cluster, &[("writeall.asyncWrite", "true")]).await;
        assert_eq!(client.set_bytes("k", b"v").await.unwrap(), "OK");
        assert!(NODES.iter().all(|node| cluster.contains(node, "k")));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_empty_healthy_set() {
        let cluster = MemoryCluster::new(&NODES);
        for node in NODES {
            cluster.set_down(node, true);
        }
        let client = client(&cluster, &[]).await;
        let err = client.del("k").await.unwrap_err();
        assert!(matches!(err, TejidoError::NoHealthyBackend { .. }));
        client.stop().await;
    }
}
