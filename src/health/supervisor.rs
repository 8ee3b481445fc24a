/// Periodic membership maintenance for one topology
///
/// One pass runs synchronously at start so the healthy set is populated
/// before the first dispatch; afterwards a single background task repeats the
/// pass after an initial delay and then at a fixed delay between runs. Passes
/// never overlap and their failures only show up as demotions.
use super::validate::Validator;
use super::{CheckContext, CheckPolicy, HealthStatus};
use crate::config::HealthConfig;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::topology::Topology;
use crate::core::Endpoint;
use crate::error::TejidoResult;
use crate::utils::format_duration;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// The checks of one pass, shared with the background task
struct Checks {
    topology: Arc<Topology>,
    policy: CheckPolicy,
    validator: Arc<dyn Validator>,
    context: CheckContext,
    /// Bound on a whole probe; zero means none
    probe_timeout: Duration,
}

pub struct Supervisor {
    checks: Arc<Checks>,
    initial_delay: Duration,
    delay: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: LifecycleCell,
}

impl Supervisor {
    pub fn new(
        topology: Arc<Topology>,
        config: &HealthConfig,
        validator: Arc<dyn Validator>,
        context: CheckContext,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            checks: Arc::new(Checks {
                topology,
                policy: config.policy.clone(),
                validator,
                context,
                probe_timeout,
            }),
            initial_delay: config.initial_delay,
            delay: config.delay,
            task: Mutex::new(None),
            lifecycle: LifecycleCell::default(),
        }
    }

    pub fn policy(&self) -> &CheckPolicy {
        &self.checks.policy
    }

    /// One supervision pass.
    pub async fn run_once(&self) {
        self.checks.run_once().await;
    }

    fn task(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Checks {
    /// `PING`, the validate predicate and, when asked, the version read.
    ///
    /// Returns the status and the version (0 unless `version_key` is given).
    async fn probe(&self, endpoint: &Endpoint, version_key: Option<&str>) -> (HealthStatus, i64) {
        let check = async {
            let mut conn = match self.topology.get_connection_for(endpoint).await {
                Ok(conn) => conn,
                Err(e) => return (HealthStatus::unhealthy(e.to_string()), -1),
            };
            match conn.ping().await {
                Ok(true) => {}
                Ok(false) => return (HealthStatus::unhealthy("PING did not answer PONG"), -1),
                Err(e) => return (HealthStatus::unhealthy(e.to_string()), -1),
            }
            if !self.validator.validate(&mut *conn, &self.context).await {
                return (
                    HealthStatus::unhealthy(format!("{} validation failed", self.validator.name())),
                    -1,
                );
            }
            let version = match version_key {
                Some(key) => self.context.read_version(&mut *conn, key).await,
                None => 0,
            };
            (HealthStatus::Healthy, version)
        };

        if self.probe_timeout.is_zero() {
            return check.await;
        }
        match tokio::time::timeout(self.probe_timeout, check).await {
            Ok(outcome) => outcome,
            Err(_) => (HealthStatus::Timeout, -1),
        }
    }

    async fn run_once(&self) {
        match &self.policy {
            CheckPolicy::Plain => self.plain_pass().await,
            CheckPolicy::Version { key } => self.version_pass(key).await,
        }
    }

    async fn plain_pass(&self) {
        for endpoint in self.topology.available_servers().await {
            let (status, _) = self.probe(&endpoint, None).await;
            if !status.is_healthy() {
                warn!("{} failed its health check: {}", endpoint, status);
                self.topology.remove(&endpoint).await;
            }
        }

        for endpoint in self.unhealthy().await {
            let (status, _) = self.probe(&endpoint, None).await;
            if status.is_healthy() {
                self.topology.add(&endpoint).await;
            } else {
                debug!("{} still unhealthy: {}", endpoint, status);
            }
        }
    }

    async fn version_pass(&self, key: &str) {
        let mut max_healthy = 0i64;
        let mut healthy_versions: BTreeMap<Endpoint, i64> = BTreeMap::new();
        for endpoint in self.topology.available_servers().await {
            let (status, version) = self.probe(&endpoint, Some(key)).await;
            if status.is_healthy() {
                max_healthy = max_healthy.max(version);
                healthy_versions.insert(endpoint, version);
            } else {
                warn!("{} failed its health check: {}", endpoint, status);
                self.topology.remove(&endpoint).await;
            }
        }
        for (endpoint, version) in &healthy_versions {
            if *version != max_healthy {
                warn!(
                    "{} is at version {}, healthy set is at {}",
                    endpoint, version, max_healthy
                );
                self.topology.remove(endpoint).await;
            }
        }

        let candidates = self.unhealthy().await;
        if candidates.is_empty() {
            return;
        }
        let mut max_new = 0i64;
        let mut new_versions: BTreeMap<Endpoint, i64> = BTreeMap::new();
        for endpoint in candidates {
            let (status, version) = self.probe(&endpoint, Some(key)).await;
            if status.is_healthy() {
                max_new = max_new.max(version);
                new_versions.insert(endpoint, version);
            } else {
                debug!("{} still unhealthy: {}", endpoint, status);
            }
        }

        let target = if max_healthy == 0 { max_new } else { max_healthy };
        for (endpoint, version) in new_versions {
            if version == target {
                self.topology.add(&endpoint).await;
            } else {
                info!(
                    "{} kept out at version {}, admitting version {}",
                    endpoint, version, target
                );
            }
        }
    }

    async fn unhealthy(&self) -> Vec<Endpoint> {
        let healthy = self.topology.available_servers().await;
        self.topology
            .servers()
            .iter()
            .filter(|e| !healthy.contains(e))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Lifecycle for Supervisor {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("supervisor[{}]", self.checks.topology.client())
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let checks = Arc::clone(&self.checks);
        checks.run_once().await;
        info!(
            "[{}] initial health pass done, next in {} then every {}, healthy set {:?}",
            checks.topology.client(),
            format_duration(self.initial_delay),
            format_duration(self.delay),
            checks
                .topology
                .available_servers()
                .await
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
        );

        let (initial_delay, delay) = (self.initial_delay, self.delay);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                checks.run_once().await;
                tokio::time::sleep(delay).await;
            }
        });
        if let Some(previous) = self.task().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(handle) = self.task().take() {
            handle.abort();
        }
        Ok(())
    }
}
