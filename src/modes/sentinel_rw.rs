/// Default strategy: replica reads, sentinel-resolved master writes
use super::base::{ClientCore, Replicas, Slot, Wiring};
use super::KvClient;
use crate::core::command::Command;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::resp::RespValue;
use crate::core::sentinel::SentinelPool;
use crate::core::Endpoint;
use crate::error::TejidoResult;
use crate::retry::{AnyHealthy, Master};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

struct Parts {
    replicas: Replicas,
    master: Arc<SentinelPool>,
}

pub struct SentinelRwClient {
    core: ClientCore,
    wiring: Wiring,
    parts: Slot<Parts>,
    lifecycle: LifecycleCell,
}

impl SentinelRwClient {
    pub fn new(wiring: Wiring) -> Self {
        Self {
            core: ClientCore::new(&wiring.config),
            wiring,
            parts: Slot::default(),
            lifecycle: LifecycleCell::default(),
        }
    }

    /// Master currently used for writes
    pub async fn master(&self) -> TejidoResult<Option<Endpoint>> {
        Ok(self.parts.get(&self.core.name)?.master.master().await)
    }
}

#[async_trait]
impl Lifecycle for SentinelRwClient {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("client[{}]", self.core.name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let parts = Arc::new(Parts {
            replicas: Replicas::build(&self.wiring),
            master: Arc::new(self.wiring.sentinel_pool()?),
        });
        self.parts.install(Arc::clone(&parts));
        parts.replicas.start().await?;
        parts.master.start().await
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(parts) = self.parts.take() {
            parts.master.stop().await;
            parts.replicas.stop().await;
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for SentinelRwClient {
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
        commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>> {
        let parts = self.parts.get(&self.core.name)?;
        debug!("[{}] {} goes to the master", self.core.name, operation);
        let target = Master(Arc::clone(&parts.master));
        self.core.retry.pipeline(&target, commands).await
    }

    async fn healthy_endpoints(&self) -> Vec<Endpoint> {
        match self.parts.get(&self.core.name) {
            Ok(parts) => parts.replicas.healthy().await,
            Err(_) => Vec::new(),
        }
    }
}
