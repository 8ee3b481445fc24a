/// Read-only strategy over a supervised replica set
use super::base::{ClientCore, Replicas, Slot, Wiring};
use super::KvClient;
use crate::core::command::Command;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::resp::RespValue;
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use crate::retry::AnyHealthy;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ReadOnlyClient {
    core: ClientCore,
    wiring: Wiring,
    replicas: Slot<Replicas>,
    lifecycle: LifecycleCell,
}

impl ReadOnlyClient {
    pub fn new(wiring: Wiring) -> Self {
        Self {
            core: ClientCore::new(&wiring.config),
            wiring,
            replicas: Slot::default(),
            lifecycle: LifecycleCell::default(),
        }
    }
}

#[async_trait]
impl Lifecycle for ReadOnlyClient {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("client[{}]", self.core.name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let replicas = Arc::new(Replicas::build(&self.wiring));
        self.replicas.install(Arc::clone(&replicas));
        replicas.start().await
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(replicas) = self.replicas.take() {
            replicas.stop().await;
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for ReadOnlyClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn read(&self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        let replicas = self.replicas.get(&self.core.name)?;
        let target = AnyHealthy(Arc::clone(&replicas.topology));
        self.core.retry.pipeline(&target, commands).await
    }

    async fn write(
        &self,
        operation: &'static str,
        _commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>> {
        Err(TejidoError::write_not_allowed(operation))
    }

    fn writable(&self, operation: &'static str) -> TejidoResult<()> {
        Err(TejidoError::write_not_allowed(operation))
    }

    async fn healthy_endpoints(&self) -> Vec<Endpoint> {
        match self.replicas.get(&self.core.name) {
            Ok(replicas) => replicas.healthy().await,
            Err(_) => Vec::new(),
        }
    }
}
