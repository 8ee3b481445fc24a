/// Master-only strategy: reads and writes both go to the sentinel-resolved master
use super::base::{ClientCore, Slot, Wiring};
use super::KvClient;
use crate::core::command::Command;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::core::resp::RespValue;
use crate::core::sentinel::SentinelPool;
use crate::core::Endpoint;
use crate::error::TejidoResult;
use crate::retry::Master;
use async_trait::async_trait;
use std::sync::Arc;

pub struct SentinelClient {
    core: ClientCore,
    wiring: Wiring,
    master: Slot<SentinelPool>,
    lifecycle: LifecycleCell,
}

impl SentinelClient {
    pub fn new(wiring: Wiring) -> Self {
        Self {
            core: ClientCore::new(&wiring.config),
            wiring,
            master: Slot::default(),
            lifecycle: LifecycleCell::default(),
        }
    }

    pub async fn master(&self) -> TejidoResult<Option<Endpoint>> {
        Ok(self.master.get(&self.core.name)?.master().await)
    }

    async fn dispatch(&self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        let target = Master(self.master.get(&self.core.name)?);
        self.core.retry.pipeline(&target, commands).await
    }
}

#[async_trait]
impl Lifecycle for SentinelClient {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("client[{}]", self.core.name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let master = Arc::new(self.wiring.sentinel_pool()?);
        self.master.install(Arc::clone(&master));
        master.start().await
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        if let Some(master) = self.master.take() {
            master.stop().await;
        }
        Ok(())
    }
}

#[async_trait]
impl KvClient for SentinelClient {
    fn core(&self) -> &ClientCore {
        &self.core
    }

    async fn read(&self, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
        self.dispatch(commands).await
    }

    async fn write(
        &self,
        _operation: &'static str,
        commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>> {
        self.dispatch(commands).await
    }
}
